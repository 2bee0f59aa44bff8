// 该文件是 YoloTiny 项目的一部分。
// src/input.rs - 图像输入
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::RgbImage;
use thiserror::Error;
use tracing::error;
use url::Url;

use crate::{
  FromUrl,
  frame::RgbNhwcFrame,
  preprocess::{PreprocessError, Rotation, prepare_frame},
  utils::{UrlParamError, query_parse},
};

pub trait AsNhwcFrame<const W: u32, const H: u32> {
  fn as_nhwc(&self) -> &[u8];
}

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError, ImageFolderInput};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("Invalid URL parameter: {0}")]
  UrlParam(#[from] UrlParamError),
  #[error("Invalid rotation: {0}")]
  Rotation(#[from] PreprocessError),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
}

/// 从 `rotation` 查询参数读取旋转角度
pub fn rotation_from_url(url: &Url) -> Result<Rotation, InputError> {
  match query_parse::<i32>(url, "rotation")? {
    Some(degrees) => Ok(Rotation::from_degrees(degrees)?),
    None => Ok(Rotation::Deg0),
  }
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "read_image_file")]
  ReadImageFolder(ImageFolderInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
      if url.scheme() == ImageFolderInput::SCHEME {
        let input = ImageFolderInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFolder(input));
      }
    }
    error!("不支持的输入方案: {}", url.scheme());
    Err(InputError::SchemeMismatch)
  }
}

impl InputWrapper {
  pub fn rotation(&self) -> Rotation {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.rotation(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFolder(input) => input.rotation(),
      #[allow(unreachable_patterns)]
      _ => Rotation::Deg0,
    }
  }

  pub fn into_nhwc<const S: u32>(self) -> NhwcFrames<Self, S> {
    let rotation = self.rotation();
    NhwcFrames::new(self, rotation)
  }
}

impl Iterator for InputWrapper {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFolder(input) => input.next(),
      #[allow(unreachable_patterns)]
      _ => None,
    }
  }
}

/// 将原始图像裁剪缩放为 SxS 的模型输入帧
///
/// 无法转换的图像会被跳过。
pub struct NhwcFrames<I, const S: u32> {
  inner: I,
  rotation: Rotation,
}

impl<I, const S: u32> NhwcFrames<I, S> {
  pub fn new(inner: I, rotation: Rotation) -> Self {
    Self { inner, rotation }
  }
}

impl<I: Iterator<Item = RgbImage>, const S: u32> Iterator for NhwcFrames<I, S> {
  type Item = RgbNhwcFrame<S, S>;

  fn next(&mut self) -> Option<Self::Item> {
    for image in self.inner.by_ref() {
      match prepare_frame::<S>(&image, self.rotation) {
        Ok(frame) => return Some(frame),
        Err(e) => error!("图像预处理失败，跳过: {}", e),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rotation_query_parameter() {
    let url = Url::parse("image:///a.png?rotation=-90").unwrap();
    assert_eq!(rotation_from_url(&url).unwrap(), Rotation::Deg270);

    let url = Url::parse("image:///a.png").unwrap();
    assert_eq!(rotation_from_url(&url).unwrap(), Rotation::Deg0);

    let url = Url::parse("image:///a.png?rotation=30").unwrap();
    assert!(matches!(
      rotation_from_url(&url),
      Err(InputError::Rotation(_))
    ));
  }

  #[test]
  fn frames_skip_unusable_images() {
    let images = vec![RgbImage::new(0, 0), RgbImage::new(8, 4)];
    let mut frames = NhwcFrames::<_, 4>::new(images.into_iter(), Rotation::Deg0);
    assert_eq!(frames.next().map(|f| f.len()), Some(4 * 4 * 3));
    assert!(frames.next().is_none());
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("rtsp://camera/stream").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch)
    ));
  }
}

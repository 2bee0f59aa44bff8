// 该文件是 YoloTiny 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{InputError, rotation_from_url},
  preprocess::Rotation,
  utils::url_path,
};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("Not a directory: {0}")]
  NotADirectory(PathBuf),
}

fn load_rgb(path: &Path) -> Result<RgbImage, ImageFileInputError> {
  let image = ImageReader::open(path)?.decode()?;
  debug!("读取图像 {}: {}x{}", path.display(), image.width(), image.height());
  Ok(image.to_rgb8())
}

/// 单张图像文件
pub struct ImageFileInput {
  image: Option<RgbImage>,
  rotation: Rotation,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch.into());
    }

    let rotation = rotation_from_url(url)?;
    let path = url_path(url)?;
    let image = load_rgb(&path)?;

    Ok(ImageFileInput {
      image: Some(image),
      rotation,
    })
  }
}

impl ImageFileInput {
  pub fn rotation(&self) -> Rotation {
    self.rotation
  }
}

impl Iterator for ImageFileInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take()
  }
}

/// 目录下的所有图像文件，按文件名排序
pub struct ImageFolderInput {
  paths: VecDeque<PathBuf>,
  rotation: Rotation,
}

impl FromUrlWithScheme for ImageFolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageFolderInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ImageFileInputError::SchemaMismatch.into());
    }

    let rotation = rotation_from_url(url)?;
    let directory = url_path(url)?;
    let mut input = Self::open(&directory).map_err(InputError::from)?;
    input.rotation = rotation;
    Ok(input)
  }
}

impl ImageFolderInput {
  pub fn open(directory: &Path) -> Result<Self, ImageFileInputError> {
    if !directory.is_dir() {
      return Err(ImageFileInputError::NotADirectory(directory.to_path_buf()));
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(directory)? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
      if path.is_file() && is_image {
        paths.push(path);
      }
    }
    paths.sort();
    info!("目录 {} 中共有 {} 张图像", directory.display(), paths.len());

    Ok(Self {
      paths: paths.into(),
      rotation: Rotation::Deg0,
    })
  }

  pub fn rotation(&self) -> Rotation {
    self.rotation
  }

  pub fn remaining(&self) -> usize {
    self.paths.len()
  }
}

impl Iterator for ImageFolderInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some(path) = self.paths.pop_front() {
      match load_rgb(&path) {
        Ok(image) => return Some(image),
        Err(e) => error!("读取图像 {} 失败，跳过: {}", path.display(), e),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn write_png(path: &Path, width: u32, height: u32) {
    RgbImage::from_pixel(width, height, Rgb([10, 20, 30]))
      .save(path)
      .unwrap();
  }

  #[test]
  fn reads_single_image_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("one.png");
    write_png(&path, 5, 3);

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file:", "image:", 1)).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();

    let image = input.next().unwrap();
    assert_eq!(image.dimensions(), (5, 3));
    assert!(input.next().is_none());
  }

  #[test]
  fn folder_lists_images_sorted_and_skips_broken_files() {
    let dir = tempfile::tempdir().unwrap();
    write_png(&dir.path().join("b.png"), 2, 2);
    write_png(&dir.path().join("a.png"), 4, 4);
    std::fs::write(dir.path().join("c.jpg"), b"not an image").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    let mut input = ImageFolderInput::open(dir.path()).unwrap();
    assert_eq!(input.remaining(), 3);

    assert_eq!(input.next().unwrap().dimensions(), (4, 4));
    assert_eq!(input.next().unwrap().dimensions(), (2, 2));
    assert!(input.next().is_none());
  }

  #[test]
  fn folder_must_be_directory() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("x.png");
    write_png(&file, 1, 1);
    assert!(matches!(
      ImageFolderInput::open(&file),
      Err(ImageFileInputError::NotADirectory(_))
    ));
  }
}

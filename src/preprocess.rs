// 该文件是 YoloTiny 项目的一部分。
// src/preprocess.rs - 图像预处理
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

use image::{Rgb, RgbImage, imageops};
use thiserror::Error;
use tracing::debug;

use crate::frame::{FrameError, RgbNhwcFrame};

// 2^18 - 1，定点 YUV 转换结果在缩回 8 位之前的上限
const YUV_MAX_CHANNEL_VALUE: i32 = 262_143;

#[derive(Error, Debug, PartialEq)]
pub enum PreprocessError {
  #[error("不支持的旋转角度: {0}")]
  UnsupportedRotation(i32),
  #[error("图像为空")]
  EmptyImage,
  #[error("YUV 平面 {plane} 长度不足: 需要 {needed}, 实际 {actual}")]
  PlaneTooShort {
    plane: &'static str,
    needed: usize,
    actual: usize,
  },
  #[error("帧错误: {0}")]
  Frame(#[from] FrameError),
}

/// 围绕中心的顺时针旋转
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
  #[default]
  Deg0,
  Deg90,
  Deg180,
  Deg270,
}

impl Rotation {
  /// 角度按 360 取模，仅接受 90 的整数倍
  pub fn from_degrees(degrees: i32) -> Result<Self, PreprocessError> {
    match degrees.rem_euclid(360) {
      0 => Ok(Rotation::Deg0),
      90 => Ok(Rotation::Deg90),
      180 => Ok(Rotation::Deg180),
      270 => Ok(Rotation::Deg270),
      _ => Err(PreprocessError::UnsupportedRotation(degrees)),
    }
  }

  pub fn degrees(self) -> i32 {
    match self {
      Rotation::Deg0 => 0,
      Rotation::Deg90 => 90,
      Rotation::Deg180 => 180,
      Rotation::Deg270 => 270,
    }
  }

  /// 由传感器安装方向与屏幕旋转计算需要补偿的旋转
  pub fn from_orientation(sensor: i32, display: Rotation) -> Result<Self, PreprocessError> {
    let degrees = match display {
      Rotation::Deg0 => sensor,
      Rotation::Deg180 => sensor + 180,
      Rotation::Deg90 => sensor - 90,
      Rotation::Deg270 => sensor + 90,
    };
    Self::from_degrees(degrees)
  }

  fn apply(self, image: RgbImage) -> RgbImage {
    match self {
      Rotation::Deg0 => image,
      Rotation::Deg90 => imageops::rotate90(&image),
      Rotation::Deg180 => imageops::rotate180(&image),
      Rotation::Deg270 => imageops::rotate270(&image),
    }
  }
}

/// 截取图像中心的正方形区域，缩放到 `size`，再按 `rotation` 旋转
pub fn crop_and_rescale(
  image: &RgbImage,
  size: u32,
  rotation: Rotation,
) -> Result<RgbImage, PreprocessError> {
  let (width, height) = image.dimensions();
  if width == 0 || height == 0 {
    return Err(PreprocessError::EmptyImage);
  }

  let min_dim = width.min(height);
  let x = (width - min_dim) / 2;
  let y = (height - min_dim) / 2;
  debug!(
    "裁剪 {}x{} 图像中心区域 ({}, {}) {}x{}，缩放到 {}",
    width, height, x, y, min_dim, min_dim, size
  );

  let cropped = imageops::crop_imm(image, x, y, min_dim, min_dim).to_image();
  let scaled = if min_dim == size {
    cropped
  } else {
    imageops::resize(&cropped, size, size, imageops::FilterType::Triangle)
  };

  Ok(rotation.apply(scaled))
}

/// 将任意尺寸的图像转换为模型输入帧
pub fn prepare_frame<const S: u32>(
  image: &RgbImage,
  rotation: Rotation,
) -> Result<RgbNhwcFrame<S, S>, PreprocessError> {
  let square = crop_and_rescale(image, S, rotation)?;
  Ok(RgbNhwcFrame::try_from(square)?)
}

/// YUV420 图像的亮度平面
#[derive(Debug, Clone, Copy)]
pub struct YuvPlane<'a> {
  pub data: &'a [u8],
  pub row_stride: usize,
  pub pixel_stride: usize,
}

/// YUV420 图像的两个色度平面，U、V 共用同一组步长
///
/// 半平面排布（NV12/NV21）时 `u`、`v` 指向同一块交错缓冲区的不同起点，
/// `pixel_stride` 为 2。
#[derive(Debug, Clone, Copy)]
pub struct ChromaPlanes<'a> {
  pub u: &'a [u8],
  pub v: &'a [u8],
  pub row_stride: usize,
  pub pixel_stride: usize,
}

/// 将 YUV420 图像转换为 RGB 图像
pub fn yuv420_to_rgb(
  width: u32,
  height: u32,
  y_plane: YuvPlane<'_>,
  chroma: ChromaPlanes<'_>,
) -> Result<RgbImage, PreprocessError> {
  if width == 0 || height == 0 {
    return Err(PreprocessError::EmptyImage);
  }

  let (w, h) = (width as usize, height as usize);
  let y_needed = plane_extent(y_plane.row_stride, y_plane.pixel_stride, h, w);
  let uv_needed = plane_extent(
    chroma.row_stride,
    chroma.pixel_stride,
    (h + 1) >> 1,
    (w + 1) >> 1,
  );
  check_plane("Y", y_plane.data, y_needed)?;
  check_plane("U", chroma.u, uv_needed)?;
  check_plane("V", chroma.v, uv_needed)?;

  let mut image = RgbImage::new(width, height);
  for (x, y, pixel) in image.enumerate_pixels_mut() {
    let (x, y) = (x as usize, y as usize);
    let uv_offset = chroma.row_stride * (y >> 1) + (x >> 1) * chroma.pixel_stride;
    *pixel = Rgb(yuv_to_rgb(
      y_plane.data[y_plane.row_stride * y + x * y_plane.pixel_stride],
      chroma.u[uv_offset],
      chroma.v[uv_offset],
    ));
  }

  Ok(image)
}

/// 覆盖 `rows` 行 `cols` 列所需的最小长度，溢出时返回 `None`
fn plane_extent(row_stride: usize, pixel_stride: usize, rows: usize, cols: usize) -> Option<usize> {
  row_stride
    .checked_mul(rows - 1)?
    .checked_add(pixel_stride.checked_mul(cols - 1)?)?
    .checked_add(1)
}

fn check_plane(
  plane: &'static str,
  data: &[u8],
  needed: Option<usize>,
) -> Result<(), PreprocessError> {
  match needed {
    Some(needed) if data.len() >= needed => Ok(()),
    _ => Err(PreprocessError::PlaneTooShort {
      plane,
      needed: needed.unwrap_or(usize::MAX),
      actual: data.len(),
    }),
  }
}

// BT.601 定点系数，放大 1024 倍
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
  let y = (y as i32 - 16).max(0);
  let u = u as i32 - 128;
  let v = v as i32 - 128;

  let r = 1192 * y + 1634 * v;
  let g = 1192 * y - 833 * v - 400 * u;
  let b = 1192 * y + 2066 * u;

  let narrow = |c: i32| ((c.clamp(0, YUV_MAX_CHANNEL_VALUE) >> 10) & 0xff) as u8;
  [narrow(r), narrow(g), narrow(b)]
}

// 该文件是 YoloTiny 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::info;

use crate::model::{DetectItem, DetectResult, WithLabel};

const LABEL_FONT_SIZE: f32 = 20.0;
const BOX_THICKNESS: i32 = 2;

/// 22 种区分度较高的颜色，按类别编号循环使用
pub const PALETTE: [[u8; 3]; 22] = [
  [230, 25, 75],
  [60, 180, 75],
  [255, 225, 25],
  [0, 130, 200],
  [245, 130, 48],
  [145, 30, 180],
  [70, 240, 240],
  [240, 50, 230],
  [210, 245, 60],
  [250, 190, 190],
  [0, 128, 128],
  [230, 190, 255],
  [170, 110, 40],
  [255, 250, 200],
  [128, 0, 0],
  [170, 255, 195],
  [128, 128, 0],
  [255, 215, 180],
  [0, 0, 128],
  [128, 128, 128],
  [255, 255, 255],
  [0, 0, 0],
];

pub fn color_for_index(index: usize) -> [u8; 3] {
  PALETTE[index % PALETTE.len()]
}

pub fn label_text<T: WithLabel>(kind: &T, score: f32) -> String {
  format!("{} ({:.2})", kind.to_label_str(), score)
}

/// 将归一化框映射到画布像素坐标
///
/// 模型看到的是画布中心的正方形：横向画布在 x 方向有偏移，
/// 纵向画布在 y 方向有偏移。
pub fn project_to_canvas(bbox: &[f32; 4], width: u32, height: u32) -> [f32; 4] {
  let (w, h) = (width as f32, height as f32);
  if w > h {
    let x_offset = (w - h) / 2.0;
    [
      bbox[0] * h + x_offset,
      bbox[1] * h,
      bbox[2] * h + x_offset,
      bbox[3] * h,
    ]
  } else {
    let y_offset = (h - w) / 2.0;
    [
      bbox[0] * w,
      bbox[1] * w + y_offset,
      bbox[2] * w,
      bbox[3] * w + y_offset,
    ]
  }
}

/// 标签文字的左上角：框内左上角，避开边框
pub fn label_origin(x_min: i32, y_min: i32) -> (i32, i32) {
  (x_min + BOX_THICKNESS, y_min + BOX_THICKNESS)
}

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("读取字体失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 没有字体时只绘制边框
pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
    }
  }
}

impl Draw {
  pub fn with_font_data(data: Vec<u8>) -> Result<Self, DrawError> {
    let font = FontVec::try_from_vec(data)?;
    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  pub fn with_font_file(path: &Path) -> Result<Self, DrawError> {
    info!("加载字体文件: {}", path.display());
    Self::with_font_data(std::fs::read(path)?)
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn draw_detections_on_image<T: WithLabel>(
    &self,
    image: &mut RgbImage,
    result: &DetectResult<T>,
  ) {
    for DetectItem { kind, score, bbox } in result.iter() {
      let color = color_for_index(kind.to_label_id() as usize);
      self.draw_bbox_with_label(image, bbox, kind, *score, color);
    }
  }

  fn draw_bbox_with_label<T: WithLabel>(
    &self,
    image: &mut RgbImage,
    bbox: &[f32; 4],
    kind: &T,
    score: f32,
    color: [u8; 3],
  ) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let [x0, y0, x1, y1] = project_to_canvas(bbox, image.width(), image.height());
    let x_min = (x0.floor() as i32).clamp(0, w - 1);
    let y_min = (y0.floor() as i32).clamp(0, h - 1);
    let x_max = (x1.ceil() as i32).clamp(0, w - 1);
    let y_max = (y1.ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 向内加粗边框
    for t in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, Rgb(color));
    }

    let Some(font) = self.font.as_ref() else {
      return;
    };

    // 文字与边框同色，无底色
    let (label_x, label_y) = label_origin(x_min, y_min);
    draw_text_mut(
      image,
      Rgb(color),
      label_x,
      label_y,
      PxScale::from(self.font_size),
      font,
      &label_text(kind, score),
    );
  }
}

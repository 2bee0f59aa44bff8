// 该文件是 YoloTiny 项目的一部分。
// src/model.rs - 模型
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

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;

  /// 释放模型占用的推理资源
  fn close(self) -> Result<(), Self::Error>
  where
    Self: Sized,
  {
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem<T>]>,
}

impl<T> Default for DetectResult<T> {
  fn default() -> Self {
    Self {
      items: Box::new([]),
    }
  }
}

impl<T> From<Vec<DetectItem<T>>> for DetectResult<T> {
  fn from(items: Vec<DetectItem<T>>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

impl<T> DetectResult<T> {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem<T>> {
    self.items.iter()
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Option<Self>;
}

/// 两个归一化边界框的交并比
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 按类别进行非极大值抑制，结果按分数降序排列
pub fn non_max_suppression<T: WithLabel>(
  mut items: Vec<DetectItem<T>>,
  iou_threshold: f32,
) -> Vec<DetectItem<T>> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<DetectItem<T>> = Vec::with_capacity(items.len());
  for item in items {
    let suppressed = kept.iter().any(|best| {
      best.kind.to_label_id() == item.kind.to_label_id()
        && iou(&best.bbox, &item.bbox) >= iou_threshold
    });
    if !suppressed {
      kept.push(item);
    }
  }

  kept
}

mod labels;
pub use self::labels::VocLabel;

pub mod session;
pub use self::session::{InferenceSession, SessionError, SessionOptions};

mod yolo_v1;
pub use self::yolo_v1::{
  YOLOV1_INPUT_SIZE, YOLOV1_OUTPUT_LEN, YoloV1Decoder, YoloV1DecodeError,
};

mod classifier;
pub use self::classifier::{
  ClassifierError, SharedClassifier, YoloTinyV1Builder, YoloTinyV1Classifier, YoloTinyV1Frame,
};

#[cfg(test)]
mod tests {
  use super::*;

  fn item(kind: VocLabel, score: f32, bbox: [f32; 4]) -> DetectItem<VocLabel> {
    DetectItem { kind, score, bbox }
  }

  #[test]
  fn iou_of_identical_and_disjoint_boxes() {
    let a = [0.0, 0.0, 0.5, 0.5];
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    assert_eq!(iou(&a, &[0.6, 0.6, 0.9, 0.9]), 0.0);
  }

  #[test]
  fn nms_suppresses_same_class_overlaps_only() {
    let items = vec![
      item(VocLabel::Dog, 0.4, [0.1, 0.1, 0.5, 0.5]),
      item(VocLabel::Dog, 0.9, [0.1, 0.1, 0.52, 0.5]),
      item(VocLabel::Cat, 0.3, [0.1, 0.1, 0.5, 0.5]),
    ];

    let kept = non_max_suppression(items, 0.5);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].kind, VocLabel::Dog);
    assert_eq!(kept[0].score, 0.9);
    assert_eq!(kept[1].kind, VocLabel::Cat);
  }

  #[test]
  fn empty_result_by_default() {
    let result = DetectResult::<VocLabel>::default();
    assert!(result.is_empty());
    assert_eq!(result.len(), 0);
  }
}

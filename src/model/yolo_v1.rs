// 该文件是 YoloTiny 项目的一部分。
// src/model/yolo_v1.rs - Tiny YOLO v1 输出解码
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

use thiserror::Error;
use tracing::debug;

use crate::model::{DetectItem, DetectResult, VocLabel, WithLabel, non_max_suppression};

pub const YOLOV1_INPUT_SIZE: u32 = 448;
const YOLOV1_GRID_SIZE: usize = 7;
const YOLOV1_CELLS: usize = YOLOV1_GRID_SIZE * YOLOV1_GRID_SIZE;
const YOLOV1_CLASS_NUM: usize = VocLabel::COUNT;
const YOLOV1_BOXES_PER_CELL: usize = 2;
const YOLOV1_CELL_DIM: f32 = 1.0 / YOLOV1_GRID_SIZE as f32;
const YOLOV1_SIZE_EXPONENT: f32 = 1.8;
const YOLOV1_DEFAULT_THRESHOLD: f32 = 0.1;

// 输出张量依次为：类别概率、框置信度、框坐标
const YOLOV1_PROBS_LEN: usize = YOLOV1_CELLS * YOLOV1_CLASS_NUM;
const YOLOV1_CONFS_LEN: usize = YOLOV1_CELLS * YOLOV1_BOXES_PER_CELL;
const YOLOV1_COORDS_LEN: usize = YOLOV1_CELLS * YOLOV1_BOXES_PER_CELL * 4;
pub const YOLOV1_OUTPUT_LEN: usize = YOLOV1_PROBS_LEN + YOLOV1_CONFS_LEN + YOLOV1_COORDS_LEN;

#[derive(Error, Debug, PartialEq)]
pub enum YoloV1DecodeError {
  #[error("输出长度不匹配: 期望 {expected}, 实际 {actual}")]
  OutputLength { expected: usize, actual: usize },
  #[error("阈值超出范围 [0, 1]: {0}")]
  Threshold(f32),
}

/// 将 7x7x30 的输出张量解码为检测框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YoloV1Decoder {
  threshold: f32,
  nms_threshold: Option<f32>,
}

impl Default for YoloV1Decoder {
  fn default() -> Self {
    Self {
      threshold: YOLOV1_DEFAULT_THRESHOLD,
      nms_threshold: None,
    }
  }
}

impl YoloV1Decoder {
  pub fn new(threshold: f32, nms_threshold: Option<f32>) -> Result<Self, YoloV1DecodeError> {
    check_unit(threshold)?;
    if let Some(nms) = nms_threshold {
      check_unit(nms)?;
    }
    Ok(Self {
      threshold,
      nms_threshold,
    })
  }

  pub fn threshold(&self) -> f32 {
    self.threshold
  }

  pub fn nms_threshold(&self) -> Option<f32> {
    self.nms_threshold
  }

  pub fn decode(&self, output: &[f32]) -> Result<DetectResult<VocLabel>, YoloV1DecodeError> {
    if output.len() != YOLOV1_OUTPUT_LEN {
      return Err(YoloV1DecodeError::OutputLength {
        expected: YOLOV1_OUTPUT_LEN,
        actual: output.len(),
      });
    }

    let (probs, rest) = output.split_at(YOLOV1_PROBS_LEN);
    let (confs, coords) = rest.split_at(YOLOV1_CONFS_LEN);

    let mut items = Vec::new();
    for cell in 0..YOLOV1_CELLS {
      let class_probs = &probs[cell * YOLOV1_CLASS_NUM..(cell + 1) * YOLOV1_CLASS_NUM];
      let (class_id, class_prob) = arg_max(class_probs);
      let Some(kind) = VocLabel::from_label_id(class_id as u32) else {
        continue;
      };

      let row = cell / YOLOV1_GRID_SIZE;
      let column = cell % YOLOV1_GRID_SIZE;

      for b in 0..YOLOV1_BOXES_PER_CELL {
        let score = confs[cell * YOLOV1_BOXES_PER_CELL + b] * class_prob;
        if score < self.threshold {
          continue;
        }

        let base = (cell * YOLOV1_BOXES_PER_CELL + b) * 4;
        let x = (column as f32 + coords[base]) * YOLOV1_CELL_DIM;
        let y = (row as f32 + coords[base + 1]) * YOLOV1_CELL_DIM;
        let w = coords[base + 2].max(0.0).powf(YOLOV1_SIZE_EXPONENT);
        let h = coords[base + 3].max(0.0).powf(YOLOV1_SIZE_EXPONENT);

        items.push(DetectItem {
          kind,
          score,
          bbox: [
            (x - w / 2.0).clamp(0.0, 1.0),
            (y - h / 2.0).clamp(0.0, 1.0),
            (x + w / 2.0).clamp(0.0, 1.0),
            (y + h / 2.0).clamp(0.0, 1.0),
          ],
        });
      }
    }

    if let Some(nms) = self.nms_threshold {
      let before = items.len();
      items = non_max_suppression(items, nms);
      debug!("NMS: {} -> {}", before, items.len());
    }

    debug!("检测到 {} 个物体", items.len());
    Ok(DetectResult::from(items))
  }
}

fn check_unit(value: f32) -> Result<(), YoloV1DecodeError> {
  if (0.0..=1.0).contains(&value) {
    Ok(())
  } else {
    Err(YoloV1DecodeError::Threshold(value))
  }
}

// 相等时取第一个最大值
fn arg_max(values: &[f32]) -> (usize, f32) {
  let mut best = (0usize, f32::MIN);
  for (idx, &value) in values.iter().enumerate() {
    if value > best.1 {
      best = (idx, value);
    }
  }
  best
}

#[cfg(test)]
mod tests {
  use super::*;

  fn set_box(out: &mut [f32], cell: usize, b: usize, conf: f32, coord: [f32; 4]) {
    out[YOLOV1_PROBS_LEN + cell * YOLOV1_BOXES_PER_CELL + b] = conf;
    let base = YOLOV1_PROBS_LEN + YOLOV1_CONFS_LEN + (cell * YOLOV1_BOXES_PER_CELL + b) * 4;
    out[base..base + 4].copy_from_slice(&coord);
  }

  fn set_prob(out: &mut [f32], cell: usize, class: usize, prob: f32) {
    out[cell * YOLOV1_CLASS_NUM + class] = prob;
  }

  #[test]
  fn output_layout_is_1470() {
    assert_eq!(YOLOV1_OUTPUT_LEN, 1470);
  }

  #[test]
  fn rejects_wrong_output_length() {
    let decoder = YoloV1Decoder::default();
    assert_eq!(
      decoder.decode(&[0.0; 10]),
      Err(YoloV1DecodeError::OutputLength {
        expected: 1470,
        actual: 10
      })
    );
  }

  #[test]
  fn zero_output_yields_no_boxes() {
    let decoder = YoloV1Decoder::default();
    assert!(decoder.decode(&[0.0; YOLOV1_OUTPUT_LEN]).unwrap().is_empty());
  }

  #[test]
  fn decodes_single_box_in_cell() {
    let mut out = vec![0.0f32; YOLOV1_OUTPUT_LEN];
    // 第 1 行第 3 列
    let cell = 7 + 3;
    set_prob(&mut out, cell, 11, 0.8);
    set_prob(&mut out, cell, 2, 0.3);
    set_box(&mut out, cell, 1, 0.5, [0.5, 0.5, 1.0, 1.0]);

    let result = YoloV1Decoder::default().decode(&out).unwrap();
    assert_eq!(result.len(), 1);

    let item = &result.items[0];
    assert_eq!(item.kind, VocLabel::Dog);
    assert!((item.score - 0.4).abs() < 1e-6);

    let cx = 3.5 / 7.0;
    let cy = 1.5 / 7.0;
    let expected = [cx - 0.5, (cy - 0.5f32).max(0.0), cx + 0.5, cy + 0.5];
    for (got, want) in item.bbox.iter().zip(expected) {
      assert!((got - want.clamp(0.0, 1.0)).abs() < 1e-5, "{got} != {want}");
    }
  }

  #[test]
  fn box_size_uses_exponent() {
    let mut out = vec![0.0f32; YOLOV1_OUTPUT_LEN];
    let cell = 24; // 网格中心
    set_prob(&mut out, cell, 0, 1.0);
    set_box(&mut out, cell, 0, 1.0, [0.5, 0.5, 0.25, 0.5]);

    let result = YoloV1Decoder::default().decode(&out).unwrap();
    let bbox = result.items[0].bbox;
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    assert!((width - 0.25f32.powf(1.8)).abs() < 1e-5);
    assert!((height - 0.5f32.powf(1.8)).abs() < 1e-5);
  }

  #[test]
  fn negative_size_collapses_to_point() {
    let mut out = vec![0.0f32; YOLOV1_OUTPUT_LEN];
    set_prob(&mut out, 0, 0, 1.0);
    set_box(&mut out, 0, 0, 1.0, [0.5, 0.5, -0.3, 0.2]);

    let result = YoloV1Decoder::default().decode(&out).unwrap();
    let bbox = result.items[0].bbox;
    assert!(bbox.iter().all(|v| v.is_finite()));
    assert_eq!(bbox[0], bbox[2]);
  }

  #[test]
  fn threshold_is_inclusive() {
    let mut out = vec![0.0f32; YOLOV1_OUTPUT_LEN];
    set_prob(&mut out, 5, 4, 0.5);
    set_box(&mut out, 5, 0, 0.5, [0.5, 0.5, 0.1, 0.1]);
    set_box(&mut out, 5, 1, 0.49, [0.5, 0.5, 0.1, 0.1]);

    let decoder = YoloV1Decoder::new(0.25, None).unwrap();
    let result = decoder.decode(&out).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].kind, VocLabel::Bottle);
  }

  #[test]
  fn boxes_follow_cell_then_box_order() {
    let mut out = vec![0.0f32; YOLOV1_OUTPUT_LEN];
    set_prob(&mut out, 2, 14, 1.0);
    set_prob(&mut out, 40, 6, 1.0);
    set_box(&mut out, 40, 0, 0.9, [0.1, 0.1, 0.2, 0.2]);
    set_box(&mut out, 2, 1, 0.6, [0.1, 0.1, 0.2, 0.2]);
    set_box(&mut out, 2, 0, 0.7, [0.1, 0.1, 0.2, 0.2]);

    let result = YoloV1Decoder::default().decode(&out).unwrap();
    let kinds: Vec<_> = result.iter().map(|i| (i.kind, i.score)).collect();
    assert_eq!(
      kinds,
      vec![
        (VocLabel::Person, 0.7),
        (VocLabel::Person, 0.6),
        (VocLabel::Car, 0.9)
      ]
    );
  }

  #[test]
  fn nms_merges_duplicate_boxes() {
    let mut out = vec![0.0f32; YOLOV1_OUTPUT_LEN];
    set_prob(&mut out, 24, 7, 1.0);
    set_box(&mut out, 24, 0, 0.9, [0.5, 0.5, 0.6, 0.6]);
    set_box(&mut out, 24, 1, 0.8, [0.5, 0.5, 0.6, 0.6]);

    let plain = YoloV1Decoder::default().decode(&out).unwrap();
    assert_eq!(plain.len(), 2);

    let merged = YoloV1Decoder::new(0.1, Some(0.5)).unwrap().decode(&out).unwrap();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged.items[0].score, 0.9);
  }

  #[test]
  fn invalid_thresholds_are_rejected() {
    assert_eq!(
      YoloV1Decoder::new(1.5, None),
      Err(YoloV1DecodeError::Threshold(1.5))
    );
    assert_eq!(
      YoloV1Decoder::new(0.2, Some(-0.1)),
      Err(YoloV1DecodeError::Threshold(-0.1))
    );
  }
}

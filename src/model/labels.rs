// 该文件是 YoloTiny 项目的一部分。
// src/model/labels.rs - Pascal VOC 类别标签
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

use crate::model::WithLabel;

/// Pascal VOC 数据集的 20 个类别，顺序与模型输出一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VocLabel {
  Aeroplane,
  Bicycle,
  Bird,
  Boat,
  Bottle,
  Bus,
  Car,
  Cat,
  Chair,
  Cow,
  DiningTable,
  Dog,
  Horse,
  Motorbike,
  Person,
  PottedPlant,
  Sheep,
  Sofa,
  Train,
  TvMonitor,
}

impl VocLabel {
  pub const COUNT: usize = 20;

  pub const ALL: [VocLabel; Self::COUNT] = [
    VocLabel::Aeroplane,
    VocLabel::Bicycle,
    VocLabel::Bird,
    VocLabel::Boat,
    VocLabel::Bottle,
    VocLabel::Bus,
    VocLabel::Car,
    VocLabel::Cat,
    VocLabel::Chair,
    VocLabel::Cow,
    VocLabel::DiningTable,
    VocLabel::Dog,
    VocLabel::Horse,
    VocLabel::Motorbike,
    VocLabel::Person,
    VocLabel::PottedPlant,
    VocLabel::Sheep,
    VocLabel::Sofa,
    VocLabel::Train,
    VocLabel::TvMonitor,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      VocLabel::Aeroplane => "aeroplane",
      VocLabel::Bicycle => "bicycle",
      VocLabel::Bird => "bird",
      VocLabel::Boat => "boat",
      VocLabel::Bottle => "bottle",
      VocLabel::Bus => "bus",
      VocLabel::Car => "car",
      VocLabel::Cat => "cat",
      VocLabel::Chair => "chair",
      VocLabel::Cow => "cow",
      VocLabel::DiningTable => "diningtable",
      VocLabel::Dog => "dog",
      VocLabel::Horse => "horse",
      VocLabel::Motorbike => "motorbike",
      VocLabel::Person => "person",
      VocLabel::PottedPlant => "pottedplant",
      VocLabel::Sheep => "sheep",
      VocLabel::Sofa => "sofa",
      VocLabel::Train => "train",
      VocLabel::TvMonitor => "tvmonitor",
    }
  }
}

impl std::fmt::Display for VocLabel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl WithLabel for VocLabel {
  fn to_label_str(&self) -> String {
    self.as_str().to_string()
  }

  fn to_label_id(&self) -> u32 {
    *self as u32
  }

  fn from_label_id(id: u32) -> Option<Self> {
    Self::ALL.get(id as usize).copied()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ids_follow_declaration_order() {
    for (id, label) in VocLabel::ALL.iter().enumerate() {
      assert_eq!(label.to_label_id(), id as u32);
      assert_eq!(VocLabel::from_label_id(id as u32), Some(*label));
    }
    assert_eq!(VocLabel::from_label_id(20), None);
  }

  #[test]
  fn label_strings() {
    assert_eq!(VocLabel::Aeroplane.to_label_str(), "aeroplane");
    assert_eq!(VocLabel::TvMonitor.to_string(), "tvmonitor");
  }
}

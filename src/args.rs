// 该文件是 YoloTiny 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::{Parser, ValueEnum};
use url::Url;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
  /// 只处理第一帧
  Oneshot,
  /// 对第一帧重复推理并统计平均耗时
  Repeatshot,
  /// 依次处理所有帧
  Continuous,
  /// 后台监听器处理，忙碌时丢帧
  Listener,
}

/// YoloTiny 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 yolov1:///models/yolo-tiny.onnx?threshold=0.1
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源
  /// 支持格式:
  /// - 图片: image:///path/to/image.jpg?rotation=90
  /// - 目录: folder:///path/to/images
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出路径
  /// 支持格式:
  /// - 图片: image:///path/to/out.png?font=/path/to/font.ttf
  /// - 目录: folder:///path/to/records?record=name&always
  /// - JSON: json:///path/to/result.jsonl
  /// - 日志: log:console
  #[arg(long, value_name = "OUTPUT", default_value = "log:console")]
  pub output: Url,

  /// 任务类型
  #[arg(long, value_enum, default_value_t = TaskKind::Continuous)]
  pub task: TaskKind,

  /// 最大处理帧数，仅对 continuous 任务有效
  #[arg(long, value_name = "COUNT")]
  pub frame_number: Option<usize>,

  /// 重复推理次数，仅对 repeatshot 任务有效
  #[arg(long, default_value_t = 1000, value_name = "COUNT")]
  pub repeat: usize,

  /// 送帧间隔（毫秒），仅对 listener 任务有效
  #[arg(long, default_value_t = 33, value_name = "MILLIS")]
  pub interval: u64,
}

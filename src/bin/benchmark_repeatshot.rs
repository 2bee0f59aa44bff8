// 该文件是 YoloTiny 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复推理性能测试
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use tracing::info;
use yolotiny::{
  FromUrl,
  model::{YOLOV1_INPUT_SIZE, YoloTinyV1Builder, session::OrtSession},
  output::LogOutput,
  task::{RepeatShotTask, Task},
};

/// YoloTiny 推理耗时测试
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型地址
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 重复次数
  #[arg(long, default_value_t = 100, value_name = "COUNT")]
  pub repeat: usize,
  /// 不计入平均值的预热次数
  #[arg(long, default_value_t = 2, value_name = "COUNT")]
  pub warm_up: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("重复次数: {} (预热 {})", args.repeat, args.warm_up);

  let input_image = yolotiny::input::InputWrapper::from_url(&args.input)?;
  let model = YoloTinyV1Builder::from_url(&args.model)?.load_model::<OrtSession>()?;

  RepeatShotTask::default()
    .with_repeat(args.repeat)
    .with_warm_up(args.warm_up)
    .run_task(input_image.into_nhwc::<YOLOV1_INPUT_SIZE>(), model, LogOutput)?;

  Ok(())
}

// 该文件是 YoloTiny 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use yolotiny::{
  FromUrl,
  input::InputWrapper,
  model::{YOLOV1_INPUT_SIZE, YoloTinyV1Builder, session::OrtSession},
  output::OutputWrapper,
  task::{ContinuousTask, ListenerTask, OneShotTask, RepeatShotTask, Task},
};

use args::{Args, TaskKind};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!("任务类型: {:?}", args.task);

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let classifier = YoloTinyV1Builder::from_url(&args.model)?.load_model::<OrtSession>()?;

  match args.task {
    TaskKind::Oneshot => {
      OneShotTask.run_task(input.into_nhwc::<YOLOV1_INPUT_SIZE>(), classifier, output)?
    }
    TaskKind::Repeatshot => RepeatShotTask::default().with_repeat(args.repeat).run_task(
      input.into_nhwc::<YOLOV1_INPUT_SIZE>(),
      classifier,
      output,
    )?,
    TaskKind::Continuous => ContinuousTask::default()
      .with_frame_number(args.frame_number)
      .run_task(input.into_nhwc::<YOLOV1_INPUT_SIZE>(), classifier, output)?,
    TaskKind::Listener => {
      let rotation = input.rotation();
      ListenerTask::default()
        .with_rotation(rotation)
        .with_interval(Duration::from_millis(args.interval))
        .run_task(input, classifier.into_shared(), output)?
    }
  }

  Ok(())
}

// 该文件是 YoloTiny 项目的一部分。
// src/task.rs - 推理任务
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

use std::{
  thread,
  time::{Duration, Instant},
};

use image::RgbImage;
use tracing::{error, info, warn};

use crate::{
  listener::ClassificationListener,
  model::{DetectResult, InferenceSession, Model, SharedClassifier, VocLabel, YoloTinyV1Frame},
  output::Render,
  preprocess::Rotation,
};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    let elapsed = now.elapsed();
    info!("推理完成，耗时: {:.2?}", elapsed);
    output.render_result(&frame, &result)?;
    info!("渲染完成，总耗时: {:.2?}", now.elapsed());

    model.close()?;
    Ok(())
  }
}

/// 对同一帧重复推理，统计平均耗时
pub struct RepeatShotTask {
  repeat: usize,
  warm_up: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self {
      repeat: 1000,
      warm_up: 2,
    }
  }
}

impl RepeatShotTask {
  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat.max(1);
    self
  }

  /// 前 `warm_up` 次推理不计入平均值
  pub fn with_warm_up(mut self, warm_up: usize) -> Self {
    self.warm_up = warm_up;
    self
  }
}

/// 去掉预热轮次后的平均耗时；样本不足时使用全部样本
pub fn average_after_warm_up(times: &[Duration], warm_up: usize) -> Option<Duration> {
  let measured = if times.len() > warm_up {
    &times[warm_up..]
  } else {
    times
  };
  if measured.is_empty() {
    return None;
  }
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let mut times = Vec::with_capacity(self.repeat);
    for i in 0..self.repeat {
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      info!("({})渲染完成，耗时: {:.2?}", i, now.elapsed());
      times.push(elapsed);
    }

    if let Some(average) = average_after_warm_up(&times, self.warm_up) {
      warn!("平均推理时间: {:.2?}", average);
    }

    model.close()?;
    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    match ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    }) {
      Ok(()) => {}
      // 进程内只能注册一次，之后的任务不响应中断
      Err(ctrlc::Error::MultipleHandlers) => warn!("中断处理器已注册，本任务不响应中断"),
      Err(e) => return Err(e.into()),
    }

    let mut frame_index = 0usize;
    let mut now = Instant::now();
    for frame in input {
      frame_index = frame_index.wrapping_add(1);
      info!("处理第 {} 帧图像", frame_index);
      let result = model.infer(&frame)?;
      let elapsed_a = now.elapsed();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      now = Instant::now();
      info!("推理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    model.close()?;
    info!("任务完成，退出");
    Ok(())
  }
}

/// 模拟相机按固定间隔送帧，由后台监听器处理
///
/// 监听器忙碌时到达的帧会被丢弃。
#[derive(Debug)]
pub struct ListenerTask {
  rotation: Rotation,
  interval: Duration,
}

impl Default for ListenerTask {
  fn default() -> Self {
    Self {
      rotation: Rotation::Deg0,
      interval: Duration::from_millis(33),
    }
  }
}

impl ListenerTask {
  pub fn with_rotation(mut self, rotation: Rotation) -> Self {
    self.rotation = rotation;
    self
  }

  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }
}

impl<I, S, O, RE> Task<I, SharedClassifier<S>, O> for ListenerTask
where
  I: Iterator<Item = RgbImage>,
  S: InferenceSession + Send + 'static,
  O: Render<YoloTinyV1Frame, DetectResult<VocLabel>, Error = RE> + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: SharedClassifier<S>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let mut listener = ClassificationListener::new(model.clone(), move |frame, result| {
      if let Err(e) = output.render_result(frame, &result) {
        error!("渲染失败: {}", e);
      }
    })
    .with_fps_callback(|fps| info!("FPS: {:.2}", fps));
    listener.prepare()?;

    let (mut submitted, mut dropped) = (0usize, 0usize);
    for image in input {
      if listener.submit(image, self.rotation) {
        submitted += 1;
      } else {
        dropped += 1;
      }
      thread::sleep(self.interval);
    }

    // 已提交的帧会在工作线程退出前处理完
    listener.shutdown()?;
    info!("共提交 {} 帧，丢弃 {} 帧", submitted, dropped);

    model.close()?;
    info!("任务完成，退出");
    Ok(())
  }
}

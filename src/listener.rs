// 该文件是 YoloTiny 项目的一部分。
// src/listener.rs - 后台分类监听器
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  model::{
    ClassifierError, DetectResult, InferenceSession, SharedClassifier, VocLabel,
    YOLOV1_INPUT_SIZE, YoloTinyV1Frame,
  },
  preprocess::{Rotation, prepare_frame},
};

pub type ResultCallback = Box<dyn FnMut(&YoloTinyV1Frame, DetectResult<VocLabel>) + Send + 'static>;
pub type FpsCallback = Box<dyn FnMut(f64) + Send + 'static>;

const FPS_WINDOW: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum ListenerError {
  #[error("监听器已经启动")]
  AlreadyRunning,
  #[error("回调已随异常退出的工作线程丢失")]
  CallbacksLost,
  #[error("无法创建工作线程: {0}")]
  Spawn(#[from] std::io::Error),
  #[error("工作线程异常退出")]
  WorkerPanicked,
}

struct Job {
  image: RgbImage,
  rotation: Rotation,
}

/// 工作线程退出时交还，供下一次 `prepare` 使用
struct Callbacks {
  on_result: ResultCallback,
  on_fps: Option<FpsCallback>,
}

/// 在后台线程中对提交的图像进行分类
///
/// 同一时刻最多只有一帧在处理，忙碌时提交的帧会被直接丢弃。
/// 结果回调收到的是实际送入模型的帧与检测结果。
pub struct ClassificationListener<S> {
  classifier: SharedClassifier<S>,
  processing: Arc<AtomicBool>,
  callbacks: Option<Callbacks>,
  sender: Option<Sender<Job>>,
  worker: Option<JoinHandle<Callbacks>>,
}

impl<S: InferenceSession + Send + 'static> ClassificationListener<S> {
  pub fn new(
    classifier: SharedClassifier<S>,
    on_result: impl FnMut(&YoloTinyV1Frame, DetectResult<VocLabel>) + Send + 'static,
  ) -> Self {
    Self {
      classifier,
      processing: Arc::new(AtomicBool::new(false)),
      callbacks: Some(Callbacks {
        on_result: Box::new(on_result),
        on_fps: None,
      }),
      sender: None,
      worker: None,
    }
  }

  pub fn with_fps_callback(mut self, on_fps: impl FnMut(f64) + Send + 'static) -> Self {
    if let Some(callbacks) = self.callbacks.as_mut() {
      callbacks.on_fps = Some(Box::new(on_fps));
    }
    self
  }

  pub fn classifier(&self) -> &SharedClassifier<S> {
    &self.classifier
  }

  pub fn is_running(&self) -> bool {
    self.worker.is_some()
  }

  pub fn is_processing(&self) -> bool {
    self.processing.load(Ordering::Acquire)
  }

  /// 启动工作线程，`shutdown` 之后可以再次调用
  pub fn prepare(&mut self) -> Result<(), ListenerError> {
    if self.worker.is_some() {
      return Err(ListenerError::AlreadyRunning);
    }
    let callbacks = self.callbacks.take().ok_or(ListenerError::CallbacksLost)?;

    self.processing.store(false, Ordering::Release);
    let (sender, receiver) = mpsc::channel();
    let worker = Worker {
      classifier: self.classifier.clone(),
      processing: Arc::clone(&self.processing),
      callbacks,
    };
    let handle = std::thread::Builder::new()
      .name("yolotiny-listener".to_string())
      .spawn(move || worker.run(receiver))?;

    self.sender = Some(sender);
    self.worker = Some(handle);
    info!("分类监听器已启动");
    Ok(())
  }

  /// 提交一帧图像；上一帧仍在处理或监听器未启动时返回 `false`
  pub fn submit(&self, image: RgbImage, rotation: Rotation) -> bool {
    let Some(sender) = self.sender.as_ref() else {
      warn!("分类监听器未启动，丢弃帧");
      return false;
    };

    if self
      .processing
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      debug!("上一帧仍在处理，丢弃帧");
      return false;
    }

    if sender.send(Job { image, rotation }).is_err() {
      error!("工作线程已退出，丢弃帧");
      self.processing.store(false, Ordering::Release);
      return false;
    }
    true
  }

  /// 停止工作线程并等待其退出，分类器保持打开
  pub fn shutdown(&mut self) -> Result<(), ListenerError> {
    self.sender = None;
    let Some(handle) = self.worker.take() else {
      return Ok(());
    };
    let callbacks = handle.join().map_err(|_| ListenerError::WorkerPanicked)?;
    self.callbacks = Some(callbacks);
    info!("分类监听器已停止");
    Ok(())
  }
}

impl<S> Drop for ClassificationListener<S> {
  fn drop(&mut self) {
    self.sender = None;
    if let Some(handle) = self.worker.take()
      && handle.join().is_err()
    {
      error!("工作线程异常退出");
    }
  }
}

struct Worker<S> {
  classifier: SharedClassifier<S>,
  processing: Arc<AtomicBool>,
  callbacks: Callbacks,
}

impl<S: InferenceSession> Worker<S> {
  fn run(mut self, receiver: Receiver<Job>) -> Callbacks {
    let mut window_start = Instant::now();
    let mut frames = 0u32;

    for Job { image, rotation } in receiver {
      self.process(&image, rotation, &mut frames);

      let elapsed = window_start.elapsed();
      if elapsed >= FPS_WINDOW {
        let fps = frames as f64 / elapsed.as_secs_f64();
        debug!("FPS: {:.2}", fps);
        if let Some(on_fps) = self.callbacks.on_fps.as_mut() {
          on_fps(fps);
        }
        window_start = Instant::now();
        frames = 0;
      }

      // 回调返回后才接受下一帧
      self.processing.store(false, Ordering::Release);
    }

    self.callbacks
  }

  fn process(&mut self, image: &RgbImage, rotation: Rotation, frames: &mut u32) {
    let frame = match prepare_frame::<YOLOV1_INPUT_SIZE>(image, rotation) {
      Ok(frame) => frame,
      Err(e) => {
        error!("图像预处理失败，跳过: {}", e);
        return;
      }
    };

    match self.classifier.classify_image(&frame) {
      Ok(result) => {
        (self.callbacks.on_result)(&frame, result);
        *frames += 1;
      }
      Err(ClassifierError::Paused) => debug!("分类器已暂停，跳过帧"),
      Err(e) => error!("分类失败: {}", e),
    }
  }
}

// 该文件是 YoloTiny 项目的一部分。
// src/model/classifier.rs - Tiny YOLO v1 分类器
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

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  model::{
    DetectResult, InferenceSession, Model, SessionError, SessionOptions, VocLabel,
    YOLOV1_INPUT_SIZE, YoloV1DecodeError, YoloV1Decoder,
  },
  utils::{UrlParamError, query_parse, query_value, url_path},
};

/// 模型输入帧，448x448 RGB
pub type YoloTinyV1Frame = RgbNhwcFrame<YOLOV1_INPUT_SIZE, YOLOV1_INPUT_SIZE>;

const YOLOV1_INPUT_SHAPE: [usize; 4] = [1, YOLOV1_INPUT_SIZE as usize, YOLOV1_INPUT_SIZE as usize, 3];

#[derive(Error, Debug)]
pub enum ClassifierError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("配置无效: {0}")]
  InvalidConfig(String),
  #[error("推理会话错误: {0}")]
  Session(#[from] SessionError),
  #[error("输出解码错误: {0}")]
  Decode(#[from] YoloV1DecodeError),
  #[error("分类器已暂停")]
  Paused,
  #[error("分类器已关闭")]
  Closed,
  #[error("分类器锁已损坏")]
  Poisoned,
}

impl From<UrlParamError> for ClassifierError {
  fn from(err: UrlParamError) -> Self {
    ClassifierError::InvalidConfig(err.to_string())
  }
}

/// 未加载状态：只保存模型路径与配置
#[derive(Debug, Clone)]
pub struct YoloTinyV1Builder {
  model_path: PathBuf,
  options: SessionOptions,
  threshold: f32,
  nms_threshold: Option<f32>,
}

impl FromUrlWithScheme for YoloTinyV1Builder {
  const SCHEME: &'static str = "yolov1";
}

impl FromUrl for YoloTinyV1Builder {
  type Error = ClassifierError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ClassifierError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let defaults = YoloV1Decoder::default();
    let mut builder = YoloTinyV1Builder::new(url_path(url)?)
      .threshold(query_parse(url, "threshold")?.unwrap_or(defaults.threshold()))
      .nms_threshold(query_parse(url, "nms")?);

    if let Some(name) = query_value(url, "input") {
      builder = builder.input_name(name);
    }
    if let Some(name) = query_value(url, "output") {
      builder = builder.output_name(name);
    }
    if let Some(threads) = query_parse(url, "threads")? {
      builder = builder.intra_threads(threads);
    }

    Ok(builder)
  }
}

impl YoloTinyV1Builder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    let defaults = YoloV1Decoder::default();
    Self {
      model_path: model_path.into(),
      options: SessionOptions::default(),
      threshold: defaults.threshold(),
      nms_threshold: defaults.nms_threshold(),
    }
  }

  pub fn threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn nms_threshold(mut self, nms_threshold: Option<f32>) -> Self {
    self.nms_threshold = nms_threshold;
    self
  }

  pub fn input_name(mut self, name: impl Into<String>) -> Self {
    self.options.input_name = name.into();
    self
  }

  pub fn output_name(mut self, name: impl Into<String>) -> Self {
    self.options.output_name = name.into();
    self
  }

  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.options.intra_threads = Some(threads);
    self
  }

  pub fn model_path(&self) -> &std::path::Path {
    &self.model_path
  }

  pub fn options(&self) -> &SessionOptions {
    &self.options
  }

  fn decoder(&self) -> Result<YoloV1Decoder, ClassifierError> {
    if self.options.intra_threads == Some(0) {
      return Err(ClassifierError::InvalidConfig("线程数必须大于 0".to_string()));
    }
    YoloV1Decoder::new(self.threshold, self.nms_threshold)
      .map_err(|e| ClassifierError::InvalidConfig(e.to_string()))
  }

  /// 读取模型文件并创建推理会话
  pub fn load_model<S: InferenceSession>(self) -> Result<YoloTinyV1Classifier<S>, ClassifierError> {
    let decoder = self.decoder()?;

    info!("加载模型文件: {}", self.model_path.display());
    let model_data = std::fs::read(&self.model_path).map_err(|e| {
      error!("无法读取模型文件 {}: {}", self.model_path.display(), e);
      e
    })?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建推理会话");
    let session = S::open(&model_data, &self.options)?;
    info!("模型加载完成");

    Ok(YoloTinyV1Classifier::new(session, decoder))
  }

  /// 使用已经打开的会话
  pub fn load_with_session<S: InferenceSession>(
    self,
    session: S,
  ) -> Result<YoloTinyV1Classifier<S>, ClassifierError> {
    let decoder = self.decoder()?;
    Ok(YoloTinyV1Classifier::new(session, decoder))
  }
}

/// 已加载状态：持有推理会话与最近一次的检测结果
pub struct YoloTinyV1Classifier<S> {
  session: S,
  decoder: YoloV1Decoder,
  input: Box<[f32]>,
  boxes: DetectResult<VocLabel>,
  paused: bool,
}

impl<S: InferenceSession> YoloTinyV1Classifier<S> {
  fn new(session: S, decoder: YoloV1Decoder) -> Self {
    let input_len = YOLOV1_INPUT_SHAPE.iter().product::<usize>();
    Self {
      session,
      decoder,
      input: vec![0f32; input_len].into_boxed_slice(),
      boxes: DetectResult::default(),
      paused: false,
    }
  }

  /// 模型输入的边长
  pub fn input_size(&self) -> u32 {
    YOLOV1_INPUT_SIZE
  }

  pub fn decoder(&self) -> &YoloV1Decoder {
    &self.decoder
  }

  /// 对一帧图像进行推理，结果通过 [`Self::result`] 读取
  ///
  /// 暂停时返回 [`ClassifierError::Paused`]，上一次的结果保持不变；
  /// 其余失败会清空结果。
  pub fn classify_image(&mut self, frame: &YoloTinyV1Frame) -> Result<(), ClassifierError> {
    if self.paused {
      return Err(ClassifierError::Paused);
    }

    self.boxes = DetectResult::default();
    frame.write_signed_unit(&mut self.input);

    let started = Instant::now();
    let output = self.session.run(&self.input, YOLOV1_INPUT_SHAPE)?;
    info!("推理完成，耗时: {:.2?}", started.elapsed());

    self.boxes = self.decoder.decode(&output)?;
    Ok(())
  }

  pub fn result(&self) -> &DetectResult<VocLabel> {
    &self.boxes
  }

  pub fn pause(&mut self) {
    self.paused = true;
  }

  pub fn unpause(&mut self) {
    self.paused = false;
  }

  pub fn is_paused(&self) -> bool {
    self.paused
  }

  /// 释放推理会话
  pub fn close(self) -> Result<(), ClassifierError> {
    info!("关闭推理会话");
    self.session.close()?;
    Ok(())
  }

  pub fn into_shared(self) -> SharedClassifier<S> {
    SharedClassifier {
      inner: Arc::new(Mutex::new(Some(self))),
      paused: Arc::new(AtomicBool::new(false)),
    }
  }
}

impl<S: InferenceSession> Model for YoloTinyV1Classifier<S> {
  type Input = YoloTinyV1Frame;
  type Output = DetectResult<VocLabel>;
  type Error = ClassifierError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.classify_image(input)?;
    Ok(self.boxes.clone())
  }

  fn close(self) -> Result<(), Self::Error> {
    YoloTinyV1Classifier::close(self)
  }
}

/// 多线程共享的分类器
///
/// 推理通过互斥锁串行执行；任一持有者关闭后，其余调用均返回
/// [`ClassifierError::Closed`]。
pub struct SharedClassifier<S> {
  inner: Arc<Mutex<Option<YoloTinyV1Classifier<S>>>>,
  paused: Arc<AtomicBool>,
}

impl<S> Clone for SharedClassifier<S> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      paused: Arc::clone(&self.paused),
    }
  }
}

impl<S: InferenceSession> SharedClassifier<S> {
  fn lock(&self) -> Result<MutexGuard<'_, Option<YoloTinyV1Classifier<S>>>, ClassifierError> {
    self.inner.lock().map_err(|_| ClassifierError::Poisoned)
  }

  pub fn classify_image(
    &self,
    frame: &YoloTinyV1Frame,
  ) -> Result<DetectResult<VocLabel>, ClassifierError> {
    if self.paused.load(Ordering::Acquire) {
      return Err(ClassifierError::Paused);
    }

    let mut guard = self.lock()?;
    // 等锁期间可能已被暂停
    if self.paused.load(Ordering::Acquire) {
      return Err(ClassifierError::Paused);
    }
    let classifier = guard.as_mut().ok_or(ClassifierError::Closed)?;
    classifier.classify_image(frame)?;
    Ok(classifier.result().clone())
  }

  pub fn result(&self) -> Result<DetectResult<VocLabel>, ClassifierError> {
    let guard = self.lock()?;
    let classifier = guard.as_ref().ok_or(ClassifierError::Closed)?;
    Ok(classifier.result().clone())
  }

  pub fn pause(&self) {
    self.paused.store(true, Ordering::Release);
  }

  pub fn unpause(&self) {
    self.paused.store(false, Ordering::Release);
  }

  pub fn is_paused(&self) -> bool {
    self.paused.load(Ordering::Acquire)
  }

  pub fn is_closed(&self) -> bool {
    self.lock().map(|guard| guard.is_none()).unwrap_or(true)
  }

  /// 关闭会话，重复调用不会报错
  pub fn close(&self) -> Result<(), ClassifierError> {
    let taken = self.lock()?.take();
    match taken {
      Some(classifier) => classifier.close(),
      None => {
        warn!("分类器已经关闭");
        Ok(())
      }
    }
  }
}

// 为引用实现，`shared.close()` 始终解析到不消耗句柄的固有方法
impl<S: InferenceSession> Model for &SharedClassifier<S> {
  type Input = YoloTinyV1Frame;
  type Output = DetectResult<VocLabel>;
  type Error = ClassifierError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.classify_image(input)
  }

  fn close(self) -> Result<(), Self::Error> {
    SharedClassifier::close(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{WithLabel, YOLOV1_OUTPUT_LEN};

  /// 每次推理依次返回预置输出的会话
  struct ScriptedSession {
    outputs: Vec<Vec<f32>>,
    runs: usize,
    released: Arc<AtomicBool>,
  }

  impl ScriptedSession {
    fn new(outputs: Vec<Vec<f32>>) -> Self {
      Self {
        outputs,
        runs: 0,
        released: Arc::new(AtomicBool::new(false)),
      }
    }
  }

  impl InferenceSession for ScriptedSession {
    fn open(_model: &[u8], _options: &SessionOptions) -> Result<Self, SessionError> {
      Ok(Self::new(vec![vec![0.0; YOLOV1_OUTPUT_LEN]]))
    }

    fn run(&mut self, input: &[f32], shape: [usize; 4]) -> Result<Vec<f32>, SessionError> {
      assert_eq!(input.len(), shape.iter().product::<usize>());
      let output = self
        .outputs
        .get(self.runs)
        .cloned()
        .ok_or_else(|| SessionError::Run("no more outputs".to_string()))?;
      self.runs += 1;
      Ok(output)
    }

    fn close(self) -> Result<(), SessionError> {
      self.released.store(true, Ordering::SeqCst);
      Ok(())
    }
  }

  fn output_with_class(class: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; YOLOV1_OUTPUT_LEN];
    out[class] = 1.0; // 第 0 个网格
    out[980] = 0.9; // 第 0 个网格的第 0 个框
    out[1078..1082].copy_from_slice(&[0.5, 0.5, 0.2, 0.2]);
    out
  }

  fn classifier(outputs: Vec<Vec<f32>>) -> YoloTinyV1Classifier<ScriptedSession> {
    YoloTinyV1Builder::new("unused.onnx")
      .load_with_session(ScriptedSession::new(outputs))
      .unwrap()
  }

  #[test]
  fn result_is_empty_after_load() {
    let classifier = classifier(vec![]);
    assert!(classifier.result().is_empty());
    assert_eq!(classifier.input_size(), 448);
  }

  #[test]
  fn result_reflects_only_latest_call() {
    let mut classifier = classifier(vec![output_with_class(7), output_with_class(11)]);
    let frame = YoloTinyV1Frame::default();

    classifier.classify_image(&frame).unwrap();
    assert_eq!(classifier.result().len(), 1);
    assert_eq!(classifier.result().items[0].kind, VocLabel::Cat);

    classifier.classify_image(&frame).unwrap();
    assert_eq!(classifier.result().len(), 1);
    assert_eq!(classifier.result().items[0].kind.to_label_str(), "dog");
  }

  #[test]
  fn result_read_is_idempotent() {
    let mut classifier = classifier(vec![output_with_class(3)]);
    classifier.classify_image(&YoloTinyV1Frame::default()).unwrap();
    let first = classifier.result().clone();
    assert_eq!(&first, classifier.result());
    assert_eq!(classifier.result(), classifier.result());
  }

  #[test]
  fn failed_inference_clears_result() {
    let mut classifier = classifier(vec![output_with_class(3), vec![0.0; 5]]);
    let frame = YoloTinyV1Frame::default();
    classifier.classify_image(&frame).unwrap();
    assert!(!classifier.result().is_empty());

    let err = classifier.classify_image(&frame).unwrap_err();
    assert!(matches!(err, ClassifierError::Decode(_)));
    assert!(classifier.result().is_empty());
  }

  #[test]
  fn paused_classifier_keeps_previous_result() {
    let mut classifier = classifier(vec![output_with_class(3)]);
    let frame = YoloTinyV1Frame::default();
    classifier.classify_image(&frame).unwrap();

    classifier.pause();
    assert!(matches!(
      classifier.classify_image(&frame),
      Err(ClassifierError::Paused)
    ));
    assert_eq!(classifier.result().len(), 1);

    classifier.unpause();
    assert!(!classifier.is_paused());
  }

  #[test]
  fn close_releases_session() {
    let session = ScriptedSession::new(vec![]);
    let released = Arc::clone(&session.released);
    let classifier = YoloTinyV1Builder::new("unused.onnx")
      .load_with_session(session)
      .unwrap();

    classifier.close().unwrap();
    assert!(released.load(Ordering::SeqCst));
  }

  #[test]
  fn shared_classifier_fails_after_close() {
    let shared = classifier(vec![output_with_class(1)]).into_shared();
    let other = shared.clone();
    let frame = YoloTinyV1Frame::default();

    assert_eq!(shared.classify_image(&frame).unwrap().len(), 1);
    other.close().unwrap();
    other.close().unwrap();

    assert!(shared.is_closed());
    assert!(matches!(
      shared.classify_image(&frame),
      Err(ClassifierError::Closed)
    ));
    assert!(matches!(shared.result(), Err(ClassifierError::Closed)));
  }

  #[test]
  fn shared_close_through_model_trait_is_idempotent() {
    let shared = classifier(vec![output_with_class(2), output_with_class(2)]).into_shared();
    let frame = YoloTinyV1Frame::default();

    let mut model = &shared;
    assert_eq!(Model::infer(&mut model, &frame).unwrap().len(), 1);
    Model::close(&shared).unwrap();
    Model::close(&shared).unwrap();
    shared.close().unwrap();

    assert!(shared.is_closed());
    assert!(matches!(
      Model::infer(&mut model, &frame),
      Err(ClassifierError::Closed)
    ));
  }

  #[test]
  fn shared_pause_is_visible_to_clones() {
    let shared = classifier(vec![output_with_class(1)]).into_shared();
    let other = shared.clone();
    other.pause();
    assert!(matches!(
      shared.classify_image(&YoloTinyV1Frame::default()),
      Err(ClassifierError::Paused)
    ));
    other.unpause();
    assert!(shared.classify_image(&YoloTinyV1Frame::default()).is_ok());
  }

  #[test]
  fn builder_from_url_reads_query() {
    let url = Url::parse(
      "yolov1:///models/tiny%20yolo.onnx?threshold=0.3&nms=0.5&output=out:0&threads=2",
    )
    .unwrap();
    let builder = YoloTinyV1Builder::from_url(&url).unwrap();
    assert_eq!(builder.model_path(), std::path::Path::new("/models/tiny yolo.onnx"));
    assert_eq!(builder.options().input_name, "image_input:0");
    assert_eq!(builder.options().output_name, "out:0");
    assert_eq!(builder.options().intra_threads, Some(2));

    let classifier = builder.load_with_session(ScriptedSession::new(vec![])).unwrap();
    assert_eq!(classifier.decoder().threshold(), 0.3);
    assert_eq!(classifier.decoder().nms_threshold(), Some(0.5));
  }

  #[test]
  fn builder_rejects_other_scheme_and_bad_values() {
    let url = Url::parse("image:///models/model.onnx").unwrap();
    assert!(matches!(
      YoloTinyV1Builder::from_url(&url),
      Err(ClassifierError::ModelPathError(_))
    ));

    let url = Url::parse("yolov1:///models/model.onnx?threshold=abc").unwrap();
    assert!(matches!(
      YoloTinyV1Builder::from_url(&url),
      Err(ClassifierError::InvalidConfig(_))
    ));

    let result = YoloTinyV1Builder::new("m.onnx")
      .threshold(2.0)
      .load_with_session(ScriptedSession::new(vec![]));
    assert!(matches!(result, Err(ClassifierError::InvalidConfig(_))));

    let result = YoloTinyV1Builder::new("m.onnx")
      .nms_threshold(Some(-0.5))
      .load_with_session(ScriptedSession::new(vec![]));
    assert!(matches!(result, Err(ClassifierError::InvalidConfig(_))));
  }

  #[test]
  fn load_model_reports_missing_file() {
    let result = YoloTinyV1Builder::new("/nonexistent/dir/model.onnx").load_model::<ScriptedSession>();
    assert!(matches!(result, Err(ClassifierError::ModelLoadError(_))));
  }
}

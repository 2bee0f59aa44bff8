// 该文件是 YoloTiny 项目的一部分。
// tests/lifecycle.rs - 分类器生命周期集成测试
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

use std::sync::{Arc, Mutex};

use image::{Rgb, RgbImage};
use url::Url;

use yolotiny::{
  FromUrl,
  model::{
    ClassifierError, InferenceSession, SessionError, SessionOptions, VocLabel, YOLOV1_OUTPUT_LEN,
    YoloTinyV1Builder,
  },
  output::{JsonLinesOutput, Render},
  preprocess::{Rotation, prepare_frame},
};

/// 记录模型数据与输入，并返回固定输出的会话
struct EchoSession {
  model: Vec<u8>,
  options: SessionOptions,
  inputs: Arc<Mutex<Vec<Vec<f32>>>>,
}

impl InferenceSession for EchoSession {
  fn open(model: &[u8], options: &SessionOptions) -> Result<Self, SessionError> {
    if model.is_empty() {
      return Err(SessionError::Load("模型为空".to_string()));
    }
    Ok(Self {
      model: model.to_vec(),
      options: options.clone(),
      inputs: Arc::new(Mutex::new(Vec::new())),
    })
  }

  fn run(&mut self, input: &[f32], _shape: [usize; 4]) -> Result<Vec<f32>, SessionError> {
    self.inputs.lock().unwrap().push(input.to_vec());

    let mut output = vec![0.0f32; YOLOV1_OUTPUT_LEN];
    // 第 3 行第 3 列的网格，类别 horse，第二个框
    let cell = 3 * 7 + 3;
    output[cell * 20 + 12] = 0.8;
    output[980 + cell * 2 + 1] = 1.0;
    let base = 1078 + (cell * 2 + 1) * 4;
    output[base..base + 4].copy_from_slice(&[0.5, 0.5, 0.4, 0.4]);
    Ok(output)
  }
}

fn write_model(dir: &tempfile::TempDir) -> std::path::PathBuf {
  let path = dir.path().join("yolo-tiny.onnx");
  std::fs::write(&path, b"fake-model").unwrap();
  path
}

#[test]
fn load_classify_close() {
  let dir = tempfile::tempdir().unwrap();
  let model_path = write_model(&dir);
  let url = Url::parse(&format!(
    "yolov1://{}?threshold=0.2&threads=1",
    model_path.display()
  ))
  .unwrap();

  let mut classifier = YoloTinyV1Builder::from_url(&url)
    .unwrap()
    .load_model::<EchoSession>()
    .unwrap();
  assert!(classifier.result().is_empty());

  let image = RgbImage::from_pixel(640, 480, Rgb([255, 255, 255]));
  let frame = prepare_frame::<448>(&image, Rotation::Deg90).unwrap();
  classifier.classify_image(&frame).unwrap();

  let result = classifier.result();
  assert_eq!(result.len(), 1);
  let item = &result.items[0];
  assert_eq!(item.kind, VocLabel::Horse);
  assert!((item.score - 0.8).abs() < 1e-6);
  let center = 3.5 / 7.0;
  assert!((item.bbox[0] + item.bbox[2] - 2.0 * center).abs() < 1e-5);
  assert!(item.bbox[0] >= 0.0 && item.bbox[2] <= 1.0);

  classifier.close().unwrap();
}

#[test]
fn session_sees_model_bytes_and_normalized_input() {
  let dir = tempfile::tempdir().unwrap();
  let model_path = write_model(&dir);

  let session = EchoSession::open(&std::fs::read(&model_path).unwrap(), &SessionOptions::default())
    .unwrap();
  assert_eq!(session.model, b"fake-model");
  assert_eq!(session.options.input_name, "image_input:0");
  let inputs = Arc::clone(&session.inputs);

  let mut classifier = YoloTinyV1Builder::new(&model_path)
    .load_with_session(session)
    .unwrap();

  let image = RgbImage::from_pixel(448, 448, Rgb([255, 255, 255]));
  let frame = prepare_frame::<448>(&image, Rotation::Deg0).unwrap();
  classifier.classify_image(&frame).unwrap();

  let inputs = inputs.lock().unwrap();
  assert_eq!(inputs.len(), 1);
  assert_eq!(inputs[0].len(), 448 * 448 * 3);
  assert!(inputs[0].iter().all(|&v| (v - 1.0).abs() < 1e-6));
}

#[test]
fn empty_model_file_fails_to_load() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("empty.onnx");
  std::fs::write(&path, b"").unwrap();

  let result = YoloTinyV1Builder::new(&path).load_model::<EchoSession>();
  assert!(matches!(
    result,
    Err(ClassifierError::Session(SessionError::Load(_)))
  ));
}

#[test]
fn shared_classifier_feeds_json_output() {
  let dir = tempfile::tempdir().unwrap();
  let model_path = write_model(&dir);
  let shared = YoloTinyV1Builder::new(&model_path)
    .load_model::<EchoSession>()
    .unwrap()
    .into_shared();

  let json_path = dir.path().join("result.jsonl");
  let output = JsonLinesOutput::from_url(&Url::parse(&format!("json://{}", json_path.display())).unwrap())
    .unwrap();

  let image = RgbImage::from_pixel(100, 200, Rgb([0, 0, 0]));
  let frame = prepare_frame::<448>(&image, Rotation::Deg0).unwrap();
  let worker = {
    let shared = shared.clone();
    std::thread::spawn(move || shared.classify_image(&frame))
  };
  let result = worker.join().unwrap().unwrap();
  output.render_result(&(), &result).unwrap();

  shared.close().unwrap();
  assert!(shared.is_closed());
  assert!(matches!(shared.result(), Err(ClassifierError::Closed)));

  let line = std::fs::read_to_string(&json_path).unwrap();
  let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
  assert_eq!(value["detections"][0]["label"], "horse");
  assert_eq!(value["detections"][0]["class_index"], 12);
}

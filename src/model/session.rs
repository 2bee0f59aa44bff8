// 该文件是 YoloTiny 项目的一部分。
// src/model/session.rs - 推理会话
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

pub const DEFAULT_INPUT_NAME: &str = "image_input:0";
pub const DEFAULT_OUTPUT_NAME: &str = "prediction/BiasAdd:0";

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("会话创建失败: {0}")]
  Load(String),
  #[error("模型缺少张量: {0}")]
  MissingTensor(String),
  #[error("推理失败: {0}")]
  Run(String),
  #[error("输入长度不匹配: 形状 {shape:?} 需要 {expected}, 实际 {actual}")]
  InputShape {
    shape: [usize; 4],
    expected: usize,
    actual: usize,
  },
  #[error("会话释放失败: {0}")]
  Release(String),
}

/// 打开会话时使用的参数
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
  pub input_name: String,
  pub output_name: String,
  pub intra_threads: Option<usize>,
}

impl Default for SessionOptions {
  fn default() -> Self {
    Self {
      input_name: DEFAULT_INPUT_NAME.to_string(),
      output_name: DEFAULT_OUTPUT_NAME.to_string(),
      intra_threads: None,
    }
  }
}

/// 已加载的计算图及其执行上下文
///
/// 同一个会话一次只能执行一次推理，由 `&mut self` 保证。
pub trait InferenceSession: Sized {
  fn open(model: &[u8], options: &SessionOptions) -> Result<Self, SessionError>;

  /// 以 NHWC 形状运行一次推理，返回输出张量的扁平数据
  fn run(&mut self, input: &[f32], shape: [usize; 4]) -> Result<Vec<f32>, SessionError>;

  fn close(self) -> Result<(), SessionError> {
    Ok(())
  }
}

pub(crate) fn check_input_shape(input: &[f32], shape: [usize; 4]) -> Result<(), SessionError> {
  let expected = shape.iter().product::<usize>();
  if input.len() != expected {
    return Err(SessionError::InputShape {
      shape,
      expected,
      actual: input.len(),
    });
  }
  Ok(())
}

#[cfg(feature = "runtime_ort")]
mod ort_session {
  use ort::session::Session;
  use ort::value::Tensor;
  use tracing::{debug, info};

  use super::{InferenceSession, SessionError, SessionOptions, check_input_shape};

  /// ONNX Runtime 会话
  pub struct OrtSession {
    session: Session,
    input_name: String,
    output_index: usize,
  }

  impl InferenceSession for OrtSession {
    fn open(model: &[u8], options: &SessionOptions) -> Result<Self, SessionError> {
      let mut builder = Session::builder().map_err(|e| SessionError::Load(e.to_string()))?;
      if let Some(threads) = options.intra_threads {
        builder = builder
          .with_intra_threads(threads)
          .map_err(|e| SessionError::Load(e.to_string()))?;
      }
      let session = builder
        .commit_from_memory(model)
        .map_err(|e| SessionError::Load(e.to_string()))?;

      let input_names: Vec<String> = session
        .inputs()
        .iter()
        .map(|input| input.name().to_string())
        .collect();
      let output_names: Vec<String> = session
        .outputs()
        .iter()
        .map(|output| output.name().to_string())
        .collect();
      debug!("模型输入: {:?}", input_names);
      debug!("模型输出: {:?}", output_names);

      if !input_names.contains(&options.input_name) {
        return Err(SessionError::MissingTensor(options.input_name.clone()));
      }
      let output_index = output_names
        .iter()
        .position(|name| *name == options.output_name)
        .ok_or_else(|| SessionError::MissingTensor(options.output_name.clone()))?;

      info!("ONNX Runtime 会话创建完成");
      Ok(Self {
        session,
        input_name: options.input_name.clone(),
        output_index,
      })
    }

    fn run(&mut self, input: &[f32], shape: [usize; 4]) -> Result<Vec<f32>, SessionError> {
      check_input_shape(input, shape)?;

      let dims = shape.map(|d| d as i64);
      let tensor = Tensor::from_array((dims, input.to_vec().into_boxed_slice()))
        .map_err(|e| SessionError::Run(e.to_string()))?;

      let outputs = self
        .session
        .run(ort::inputs![self.input_name.as_str() => tensor])
        .map_err(|e| SessionError::Run(e.to_string()))?;

      let (_, data) = outputs[self.output_index]
        .try_extract_tensor::<f32>()
        .map_err(|e| SessionError::Run(e.to_string()))?;

      Ok(data.to_vec())
    }
  }
}

#[cfg(feature = "runtime_ort")]
pub use self::ort_session::OrtSession;

// 该文件是 YoloTiny 项目的一部分。
// src/output/json_lines.rs - JSON Lines 检测结果输出
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

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectResult, WithLabel},
  output::Render,
  utils::{UrlParamError, url_path},
};

#[derive(Error, Debug)]
pub enum JsonLinesOutputError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("URL 参数错误: {0}")]
  UrlParam(#[from] UrlParamError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("输出文件锁已损坏")]
  Poisoned,
}

/// 检测结果的 JSON 表示，坐标为归一化值
pub fn detections_to_json<T: WithLabel>(result: &DetectResult<T>) -> Value {
  Value::Array(
    result
      .iter()
      .map(|item| {
        json!({
          "label": item.kind.to_label_str(),
          "class_index": item.kind.to_label_id(),
          "confidence": item.score,
          "left": item.bbox[0],
          "top": item.bbox[1],
          "right": item.bbox[2],
          "bottom": item.bbox[3],
        })
      })
      .collect(),
  )
}

/// 每帧一行 JSON
pub struct JsonLinesOutput {
  writer: Mutex<BufWriter<File>>,
  frame_counter: AtomicU64,
}

impl FromUrlWithScheme for JsonLinesOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonLinesOutputError::SchemeMismatch);
    }
    Self::create(&url_path(url)?)
  }
}

impl JsonLinesOutput {
  pub fn create(path: &Path) -> Result<Self, JsonLinesOutputError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    info!("检测结果写入: {}", path.display());

    Ok(Self {
      writer: Mutex::new(BufWriter::new(file)),
      frame_counter: AtomicU64::new(0),
    })
  }
}

impl<Frame, T: WithLabel> Render<Frame, DetectResult<T>> for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn render_result(&self, _frame: &Frame, result: &DetectResult<T>) -> Result<(), Self::Error> {
    let frame = self.frame_counter.fetch_add(1, Ordering::Relaxed);
    let line = json!({
      "frame": frame,
      "detections": detections_to_json(result),
    });

    let mut writer = self
      .writer
      .lock()
      .map_err(|_| JsonLinesOutputError::Poisoned)?;
    writeln!(writer, "{}", line)?;
    writer.flush()?;
    Ok(())
  }
}

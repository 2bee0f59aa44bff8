// 该文件是 YoloTiny 项目的一部分。
// src/utils.rs - URL 参数解析工具
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
use std::str::FromStr;

use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum UrlParamError {
  #[error("路径编码无效: {0}")]
  InvalidPath(String),
  #[error("参数 {key} 的值无效: {value}")]
  InvalidValue { key: String, value: String },
}

/// 取出 URL 中的文件路径，并进行百分号解码
pub fn url_path(url: &Url) -> Result<PathBuf, UrlParamError> {
  let decoded = urlencoding::decode(url.path())
    .map_err(|_| UrlParamError::InvalidPath(url.path().to_string()))?;
  Ok(PathBuf::from(decoded.into_owned()))
}

/// 查询参数的原始字符串值，同名参数取第一个
pub fn query_value(url: &Url, key: &str) -> Option<String> {
  url
    .query_pairs()
    .find(|(k, _)| k == key)
    .map(|(_, v)| v.into_owned())
}

pub fn query_flag(url: &Url, key: &str) -> bool {
  url.query_pairs().any(|(k, _)| k == key)
}

/// 解析查询参数，参数缺失时返回 `None`
pub fn query_parse<T: FromStr>(url: &Url, key: &str) -> Result<Option<T>, UrlParamError> {
  match query_value(url, key) {
    None => Ok(None),
    Some(value) => value
      .parse::<T>()
      .map(Some)
      .map_err(|_| UrlParamError::InvalidValue {
        key: key.to_string(),
        value,
      }),
  }
}

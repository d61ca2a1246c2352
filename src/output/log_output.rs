// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/log_output.rs - 日志输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, inference::RoiResult, output::Render};

#[derive(Error, Debug)]
pub enum LogOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 以 tracing 日志输出每个结果
#[derive(Debug, Default)]
pub struct LogOutput {
  always: bool,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = LogOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LogOutputError::SchemeMismatch);
    }
    let always = url.query_pairs().any(|(k, _)| k == "always");
    Ok(LogOutput { always })
  }
}

impl<T: RoiResult> Render<[T]> for LogOutput {
  type Error = LogOutputError;

  fn render_result(&self, result: &[T]) -> Result<(), Self::Error> {
    if result.is_empty() {
      if self.always {
        info!("本帧没有结果");
      }
      return Ok(());
    }

    for (idx, item) in result.iter().enumerate() {
      info!(
        "结果 {}: 位置 {}, 标签 {}, 置信度 {}",
        idx,
        item.location(),
        item.label().unwrap_or("-"),
        item
          .confidence()
          .map(|c| format!("{:.4}", c))
          .unwrap_or_else(|| "-".to_string())
      );
    }
    Ok(())
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  path::{Path, PathBuf},
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{DateTime, Datelike, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::{FromUrl, FromUrlWithScheme, inference::RoiResult, output::Render};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("未知的记录格式: {0}")]
  UnknownFormat(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFormat {
  #[default]
  Text,
  Json,
}

impl RecordFormat {
  fn extension(&self) -> &'static str {
    match self {
      RecordFormat::Text => "txt",
      RecordFormat::Json => "json",
    }
  }

  fn encode<T: RoiResult>(&self, result: &[T]) -> Result<String, DirectoryRecordOutputError> {
    match self {
      RecordFormat::Text => {
        let records: Vec<String> = result
          .iter()
          .map(|item| {
            let loc = item.location();
            format!(
              "{}, {:.4}, {}, {}, {}, {}",
              item.label().unwrap_or("-"),
              item.confidence().unwrap_or(-1.0),
              loc.x,
              loc.y,
              loc.width,
              loc.height
            )
          })
          .collect();
        Ok(records.join("\n"))
      }
      RecordFormat::Json => {
        let records: Vec<_> = result
          .iter()
          .map(|item| {
            let loc = item.location();
            json!({
              "label": item.label(),
              "confidence": item.confidence(),
              "x": loc.x,
              "y": loc.y,
              "width": loc.width,
              "height": loc.height,
            })
          })
          .collect();
        Ok(serde_json::to_string_pretty(&records)?)
      }
    }
  }
}

/// 每个周期的结果写入 `目录/年/月/日/时-分-秒-序号.扩展名`
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  format: RecordFormat,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let mut format = RecordFormat::default();
    for (k, v) in uri.query_pairs() {
      if k == "format" {
        format = match v.as_ref() {
          "text" | "txt" => RecordFormat::Text,
          "json" => RecordFormat::Json,
          other => return Err(DirectoryRecordOutputError::UnknownFormat(other.to_string())),
        };
      }
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput::new(uri.path(), format).always(always))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>, format: RecordFormat) -> Self {
    Self {
      directory: directory.into(),
      format,
      frame_counter: AtomicU16::new(0),
      always: false,
    }
  }

  pub fn always(mut self, always: bool) -> Self {
    self.always = always;
    self
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.{}",
      now.format("%H-%M-%S"),
      self.frame_id(),
      self.format.extension()
    )))
  }
}

impl<T: RoiResult> Render<[T]> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, result: &[T]) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }

    let path = self.frame_path(Utc::now())?;
    std::fs::write(&path, self.format.encode(result)?)?;
    debug!("记录 {} 个结果到 {}", result.len(), path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{frame::Rect, inference::LocationResult};

  struct Labeled(Rect);

  impl RoiResult for Labeled {
    fn location(&self) -> &Rect {
      &self.0
    }

    fn label(&self) -> Option<&str> {
      Some("happiness")
    }

    fn confidence(&self) -> Option<f32> {
      Some(0.5)
    }
  }

  fn record_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(path) = stack.pop() {
      for entry in std::fs::read_dir(&path).unwrap() {
        let entry = entry.unwrap().path();
        if entry.is_dir() {
          stack.push(entry);
        } else {
          files.push(entry);
        }
      }
    }
    files
  }

  #[test]
  fn from_url_parses_options() {
    let url = url::Url::parse("folder:///var/records?format=json&always").unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    assert_eq!(output.directory(), Path::new("/var/records"));
    assert_eq!(output.format, RecordFormat::Json);
    assert!(output.always);

    let url = url::Url::parse("folder:///var/records?format=xml").unwrap();
    assert!(matches!(
      DirectoryRecordOutput::from_url(&url),
      Err(DirectoryRecordOutputError::UnknownFormat(_))
    ));
  }

  #[test]
  fn writes_text_records() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path(), RecordFormat::Text);
    output
      .render_result(&[Labeled(Rect::new(1, 2, 3, 4)), Labeled(Rect::new(5, 6, 7, 8))][..])
      .unwrap();

    let files = record_files(dir.path());
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].extension().unwrap(), "txt");
    let content = std::fs::read_to_string(&files[0]).unwrap();
    assert_eq!(
      content,
      "happiness, 0.5000, 1, 2, 3, 4\nhappiness, 0.5000, 5, 6, 7, 8"
    );
  }

  #[test]
  fn writes_json_records() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path(), RecordFormat::Json);
    output
      .render_result(&[LocationResult::new(Rect::new(1, 2, 3, 4))][..])
      .unwrap();

    let files = record_files(dir.path());
    let value: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(&files[0]).unwrap()).unwrap();
    assert_eq!(value[0]["x"], 1);
    assert_eq!(value[0]["height"], 4);
    assert!(value[0]["label"].is_null());
  }

  #[test]
  fn skips_empty_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let empty: [LocationResult; 0] = [];

    let output = DirectoryRecordOutput::new(dir.path(), RecordFormat::Text);
    output.render_result(&empty[..]).unwrap();
    assert!(record_files(dir.path()).is_empty());

    let output = output.always(true);
    output.render_result(&empty[..]).unwrap();
    assert_eq!(record_files(dir.path()).len(), 1);
  }
}

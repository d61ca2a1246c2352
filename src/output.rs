// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, inference::RoiResult};

pub trait Render<Output: ?Sized> {
  type Error;
  fn render_result(&self, result: &Output) -> Result<(), Self::Error>;
}

mod log_output;
pub use self::log_output::{LogOutput, LogOutputError};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError, RecordFormat};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("日志输出错误: {0}")]
  LogOutputError(#[from] LogOutputError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  LogOutput(LogOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      LogOutput::SCHEME => Ok(OutputWrapper::LogOutput(LogOutput::from_url(url)?)),
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => Ok(OutputWrapper::DirectoryRecordOutput(
        DirectoryRecordOutput::from_url(url)?,
      )),
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl<T: RoiResult> Render<[T]> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, result: &[T]) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::LogOutput(output) => output
        .render_result(result)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(result)
        .map_err(OutputError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{frame::Rect, inference::LocationResult};

  #[test]
  fn dispatch_by_scheme() {
    let log = OutputWrapper::from_url(&Url::parse("log:stdout").unwrap()).unwrap();
    assert!(matches!(log, OutputWrapper::LogOutput(_)));
    assert!(matches!(
      OutputWrapper::from_url(&Url::parse("rtsp://camera/stream").unwrap()),
      Err(OutputError::SchemeMismatch(s)) if s == "rtsp"
    ));
  }

  #[cfg(feature = "directory_record")]
  #[test]
  fn dispatch_directory_record() {
    let output = OutputWrapper::from_url(&Url::parse("folder:///tmp/records").unwrap()).unwrap();
    assert!(matches!(output, OutputWrapper::DirectoryRecordOutput(_)));
  }

  #[test]
  fn wrapper_renders() {
    let log = OutputWrapper::from_url(&Url::parse("log:stdout").unwrap()).unwrap();
    let results = [LocationResult::new(Rect::new(0, 0, 4, 4))];
    assert!(log.render_result(&results[..]).is_ok());
  }
}

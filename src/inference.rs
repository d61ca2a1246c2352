// 该文件是 Shanan （山南西风） 项目的一部分。
// src/inference.rs - 推理请求生命周期
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::RgbImage;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl,
  filter::filter_rois,
  frame::{CropBlob, FrameError, Rect},
  output::Render,
};

/// 推理结果的公共部分：在原始帧中的位置。
/// 其余字段通过能力查询获取，不支持的返回 `None`。
pub trait RoiResult {
  fn location(&self) -> &Rect;

  fn label(&self) -> Option<&str> {
    None
  }

  fn confidence(&self) -> Option<f32> {
    None
  }
}

/// 只有位置信息的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationResult {
  location: Rect,
}

impl LocationResult {
  pub fn new(location: Rect) -> Self {
    Self { location }
  }
}

impl RoiResult for LocationResult {
  fn location(&self) -> &Rect {
    &self.location
  }
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("ROI 无效: {0}")]
  InvalidRoi(#[from] FrameError),
  #[error("输入数量超过最大批处理数量 {0}")]
  BatchFull(usize),
  #[error("已有推理请求正在执行")]
  RequestInFlight,
  #[error("没有待推理的输入")]
  EmptyBatch,
  #[error("没有已提交的推理请求")]
  NoRequest,
  #[error("推理结果尚未就绪")]
  NotReady,
  #[error("推理后端错误: {0}")]
  Backend(String),
  #[error("模型输出格式错误: {0}")]
  MalformedOutput(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
  /// 缓冲区为空，结果为空或已过期
  Idle,
  /// 已有输入入队，尚未提交
  Accumulating,
  /// 请求已提交，尚未取回结果
  InFlight,
  /// 结果已取回，缓冲区已清空
  Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitMode {
  #[default]
  Blocking,
  Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DetectionOptions {
  pub wait_mode: WaitMode,
  /// 推理失败时保留本批输入，便于直接重新提交
  pub keep_batch_on_error: bool,
}

#[derive(Error, Debug)]
pub enum DetectionOptionsError {
  #[error("参数 {0} 无效: {1}")]
  InvalidParameter(&'static str, String),
}

impl FromUrl for DetectionOptions {
  type Error = DetectionOptionsError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let mut options = DetectionOptions::default();
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "wait" => {
          options.wait_mode = match value.as_ref() {
            "block" => WaitMode::Blocking,
            "poll" => WaitMode::Poll,
            other => {
              return Err(DetectionOptionsError::InvalidParameter(
                "wait",
                other.to_string(),
              ));
            }
          }
        }
        "keep_batch" => options.keep_batch_on_error = value != "false",
        _ => {}
      }
    }
    Ok(options)
  }
}

/// 自上次取回结果以来入队的裁剪图像及其原始位置，两者一一对应
#[derive(Debug, Default)]
pub struct EnqueueBuffer {
  blobs: Vec<CropBlob>,
  locations: Vec<Rect>,
}

impl EnqueueBuffer {
  pub fn push(&mut self, blob: CropBlob, location: Rect) {
    self.blobs.push(blob);
    self.locations.push(location);
  }

  pub fn len(&self) -> usize {
    self.locations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.locations.is_empty()
  }

  pub fn blobs(&self) -> &[CropBlob] {
    &self.blobs
  }

  pub fn locations(&self) -> &[Rect] {
    &self.locations
  }

  pub fn clear(&mut self) {
    debug!("清空输入缓冲区, 丢弃 {} 个输入", self.len());
    self.blobs.clear();
    self.locations.clear();
  }
}

/// 单帧 ROI 推理：enqueue → submit_request → fetch_results → 读取结果
pub trait Inference {
  type Result: RoiResult;

  /// 裁剪 `roi` 并放入缓冲区，不会立即推理
  fn enqueue(&mut self, frame: &RgbImage, roi: Rect) -> Result<(), InferenceError>;

  /// 将缓冲区中的全部输入作为一个批次提交
  fn submit_request(&mut self) -> Result<(), InferenceError>;

  /// 取回上一次提交的结果并写入结果缓冲区，同时清空输入缓冲区
  fn fetch_results(&mut self) -> Result<(), InferenceError>;

  fn results(&self) -> &[Self::Result];

  fn name(&self) -> &'static str;

  fn results_len(&self) -> usize {
    self.results().len()
  }

  fn location_result(&self, idx: usize) -> Option<&Self::Result> {
    self.results().get(idx)
  }

  fn filtered_rois(&self, conditions: &str) -> Vec<Rect> {
    filter_rois(self.results(), conditions)
  }

  /// 把当前结果交给输出端
  fn observe_output<O>(&self, output: &O) -> Result<(), O::Error>
  where
    O: Render<[Self::Result]>,
  {
    output.render_result(self.results())
  }
}

mod emotions_detection;
pub use self::emotions_detection::{EmotionsDetection, EmotionsResult, UNSET_CONFIDENCE};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn options_from_url() {
    let url = Url::parse("emotions:///m.rknn?wait=poll&keep_batch").unwrap();
    let options = DetectionOptions::from_url(&url).unwrap();
    assert_eq!(options.wait_mode, WaitMode::Poll);
    assert!(options.keep_batch_on_error);

    let url = Url::parse("emotions:///m.rknn").unwrap();
    assert_eq!(
      DetectionOptions::from_url(&url).unwrap(),
      DetectionOptions::default()
    );
  }

  #[test]
  fn options_reject_unknown_wait_mode() {
    let url = Url::parse("emotions:///m.rknn?wait=later").unwrap();
    assert!(DetectionOptions::from_url(&url).is_err());
  }

  #[test]
  fn location_result_has_no_capabilities() {
    let result = LocationResult::new(Rect::new(1, 2, 3, 4));
    assert_eq!(result.location(), &Rect::new(1, 2, 3, 4));
    assert!(result.label().is_none());
    assert!(result.confidence().is_none());
  }
}

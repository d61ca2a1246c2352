// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/emotion_detection_model.rs - 表情识别模型描述
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::TensorLayout,
  model::{TensorShape, ValidModel},
};

pub const EMOTION_LABELS: [&str; 5] = ["neutral", "happiness", "sadness", "surprise", "anger"];

const EMOTION_INPUT_W: u32 = 64;
const EMOTION_INPUT_H: u32 = 64;
const EMOTION_MAX_BATCH_SIZE: usize = 16;

#[derive(Error, Debug)]
pub enum EmotionModelError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{found}'")]
  SchemeMismatch { expected: &'static str, found: String },
  #[error("参数 {0} 无效: {1}")]
  InvalidParameter(&'static str, String),
  #[error("标签列表为空")]
  NoLabels,
}

#[derive(Debug, Clone)]
pub struct EmotionDetectionModel {
  model_path: PathBuf,
  input_shape: TensorShape,
  output_shape: TensorShape,
  labels: Vec<String>,
  layout: TensorLayout,
  max_batch_size: usize,
}

impl EmotionDetectionModel {
  pub fn model_path(&self) -> &Path {
    &self.model_path
  }
}

impl ValidModel for EmotionDetectionModel {
  fn input_shape(&self) -> &TensorShape {
    &self.input_shape
  }

  fn output_shape(&self) -> &TensorShape {
    &self.output_shape
  }

  fn labels(&self) -> &[String] {
    &self.labels
  }

  fn input_layout(&self) -> TensorLayout {
    self.layout
  }

  fn max_batch_size(&self) -> usize {
    self.max_batch_size
  }
}

#[derive(Debug, Clone)]
pub struct EmotionDetectionModelBuilder {
  model_path: PathBuf,
  labels: Vec<String>,
  input_w: u32,
  input_h: u32,
  layout: TensorLayout,
  max_batch_size: usize,
}

impl FromUrlWithScheme for EmotionDetectionModelBuilder {
  const SCHEME: &'static str = "emotions";
}

impl FromUrl for EmotionDetectionModelBuilder {
  type Error = EmotionModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!("URI 方案不匹配: 期望 '{}', 实际 '{}'", Self::SCHEME, url.scheme());
      return Err(EmotionModelError::SchemeMismatch {
        expected: Self::SCHEME,
        found: url.scheme().to_string(),
      });
    }

    let mut builder = EmotionDetectionModelBuilder::new(url.path());
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "labels" => {
          builder.labels = value
            .split(',')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        }
        "input" => {
          let (w, h): (u32, u32) = value
            .split_once('x')
            .and_then(|(w, h)| Some((w.parse().ok()?, h.parse().ok()?)))
            .ok_or_else(|| EmotionModelError::InvalidParameter("input", value.to_string()))?;
          builder.input_w = w;
          builder.input_h = h;
        }
        "layout" => {
          builder.layout = value
            .parse()
            .map_err(|_| EmotionModelError::InvalidParameter("layout", value.to_string()))?;
        }
        "batch" => {
          builder.max_batch_size = value
            .parse()
            .map_err(|_| EmotionModelError::InvalidParameter("batch", value.to_string()))?;
        }
        _ => debug!("忽略模型参数: {}={}", key, value),
      }
    }

    Ok(builder)
  }
}

impl EmotionDetectionModelBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      labels: EMOTION_LABELS.iter().map(|l| l.to_string()).collect(),
      input_w: EMOTION_INPUT_W,
      input_h: EMOTION_INPUT_H,
      layout: TensorLayout::default(),
      max_batch_size: EMOTION_MAX_BATCH_SIZE,
    }
  }

  pub fn labels<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
    self.labels = labels.into_iter().map(Into::into).collect();
    self
  }

  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.input_w = width;
    self.input_h = height;
    self
  }

  pub fn layout(mut self, layout: TensorLayout) -> Self {
    self.layout = layout;
    self
  }

  pub fn max_batch_size(mut self, max_batch_size: usize) -> Self {
    self.max_batch_size = max_batch_size;
    self
  }

  pub fn build(self) -> Result<EmotionDetectionModel, EmotionModelError> {
    if self.labels.is_empty() {
      return Err(EmotionModelError::NoLabels);
    }
    if self.input_w == 0 || self.input_h == 0 {
      return Err(EmotionModelError::InvalidParameter(
        "input",
        format!("{}x{}", self.input_w, self.input_h),
      ));
    }
    if self.max_batch_size == 0 {
      return Err(EmotionModelError::InvalidParameter(
        "batch",
        self.max_batch_size.to_string(),
      ));
    }

    let (w, h) = (self.input_w as usize, self.input_h as usize);
    let input_shape = match self.layout {
      TensorLayout::Nchw => TensorShape(vec![self.max_batch_size, 3, h, w]),
      TensorLayout::Nhwc => TensorShape(vec![self.max_batch_size, h, w, 3]),
    };
    let output_shape = TensorShape(vec![self.max_batch_size, self.labels.len()]);

    info!(
      "表情识别模型: {}, 输入 {}, 输出 {}, 标签 {:?}",
      self.model_path.display(),
      input_shape,
      output_shape,
      self.labels
    );

    Ok(EmotionDetectionModel {
      model_path: self.model_path,
      input_shape,
      output_shape,
      labels: self.labels,
      layout: self.layout,
      max_batch_size: self.max_batch_size,
    })
  }
}

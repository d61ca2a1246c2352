// 该文件是 Shanan （山南西风） 项目的一部分。
// src/inference/emotions_detection.rs - ROI 表情识别
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::Arc;

use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::{
  engine::{InferenceBackend, OutputTensor, RequestStatus},
  frame::{Rect, crop_and_resize},
  inference::{
    DetectionOptions, EnqueueBuffer, Inference, InferenceError, RequestState, RoiResult, WaitMode,
  },
  model::ValidModel,
};

const EMOTIONS_DETECTION_NAME: &str = "Emotions Detection";

/// 未设置或无效的置信度
pub const UNSET_CONFIDENCE: f32 = -1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct EmotionsResult {
  location: Rect,
  label: String,
  confidence: f32,
}

impl EmotionsResult {
  pub fn new(location: Rect) -> Self {
    Self {
      location,
      label: String::new(),
      confidence: UNSET_CONFIDENCE,
    }
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }
}

impl RoiResult for EmotionsResult {
  fn location(&self) -> &Rect {
    &self.location
  }

  fn label(&self) -> Option<&str> {
    Some(&self.label)
  }

  fn confidence(&self) -> Option<f32> {
    (self.confidence != UNSET_CONFIDENCE).then_some(self.confidence)
  }
}

enum Request<H> {
  Running { handle: H, batch_size: usize },
  /// 后端在提交时即报错，错误留到 fetch_results 再返回
  Rejected(String),
}

pub struct EmotionsDetection<M, B: InferenceBackend> {
  valid_model: Arc<M>,
  engine: B,
  options: DetectionOptions,
  enqueued: EnqueueBuffer,
  request: Option<Request<B::Handle>>,
  results: Vec<EmotionsResult>,
  fetched: bool,
}

impl<M: ValidModel, B: InferenceBackend> EmotionsDetection<M, B> {
  pub fn new(valid_model: Arc<M>, engine: B) -> Self {
    Self::with_options(valid_model, engine, DetectionOptions::default())
  }

  pub fn with_options(valid_model: Arc<M>, engine: B, options: DetectionOptions) -> Self {
    info!(
      "创建 {}: 标签 {:?}, 最大批大小 {}, 等待方式 {:?}",
      EMOTIONS_DETECTION_NAME,
      valid_model.labels(),
      valid_model.max_batch_size(),
      options.wait_mode
    );
    Self {
      valid_model,
      engine,
      options,
      enqueued: EnqueueBuffer::default(),
      request: None,
      results: Vec::new(),
      fetched: false,
    }
  }

  pub fn model(&self) -> &M {
    &self.valid_model
  }

  pub fn enqueued_len(&self) -> usize {
    self.enqueued.len()
  }

  pub fn state(&self) -> RequestState {
    if self.request.is_some() {
      RequestState::InFlight
    } else if !self.enqueued.is_empty() {
      RequestState::Accumulating
    } else if self.fetched {
      RequestState::Ready
    } else {
      RequestState::Idle
    }
  }

  fn discard_batch(&mut self) {
    if self.options.keep_batch_on_error {
      warn!("保留本批 {} 个输入以便重新提交", self.enqueued.len());
    } else {
      self.enqueued.clear();
    }
  }

  fn parse_output(
    &self,
    output: &OutputTensor,
    batch_size: usize,
  ) -> Result<Vec<EmotionsResult>, InferenceError> {
    let labels = self.valid_model.labels();
    let model_shape = self.valid_model.output_shape();
    let dims = output.shape().dims();

    // 除批维度外，输出形状须与模型描述一致
    if dims.len() != model_shape.dims().len() || dims.get(1..) != model_shape.dims().get(1..) {
      error!("输出形状 {} 与模型输出形状 {} 不匹配", output.shape(), model_shape);
      return Err(InferenceError::MalformedOutput(format!(
        "输出形状 {} 与模型输出形状 {} 不匹配",
        output.shape(),
        model_shape
      )));
    }

    if labels.is_empty() || dims.len() < 2 || dims[1] != labels.len() {
      error!("输出形状 {} 与标签数量 {} 不匹配", output.shape(), labels.len());
      return Err(InferenceError::MalformedOutput(format!(
        "输出形状 {} 与标签数量 {} 不匹配",
        output.shape(),
        labels.len()
      )));
    }

    let expected = batch_size * labels.len();
    if output.data().len() < expected {
      error!("输出长度 {} 小于期望长度 {}", output.data().len(), expected);
      return Err(InferenceError::MalformedOutput(format!(
        "输出长度 {} 小于期望长度 {}",
        output.data().len(),
        expected
      )));
    }

    let results = output
      .data()
      .chunks_exact(labels.len())
      .zip(self.enqueued.locations())
      .map(|(scores, location)| {
        let (class_idx, score) = argmax(scores);
        let mut result = EmotionsResult::new(*location);
        result.label = labels[class_idx].clone();
        if score.is_finite() {
          result.confidence = score;
        }
        result
      })
      .collect();

    Ok(results)
  }
}

/// 第一个最大值胜出，NaN 不参与比较
fn argmax(scores: &[f32]) -> (usize, f32) {
  let mut best = (0, scores.first().copied().unwrap_or(f32::NAN));
  for (idx, &score) in scores.iter().enumerate().skip(1) {
    if score > best.1 || (best.1.is_nan() && !score.is_nan()) {
      best = (idx, score);
    }
  }
  best
}

impl<M: ValidModel, B: InferenceBackend> Inference for EmotionsDetection<M, B> {
  type Result = EmotionsResult;

  fn enqueue(&mut self, frame: &RgbImage, roi: Rect) -> Result<(), InferenceError> {
    if self.request.is_some() {
      warn!("{} 正在推理, 拒绝入队 {}", EMOTIONS_DETECTION_NAME, roi);
      return Err(InferenceError::RequestInFlight);
    }

    let max_batch_size = self.valid_model.max_batch_size();
    if self.enqueued.len() >= max_batch_size {
      warn!(
        "{} 输入数量超过最大批处理数量 {}",
        EMOTIONS_DETECTION_NAME, max_batch_size
      );
      return Err(InferenceError::BatchFull(max_batch_size));
    }

    let (width, height) = self.valid_model.input_size();
    let blob = crop_and_resize(frame, &roi, width, height, self.valid_model.input_layout())
      .inspect_err(|e| warn!("{} 入队失败: {}", EMOTIONS_DETECTION_NAME, e))?;

    self.enqueued.push(blob, roi);
    self.fetched = false;
    debug!("入队 ROI {}, 当前 {} 个", roi, self.enqueued.len());
    Ok(())
  }

  fn submit_request(&mut self) -> Result<(), InferenceError> {
    if self.request.is_some() {
      warn!("{} 已有请求正在执行", EMOTIONS_DETECTION_NAME);
      return Err(InferenceError::RequestInFlight);
    }
    if self.enqueued.is_empty() {
      warn!("{} 没有待推理的输入", EMOTIONS_DETECTION_NAME);
      return Err(InferenceError::EmptyBatch);
    }

    let batch_size = self.enqueued.len();
    let request = match self.engine.run_batch(self.enqueued.blobs()) {
      Ok(handle) => {
        debug!("提交推理请求, 批大小 {}", batch_size);
        Request::Running { handle, batch_size }
      }
      Err(e) => {
        error!("提交推理请求失败: {}", e);
        Request::Rejected(e.to_string())
      }
    };
    self.request = Some(request);
    Ok(())
  }

  fn fetch_results(&mut self) -> Result<(), InferenceError> {
    let Some(request) = self.request.take() else {
      warn!("{} 没有已提交的推理请求", EMOTIONS_DETECTION_NAME);
      return Err(InferenceError::NoRequest);
    };

    let (mut handle, batch_size) = match request {
      Request::Running { handle, batch_size } => (handle, batch_size),
      Request::Rejected(msg) => {
        self.discard_batch();
        return Err(InferenceError::Backend(msg));
      }
    };

    let output = match self.options.wait_mode {
      WaitMode::Blocking => self.engine.wait(&mut handle),
      WaitMode::Poll => match self.engine.poll(&mut handle) {
        RequestStatus::Ready(output) => Ok(output),
        RequestStatus::Failed(e) => Err(e),
        RequestStatus::Pending => {
          self.request = Some(Request::Running { handle, batch_size });
          return Err(InferenceError::NotReady);
        }
      },
    };

    let output = match output {
      Ok(output) => output,
      Err(e) => {
        error!("{} 推理失败: {}", EMOTIONS_DETECTION_NAME, e);
        self.discard_batch();
        return Err(InferenceError::Backend(e.to_string()));
      }
    };

    if batch_size == 0 {
      self.discard_batch();
      return Err(InferenceError::EmptyBatch);
    }

    match self.parse_output(&output, batch_size) {
      Ok(results) => {
        self.results = results;
        self.enqueued.clear();
        self.fetched = true;
        debug!("取回 {} 个结果", self.results.len());
        Ok(())
      }
      Err(e) => {
        self.discard_batch();
        Err(e)
      }
    }
  }

  fn results(&self) -> &[EmotionsResult] {
    &self.results
  }

  fn name(&self) -> &'static str {
    EMOTIONS_DETECTION_NAME
  }
}

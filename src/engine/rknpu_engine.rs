// 该文件是 Shanan （山南西风） 项目的一部分。
// src/engine/rknpu_engine.rs - RKNPU 推理后端
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  engine::{InferenceBackend, OutputTensor, RequestStatus},
  frame::{CropBlob, TensorLayout},
  model::{EmotionDetectionModel, ValidModel},
};

const RKNPU_NUM_INPUTS: u32 = 1;

#[derive(Error, Debug)]
pub enum RknpuEngineError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("输出大小不匹配: 期望 {expected}, 实际 {found}")]
  OutputMismatch { expected: usize, found: usize },
}

impl From<std::io::Error> for RknpuEngineError {
  fn from(err: std::io::Error) -> Self {
    RknpuEngineError::ModelLoadError(err)
  }
}

impl From<rknpu::Error> for RknpuEngineError {
  fn from(err: rknpu::Error) -> Self {
    RknpuEngineError::RknnError(err)
  }
}

/// RKNN 上下文按单张输入编译，批次内逐张推理后拼接输出
pub struct RknpuEngine {
  context: Context,
  num_labels: usize,
}

impl RknpuEngine {
  pub fn from_model(model: &EmotionDetectionModel, flags: InitFlags) -> Result<Self, RknpuEngineError> {
    info!("加载模型文件: {}", model.model_path().display());
    let model_data = std::fs::read(model.model_path())?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    let context = Context::new(&model_data, flags)?;
    let num_inputs = context.num_inputs()?;
    if num_inputs != RKNPU_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNPU_NUM_INPUTS, num_inputs
      );
      return Err(RknpuEngineError::ModelInvalid(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNPU_NUM_INPUTS, num_inputs
      )));
    }
    info!("模型加载完成");

    Ok(Self {
      context,
      num_labels: model.labels().len(),
    })
  }

  fn infer_one(&self, blob: &CropBlob) -> Result<Vec<f32>, RknpuEngineError> {
    let format = match blob.layout() {
      TensorLayout::Nchw => TensorFormat::NCHW,
      TensorLayout::Nhwc => TensorFormat::NHWC,
    };
    self
      .context
      .set_input(0, blob.as_bytes(), format, TensorType::UInt8)?;
    self.context.run()?;

    let output = self.context.get_outputs()?;
    let scores = output.get_f32(0)?.to_vec();
    if scores.len() != self.num_labels {
      return Err(RknpuEngineError::OutputMismatch {
        expected: self.num_labels,
        found: scores.len(),
      });
    }
    Ok(scores)
  }
}

pub struct RknpuHandle {
  output: Option<Result<OutputTensor, RknpuEngineError>>,
}

impl InferenceBackend for RknpuEngine {
  type Handle = RknpuHandle;
  type Error = RknpuEngineError;

  fn run_batch(&mut self, batch: &[CropBlob]) -> Result<Self::Handle, Self::Error> {
    debug!("执行模型推理, 批大小 {}", batch.len());
    let mut data = Vec::with_capacity(batch.len() * self.num_labels);
    let mut failure = None;
    for blob in batch {
      match self.infer_one(blob) {
        Ok(scores) => data.extend(scores),
        Err(e) => {
          error!("推理失败: {}", e);
          failure = Some(e);
          break;
        }
      }
    }

    let output = match failure {
      Some(e) => Err(e),
      None => Ok(OutputTensor::new(vec![batch.len(), self.num_labels], data)),
    };
    Ok(RknpuHandle {
      output: Some(output),
    })
  }

  fn poll(&mut self, handle: &mut Self::Handle) -> RequestStatus<Self::Error> {
    match handle.output.take() {
      Some(Ok(output)) => RequestStatus::Ready(output),
      Some(Err(e)) => RequestStatus::Failed(e),
      None => RequestStatus::Failed(RknpuEngineError::ModelInvalid("结果已被取走".to_string())),
    }
  }
}

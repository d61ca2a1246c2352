// 该文件是 Shanan （山南西风） 项目的一部分。
// src/engine.rs - 推理后端
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::time::Duration;

use crate::{frame::CropBlob, model::TensorShape};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// 推理后端输出的原始张量，按行优先存储
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
  shape: TensorShape,
  data: Box<[f32]>,
}

impl OutputTensor {
  pub fn new(shape: impl Into<TensorShape>, data: impl Into<Box<[f32]>>) -> Self {
    Self {
      shape: shape.into(),
      data: data.into(),
    }
  }

  pub fn shape(&self) -> &TensorShape {
    &self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }
}

#[derive(Debug)]
pub enum RequestStatus<E> {
  Pending,
  Ready(OutputTensor),
  Failed(E),
}

/// 批量推理后端。一次 `run_batch` 对应一次推理请求，
/// 结果通过 `poll` 或 `wait` 取回。
pub trait InferenceBackend {
  type Handle;
  type Error: std::fmt::Display;

  fn run_batch(&mut self, batch: &[CropBlob]) -> Result<Self::Handle, Self::Error>;

  fn poll(&mut self, handle: &mut Self::Handle) -> RequestStatus<Self::Error>;

  fn wait(&mut self, handle: &mut Self::Handle) -> Result<OutputTensor, Self::Error> {
    loop {
      match self.poll(handle) {
        RequestStatus::Ready(output) => return Ok(output),
        RequestStatus::Failed(e) => return Err(e),
        RequestStatus::Pending => std::thread::sleep(WAIT_POLL_INTERVAL),
      }
    }
  }
}

mod threaded;
pub use self::threaded::{ThreadedEngine, ThreadedEngineError, ThreadedHandle};

#[cfg(feature = "rknpu")]
mod rknpu_engine;
#[cfg(feature = "rknpu")]
pub use self::rknpu_engine::{RknpuEngine, RknpuEngineError, RknpuHandle};

#[cfg(test)]
mod tests {
  use super::*;

  struct CountdownEngine {
    remaining: usize,
  }

  impl InferenceBackend for CountdownEngine {
    type Handle = ();
    type Error = String;

    fn run_batch(&mut self, _batch: &[CropBlob]) -> Result<(), String> {
      Ok(())
    }

    fn poll(&mut self, _handle: &mut ()) -> RequestStatus<String> {
      if self.remaining == 0 {
        RequestStatus::Ready(OutputTensor::new(vec![1, 1], vec![0.5]))
      } else {
        self.remaining -= 1;
        RequestStatus::Pending
      }
    }
  }

  #[test]
  fn wait_polls_until_ready() {
    let mut engine = CountdownEngine { remaining: 3 };
    let output = engine.wait(&mut ()).unwrap();
    assert_eq!(engine.remaining, 0);
    assert_eq!(output.shape().dims(), &[1, 1]);
    assert_eq!(output.data(), &[0.5]);
  }
}

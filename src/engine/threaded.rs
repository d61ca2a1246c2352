// 该文件是 Shanan （山南西风） 项目的一部分。
// src/engine/threaded.rs - 工作线程推理后端
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  sync::{
    Arc,
    mpsc::{self, Receiver, TryRecvError},
  },
  thread,
};

use thiserror::Error;
use tracing::{debug, error};

use crate::{
  engine::{InferenceBackend, OutputTensor, RequestStatus},
  frame::CropBlob,
};

#[derive(Error, Debug)]
pub enum ThreadedEngineError {
  #[error("推理失败: {0}")]
  Inference(String),
  #[error("无法创建推理线程: {0}")]
  Spawn(std::io::Error),
  #[error("推理线程意外退出")]
  WorkerLost,
}

type InferFn = dyn Fn(&[CropBlob]) -> Result<OutputTensor, String> + Send + Sync;

/// 每个请求在独立线程中执行推理函数
pub struct ThreadedEngine {
  infer: Arc<InferFn>,
  requests: usize,
}

impl ThreadedEngine {
  pub fn new<F>(infer: F) -> Self
  where
    F: Fn(&[CropBlob]) -> Result<OutputTensor, String> + Send + Sync + 'static,
  {
    Self {
      infer: Arc::new(infer),
      requests: 0,
    }
  }
}

pub struct ThreadedHandle {
  id: usize,
  rx: Receiver<Result<OutputTensor, String>>,
}

impl InferenceBackend for ThreadedEngine {
  type Handle = ThreadedHandle;
  type Error = ThreadedEngineError;

  fn run_batch(&mut self, batch: &[CropBlob]) -> Result<Self::Handle, Self::Error> {
    self.requests += 1;
    let id = self.requests;
    let (tx, rx) = mpsc::channel();
    let infer = self.infer.clone();
    let batch = batch.to_vec();

    thread::Builder::new()
      .name(format!("roi-infer-{}", id))
      .spawn(move || {
        debug!("请求 {} 开始推理, 批大小 {}", id, batch.len());
        let _ = tx.send(infer(&batch));
      })
      .map_err(ThreadedEngineError::Spawn)?;

    Ok(ThreadedHandle { id, rx })
  }

  fn poll(&mut self, handle: &mut Self::Handle) -> RequestStatus<Self::Error> {
    match handle.rx.try_recv() {
      Ok(Ok(output)) => RequestStatus::Ready(output),
      Ok(Err(e)) => RequestStatus::Failed(ThreadedEngineError::Inference(e)),
      Err(TryRecvError::Empty) => RequestStatus::Pending,
      Err(TryRecvError::Disconnected) => {
        error!("请求 {} 的推理线程已退出", handle.id);
        RequestStatus::Failed(ThreadedEngineError::WorkerLost)
      }
    }
  }

  fn wait(&mut self, handle: &mut Self::Handle) -> Result<OutputTensor, Self::Error> {
    match handle.rx.recv() {
      Ok(result) => result.map_err(ThreadedEngineError::Inference),
      Err(_) => {
        error!("请求 {} 的推理线程已退出", handle.id);
        Err(ThreadedEngineError::WorkerLost)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::{Rect, TensorLayout, crop_and_resize};
  use image::RgbImage;
  use std::sync::mpsc::sync_channel;
  use std::sync::Mutex;

  fn blobs(n: usize) -> Vec<CropBlob> {
    let frame = RgbImage::new(8, 8);
    (0..n)
      .map(|_| crop_and_resize(&frame, &Rect::new(0, 0, 4, 4), 2, 2, TensorLayout::Nhwc).unwrap())
      .collect()
  }

  #[test]
  fn wait_returns_worker_output() {
    let mut engine = ThreadedEngine::new(|batch| {
      Ok(OutputTensor::new(vec![batch.len(), 1], vec![1.0; batch.len()]))
    });
    let mut handle = engine.run_batch(&blobs(3)).unwrap();
    let output = engine.wait(&mut handle).unwrap();
    assert_eq!(output.shape().dims(), &[3, 1]);
  }

  #[test]
  fn poll_reports_pending_then_ready() {
    let (gate_tx, gate_rx) = sync_channel::<()>(0);
    let gate_rx = Mutex::new(gate_rx);
    let mut engine = ThreadedEngine::new(move |_| {
      gate_rx.lock().unwrap().recv().unwrap();
      Ok(OutputTensor::new(vec![1, 1], vec![0.0]))
    });
    let mut handle = engine.run_batch(&blobs(1)).unwrap();
    assert!(matches!(engine.poll(&mut handle), RequestStatus::Pending));
    gate_tx.send(()).unwrap();
    assert!(engine.wait(&mut handle).is_ok());
  }

  #[test]
  fn inference_error_is_reported() {
    let mut engine = ThreadedEngine::new(|_| Err("设备忙".to_string()));
    let mut handle = engine.run_batch(&blobs(1)).unwrap();
    assert!(matches!(
      engine.wait(&mut handle),
      Err(ThreadedEngineError::Inference(msg)) if msg == "设备忙"
    ));
  }
}

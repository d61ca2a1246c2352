// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - ROI 推理任务
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

use std::sync::mpsc::Receiver;

use image::RgbImage;
use tracing::{info, warn};

use crate::{frame::Rect, inference::Inference, output::Render};

/// 一帧图像及其上游检测出的 ROI
#[derive(Debug, Clone)]
pub struct RoiFrame {
  pub image: RgbImage,
  pub rois: Vec<Rect>,
}

pub trait Task<I, D, O>: Sized {
  type Error;
  fn run_task(self, input: I, detector: &mut D, output: &O) -> Result<(), Self::Error>;
}

/// 对一帧执行一次完整的 enqueue → submit → fetch → 输出。
/// 推理失败只记录日志，返回是否取得了新结果；输出错误向上传递。
pub fn run_cycle<D, O>(detector: &mut D, frame: &RoiFrame, output: &O) -> anyhow::Result<bool>
where
  D: Inference,
  O: Render<[D::Result]>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  let mut enqueued = 0;
  for roi in &frame.rois {
    match detector.enqueue(&frame.image, *roi) {
      Ok(()) => enqueued += 1,
      Err(e) => warn!("{} 跳过 ROI {}: {}", detector.name(), roi, e),
    }
  }

  if enqueued == 0 {
    return Ok(false);
  }

  if let Err(e) = detector.submit_request() {
    warn!("{} 提交失败: {}", detector.name(), e);
    return Ok(false);
  }

  if let Err(e) = detector.fetch_results() {
    warn!("{} 本帧没有新结果: {}", detector.name(), e);
    return Ok(false);
  }

  detector.observe_output(output)?;
  Ok(true)
}

pub struct OneShotTask;

impl<I, D, O> Task<I, D, O> for OneShotTask
where
  I: Iterator<Item = RoiFrame>,
  D: Inference,
  O: Render<[D::Result]>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, detector: &mut D, output: &O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，共 {} 个 ROI，开始推理...", frame.rois.len());
    let now = std::time::Instant::now();
    run_cycle(detector, &frame, output)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  stop: Option<Receiver<()>>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_stop_signal(mut self, stop: Receiver<()>) -> Self {
    self.stop = Some(stop);
    self
  }
}

impl<I, D, O> Task<I, D, O> for ContinuousTask
where
  I: Iterator<Item = RoiFrame>,
  D: Inference,
  O: Render<[D::Result]>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, detector: &mut D, output: &O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let mut frame_index = 0usize;
    let mut fetched = 0usize;
    let mut now = std::time::Instant::now();
    for frame in input {
      frame_index += 1;
      info!("处理第 {} 帧图像", frame_index);
      if run_cycle(detector, &frame, output)? {
        fetched += 1;
      }
      info!("推理完成，耗时: {:.2?}", now.elapsed());
      now = std::time::Instant::now();

      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if self.stop.as_ref().is_some_and(|rx| rx.try_recv().is_ok()) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，共 {} 帧，{} 帧取得结果", frame_index, fetched);
    Ok(())
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/lifecycle.rs - 推理生命周期测试
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

use std::sync::Arc;

use image::{Rgb, RgbImage};
use shanan_roi::{
  FromUrl,
  engine::{OutputTensor, ThreadedEngine},
  frame::{CropBlob, Rect},
  inference::{DetectionOptions, EmotionsDetection, Inference, InferenceError, RoiResult, WaitMode},
  model::{EMOTION_LABELS, EmotionDetectionModel, EmotionDetectionModelBuilder},
  output::LogOutput,
};
use url::Url;

fn init_tracing() {
  let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// 根据裁剪图像的红色通道均值决定类别，模拟一个确定性的分类器
fn classify_by_red(batch: &[CropBlob]) -> Result<OutputTensor, String> {
  let labels = EMOTION_LABELS.len();
  let mut data = Vec::with_capacity(batch.len() * labels);
  for blob in batch {
    let red = blob.as_bytes()[0] as usize;
    let class = red % labels;
    data.extend((0..labels).map(|c| if c == class { 0.9 } else { 0.025 }));
  }
  Ok(OutputTensor::new(vec![batch.len(), labels], data))
}

fn model() -> Arc<EmotionDetectionModel> {
  let url = Url::parse("emotions:///models/emotions.rknn?input=16x16&batch=8").unwrap();
  Arc::new(EmotionDetectionModelBuilder::from_url(&url).unwrap().build().unwrap())
}

/// 每个 16x16 的格子用不同红色值填充，红色值决定类别
fn frame() -> RgbImage {
  RgbImage::from_fn(64, 64, |x, y| {
    let cell = (y / 16) * 4 + x / 16;
    Rgb([cell as u8, 0, 0])
  })
}

fn cell(idx: i32) -> Rect {
  Rect::new((idx % 4) * 16, (idx / 4) * 16, 16, 16)
}

fn detector() -> EmotionsDetection<EmotionDetectionModel, ThreadedEngine> {
  init_tracing();
  EmotionsDetection::new(model(), ThreadedEngine::new(classify_by_red))
}

#[test]
fn results_match_enqueue_order() {
  let mut det = detector();
  let rois: Vec<Rect> = [5, 0, 11, 3, 7].into_iter().map(cell).collect();
  for roi in &rois {
    det.enqueue(&frame(), *roi).unwrap();
  }
  det.submit_request().unwrap();
  det.fetch_results().unwrap();

  assert_eq!(det.results_len(), rois.len());
  for (idx, roi) in rois.iter().enumerate() {
    let result = det.location_result(idx).unwrap();
    assert_eq!(result.location(), roi);
  }
  let labels: Vec<&str> = det.results().iter().map(|r| r.label()).collect();
  assert_eq!(labels, ["neutral", "neutral", "happiness", "surprise", "sadness"]);
}

#[test]
fn fetch_before_submit_leaves_store_unchanged() {
  let mut det = detector();
  det.enqueue(&frame(), cell(1)).unwrap();
  det.submit_request().unwrap();
  det.fetch_results().unwrap();
  let before = det.results().to_vec();

  assert!(matches!(det.fetch_results(), Err(InferenceError::NoRequest)));
  assert_eq!(det.results(), before.as_slice());
}

#[test]
fn second_submit_is_rejected() {
  let mut det = detector();
  det.enqueue(&frame(), cell(0)).unwrap();
  det.submit_request().unwrap();
  assert!(matches!(
    det.submit_request(),
    Err(InferenceError::RequestInFlight)
  ));
  det.fetch_results().unwrap();
  assert_eq!(det.results_len(), 1);
}

#[test]
fn out_of_bounds_roi_does_not_grow_batch() {
  let mut det = detector();
  det.enqueue(&frame(), cell(0)).unwrap();
  assert!(det.enqueue(&frame(), Rect::new(56, 56, 16, 16)).is_err());
  assert!(det.enqueue(&frame(), Rect::new(-4, 0, 8, 8)).is_err());
  det.enqueue(&frame(), cell(2)).unwrap();
  det.submit_request().unwrap();
  det.fetch_results().unwrap();
  assert_eq!(det.results_len(), 2);
}

#[test]
fn label_filter_keeps_store_order() {
  let mut det = detector();
  // 1 -> happiness, 2 -> sadness, 6 -> happiness
  let rois = [cell(1), cell(2), cell(6)];
  for roi in rois {
    det.enqueue(&frame(), roi).unwrap();
  }
  det.submit_request().unwrap();
  det.fetch_results().unwrap();

  assert_eq!(det.filtered_rois("label=happiness"), vec![rois[0], rois[2]]);
  assert_eq!(det.filtered_rois("label = anger"), Vec::<Rect>::new());
  assert!(det.filtered_rois("label ~ happiness").is_empty());
}

#[test]
fn new_cycle_has_no_stale_entries() {
  let mut det = detector();
  for idx in 0..6 {
    det.enqueue(&frame(), cell(idx)).unwrap();
  }
  det.submit_request().unwrap();
  det.fetch_results().unwrap();
  assert_eq!(det.results_len(), 6);

  det.enqueue(&frame(), cell(9)).unwrap();
  det.enqueue(&frame(), cell(4)).unwrap();
  det.submit_request().unwrap();
  det.fetch_results().unwrap();
  assert_eq!(det.results_len(), 2);
  assert_eq!(det.location_result(0).unwrap().location(), &cell(9));
  assert_eq!(det.location_result(1).unwrap().location(), &cell(4));
}

#[test]
fn poll_mode_with_worker_thread() {
  init_tracing();
  let url = Url::parse("emotions:///models/emotions.rknn?wait=poll").unwrap();
  let options = DetectionOptions::from_url(&url).unwrap();
  assert_eq!(options.wait_mode, WaitMode::Poll);

  let mut det = EmotionsDetection::with_options(model(), ThreadedEngine::new(classify_by_red), options);
  det.enqueue(&frame(), cell(3)).unwrap();
  det.submit_request().unwrap();

  loop {
    match det.fetch_results() {
      Ok(()) => break,
      Err(InferenceError::NotReady) => std::thread::yield_now(),
      Err(e) => panic!("unexpected error: {e}"),
    }
  }
  assert_eq!(det.results()[0].label(), "surprise");
}

#[test]
fn worker_failure_is_a_soft_failure() {
  init_tracing();
  let mut det = EmotionsDetection::new(model(), ThreadedEngine::new(|_| Err("NPU 超时".to_string())));
  det.enqueue(&frame(), cell(0)).unwrap();
  det.submit_request().unwrap();
  assert!(matches!(det.fetch_results(), Err(InferenceError::Backend(_))));
  assert_eq!(det.results_len(), 0);

  det.enqueue(&frame(), cell(1)).unwrap();
  assert!(det.submit_request().is_ok());
}

#[test]
fn observe_output_sees_current_store() {
  let mut det = detector();
  det.enqueue(&frame(), cell(4)).unwrap();
  det.submit_request().unwrap();
  det.fetch_results().unwrap();

  let output = LogOutput::from_url(&Url::parse("log:stdout").unwrap()).unwrap();
  assert!(det.observe_output(&output).is_ok());
  assert_eq!(det.location_result(0).unwrap().confidence(), 0.9);
}

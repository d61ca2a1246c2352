// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型描述
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fmt;

use crate::frame::TensorLayout;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TensorShape(pub Vec<usize>);

impl TensorShape {
  pub fn dims(&self) -> &[usize] {
    &self.0
  }
}

impl From<Vec<usize>> for TensorShape {
  fn from(dims: Vec<usize>) -> Self {
    TensorShape(dims)
  }
}

impl fmt::Display for TensorShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let dims: Vec<String> = self.0.iter().map(|d| d.to_string()).collect();
    write!(f, "[{}]", dims.join("x"))
  }
}

/// 已加载模型对外暴露的元数据，只读
pub trait ValidModel {
  fn input_shape(&self) -> &TensorShape;
  fn output_shape(&self) -> &TensorShape;
  fn labels(&self) -> &[String];
  fn input_layout(&self) -> TensorLayout;
  fn max_batch_size(&self) -> usize;

  /// 从输入形状中取出 (W, H)
  fn input_size(&self) -> (u32, u32) {
    let dims = self.input_shape().dims();
    if dims.len() != 4 {
      return (0, 0);
    }
    let (h, w) = match self.input_layout() {
      TensorLayout::Nchw => (dims[2], dims[3]),
      TensorLayout::Nhwc => (dims[1], dims[2]),
    };
    (w as u32, h as u32)
  }
}

mod emotion_detection_model;
pub use self::emotion_detection_model::{
  EMOTION_LABELS, EmotionDetectionModel, EmotionDetectionModelBuilder, EmotionModelError,
};

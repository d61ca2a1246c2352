// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - ROI 矩形与裁剪张量定义
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

use std::{fmt, str::FromStr};

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
  #[error("ROI 面积无效: {0}")]
  EmptyRoi(Rect),
  #[error("ROI {roi} 超出帧范围 {width}x{height}")]
  RoiOutOfBounds { roi: Rect, width: u32, height: u32 },
  #[error("目标尺寸无效: {0}x{1}")]
  InvalidTargetSize(u32, u32),
  #[error("未知的张量布局: {0}")]
  UnknownLayout(String),
}

/// 帧坐标系下的矩形区域，左上角为 (x, y)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
}

impl Rect {
  pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.width <= 0 || self.height <= 0
  }

  pub fn right(&self) -> i64 {
    self.x as i64 + self.width as i64
  }

  pub fn bottom(&self) -> i64 {
    self.y as i64 + self.height as i64
  }

  /// 检查矩形是否完整落在 `width` x `height` 的帧内
  pub fn check_within(&self, width: u32, height: u32) -> Result<(), FrameError> {
    if self.is_empty() {
      return Err(FrameError::EmptyRoi(*self));
    }
    if self.x < 0 || self.y < 0 || self.right() > width as i64 || self.bottom() > height as i64 {
      return Err(FrameError::RoiOutOfBounds {
        roi: *self,
        width,
        height,
      });
    }
    Ok(())
  }
}

impl fmt::Display for Rect {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "[{}, {}, {}x{}]",
      self.x, self.y, self.width, self.height
    )
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
  Nchw,
  #[default]
  Nhwc,
}

impl FromStr for TensorLayout {
  type Err = FrameError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "nchw" => Ok(TensorLayout::Nchw),
      "nhwc" => Ok(TensorLayout::Nhwc),
      other => Err(FrameError::UnknownLayout(other.to_string())),
    }
  }
}

/// 裁剪并缩放到模型输入尺寸后的 RGB u8 数据
#[derive(Debug, Clone)]
pub struct CropBlob {
  data: Box<[u8]>,
  width: u32,
  height: u32,
  layout: TensorLayout,
}

impl CropBlob {
  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn layout(&self) -> TensorLayout {
    self.layout
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  fn from_rgb_image(image: RgbImage, layout: TensorLayout) -> Self {
    let (width, height) = image.dimensions();
    let data = match layout {
      TensorLayout::Nhwc => image.into_raw(),
      TensorLayout::Nchw => {
        let plane_size = (width * height) as usize;
        let mut data = vec![0u8; plane_size * RGB_CHANNELS];
        for (idx, pixel) in image.pixels().enumerate() {
          data[idx] = pixel[0];
          data[plane_size + idx] = pixel[1];
          data[2 * plane_size + idx] = pixel[2];
        }
        data
      }
    };

    Self {
      data: data.into_boxed_slice(),
      width,
      height,
      layout,
    }
  }
}

/// 从整帧中裁剪 `roi` 并缩放为 `width` x `height`
pub fn crop_and_resize(
  frame: &RgbImage,
  roi: &Rect,
  width: u32,
  height: u32,
  layout: TensorLayout,
) -> Result<CropBlob, FrameError> {
  if width == 0 || height == 0 {
    return Err(FrameError::InvalidTargetSize(width, height));
  }
  roi.check_within(frame.width(), frame.height())?;

  let cropped = image::imageops::crop_imm(
    frame,
    roi.x as u32,
    roi.y as u32,
    roi.width as u32,
    roi.height as u32,
  )
  .to_image();

  let resized = if cropped.dimensions() == (width, height) {
    cropped
  } else {
    image::imageops::resize(&cropped, width, height, FilterType::Triangle)
  };

  Ok(CropBlob::from_rgb_image(resized, layout))
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - 帧与批次定义
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

use std::fmt;

use image::RgbImage;
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

/// 图像尺寸（宽 x 高）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
  pub width: u32,
  pub height: u32,
}

impl Size {
  pub const fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }

  /// 任一维度为 0 即视为空
  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }

  pub fn area(&self) -> usize {
    self.width as usize * self.height as usize
  }
}

impl fmt::Display for Size {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

/// 交错像素的通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

impl ChannelOrder {
  /// 返回 RGB 通道 `c` 在该顺序下的源通道下标
  pub fn source_channel(&self, c: usize) -> usize {
    match self {
      ChannelOrder::Rgb => c,
      ChannelOrder::Bgr => RGB_CHANNELS - 1 - c,
    }
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 单帧图像，HWC 交错字节布局，构造后不可变
#[derive(Debug, Clone)]
pub struct Frame {
  id: String,
  size: Size,
  order: ChannelOrder,
  data: Box<[u8]>,
}

impl Frame {
  pub fn new(
    id: impl Into<String>,
    size: Size,
    order: ChannelOrder,
    data: Vec<u8>,
  ) -> Result<Self, FrameError> {
    let expected = size.area() * RGB_CHANNELS;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      id: id.into(),
      size,
      order,
      data: data.into_boxed_slice(),
    })
  }

  pub fn from_rgb_image(id: impl Into<String>, image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      id: id.into(),
      size: Size::new(width, height),
      order: ChannelOrder::Rgb,
      data: image.into_raw().into_boxed_slice(),
    }
  }

  /// 帧标识（文件名或采集序号），用于检测报告
  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn size(&self) -> Size {
    self.size
  }

  pub fn width(&self) -> usize {
    self.size.width as usize
  }

  pub fn height(&self) -> usize {
    self.size.height as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn order(&self) -> ChannelOrder {
    self.order
  }

  pub fn as_hwc(&self) -> &[u8] {
    &self.data
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BatchError {
  #[error("批次为空")]
  Empty,
  #[error("批次大小 {len} 超过最大批次 {max}")]
  TooLarge { len: usize, max: usize },
  #[error("批次内分辨率不一致: 槽位 {slot} 为 {actual}, 期望 {expected}")]
  MixedResolution {
    slot: usize,
    expected: Size,
    actual: Size,
  },
}

/// 一个批次：1..=N 帧，分辨率一致
#[derive(Debug)]
pub struct Batch<'a> {
  frames: Vec<&'a Frame>,
  size: Size,
}

impl<'a> Batch<'a> {
  pub fn new(frames: Vec<&'a Frame>, max_batch_size: usize) -> Result<Self, BatchError> {
    let size = frames.first().ok_or(BatchError::Empty)?.size();

    if frames.len() > max_batch_size {
      return Err(BatchError::TooLarge {
        len: frames.len(),
        max: max_batch_size,
      });
    }

    if let Some((slot, frame)) = frames
      .iter()
      .enumerate()
      .find(|(_, frame)| frame.size() != size)
    {
      return Err(BatchError::MixedResolution {
        slot,
        expected: size,
        actual: frame.size(),
      });
    }

    Ok(Self { frames, size })
  }

  pub fn len(&self) -> usize {
    self.frames.len()
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }

  pub fn size(&self) -> Size {
    self.size
  }

  pub fn iter(&self) -> impl Iterator<Item = &'a Frame> + '_ {
    self.frames.iter().copied()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn solid(id: &str, size: Size) -> Frame {
    Frame::new(id, size, ChannelOrder::Rgb, vec![7; size.area() * 3]).unwrap()
  }

  #[test]
  fn test_frame_rejects_wrong_length() {
    let err = Frame::new("bad", Size::new(4, 2), ChannelOrder::Bgr, vec![0; 10]).unwrap_err();
    assert_eq!(
      err,
      FrameError::LengthMismatch {
        expected: 24,
        actual: 10
      }
    );
  }

  #[test]
  fn test_zero_sized_frame_is_constructible() {
    let frame = Frame::new("empty", Size::new(0, 480), ChannelOrder::Rgb, Vec::new()).unwrap();
    assert!(frame.size().is_empty());
  }

  #[test]
  fn test_bgr_source_channel() {
    assert_eq!(ChannelOrder::Bgr.source_channel(0), 2);
    assert_eq!(ChannelOrder::Bgr.source_channel(2), 0);
    assert_eq!(ChannelOrder::Rgb.source_channel(1), 1);
  }

  #[test]
  fn test_batch_invariants() {
    let a = solid("a", Size::new(8, 6));
    let b = solid("b", Size::new(8, 6));
    let c = solid("c", Size::new(6, 8));

    assert_eq!(Batch::new(vec![], 4).unwrap_err(), BatchError::Empty);
    assert_eq!(
      Batch::new(vec![&a, &b], 1).unwrap_err(),
      BatchError::TooLarge { len: 2, max: 1 }
    );
    assert!(matches!(
      Batch::new(vec![&a, &c], 4).unwrap_err(),
      BatchError::MixedResolution { slot: 1, .. }
    ));

    let batch = Batch::new(vec![&a, &b], 2).unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.size(), Size::new(8, 6));
    assert_eq!(batch.iter().map(Frame::id).collect::<Vec<_>>(), ["a", "b"]);
  }
}

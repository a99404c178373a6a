// 该文件是 Shanan （山南西风） 项目的一部分。
// src/buffer.rs - 批次帧缓冲区
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

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  config::PipelineConfig,
  frame::{Frame, RGB_CHANNELS, Size},
  transform::{GeometryError, LetterboxTransform},
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BufferError {
  #[error("槽位 {slot} 超出最大批次 {max}")]
  SlotOutOfRange { slot: usize, max: usize },
  #[error("槽位必须从 0 连续分配: 期望 {expected}, 实际 {slot}")]
  SlotOutOfOrder { expected: usize, slot: usize },
  #[error("变换目标尺寸 {actual} 与缓冲区尺寸 {expected} 不一致")]
  TargetMismatch { expected: Size, actual: Size },
  #[error("预处理失败: {0}")]
  Geometry(#[from] GeometryError),
}

/// 按最大批次一次性分配的暂存区：目标尺寸画布 + NCHW 归一化张量
///
/// 不可重入：所有写操作都需要 `&mut self`。
pub struct BatchFrameBuffer {
  target: Size,
  max_batch_size: usize,
  pad_value: u8,
  canvas: RgbImage,
  tensor: Box<[f32]>,
  loaded: usize,
}

/// 推理输入绑定：已装载槽位对应的张量前缀与真实批次数
#[derive(Debug, Clone, Copy)]
pub struct TensorHandle<'a> {
  data: &'a [f32],
  batch_size: usize,
}

impl<'a> TensorHandle<'a> {
  pub fn as_slice(&self) -> &'a [f32] {
    self.data
  }

  pub fn batch_size(&self) -> usize {
    self.batch_size
  }
}

impl BatchFrameBuffer {
  pub fn new(config: &PipelineConfig) -> Self {
    let target = config.target();
    let max_batch_size = config.max_batch_size();
    let slot_len = RGB_CHANNELS * target.area();
    debug!(
      "分配批次缓冲区: {} x {} ({} 个浮点数)",
      max_batch_size,
      target,
      max_batch_size * slot_len
    );

    Self {
      target,
      max_batch_size,
      pad_value: config.pad_value(),
      canvas: RgbImage::new(target.width, target.height),
      tensor: vec![0.0; max_batch_size * slot_len].into_boxed_slice(),
      loaded: 0,
    }
  }

  pub fn reset(&mut self) {
    self.loaded = 0;
  }

  pub fn len(&self) -> usize {
    self.loaded
  }

  pub fn is_empty(&self) -> bool {
    self.loaded == 0
  }

  pub fn max_batch_size(&self) -> usize {
    self.max_batch_size
  }

  fn slot_len(&self) -> usize {
    RGB_CHANNELS * self.target.area()
  }

  /// 把一帧变换后写入槽位 `slot`，槽位必须等于已装载数
  pub fn load_frame(
    &mut self,
    frame: &Frame,
    slot: usize,
    transform: &LetterboxTransform,
  ) -> Result<(), BufferError> {
    if slot >= self.max_batch_size {
      return Err(BufferError::SlotOutOfRange {
        slot,
        max: self.max_batch_size,
      });
    }
    if slot != self.loaded {
      return Err(BufferError::SlotOutOfOrder {
        expected: self.loaded,
        slot,
      });
    }
    if transform.target() != self.target {
      return Err(BufferError::TargetMismatch {
        expected: self.target,
        actual: transform.target(),
      });
    }

    let slot_len = self.slot_len();
    let dst = &mut self.tensor[slot * slot_len..(slot + 1) * slot_len];
    transform.forward(frame, &mut self.canvas, dst, self.pad_value)?;
    self.loaded += 1;
    Ok(())
  }

  pub fn tensor_handle(&self) -> TensorHandle<'_> {
    TensorHandle {
      data: &self.tensor[..self.loaded * self.slot_len()],
      batch_size: self.loaded,
    }
  }
}

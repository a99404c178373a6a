// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 检测结果与引擎原始输出
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

/// 每个候选框的字段数: [cx, cy, w, h, confidence, class_id]
pub const DETECTION_FIELDS: usize = 6;

/// 单槽位步长：1 个计数字段 + 容量个候选框
pub const fn slot_stride(max_detections: usize) -> usize {
  1 + DETECTION_FIELDS * max_detections
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，原图坐标，未裁剪
}

/// 单张图像的检测结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 引擎输出的扁平缓冲区
///
/// 每个槽位布局为 `[count, cx, cy, w, h, conf, cls, cx, ...]`，
/// 步长固定为 `slot_stride(max_detections)`，坐标位于推理分辨率空间。
#[derive(Debug, Clone)]
pub struct RawDetectionOutput {
  data: Box<[f32]>,
  max_detections: usize,
  batch_size: usize,
}

impl RawDetectionOutput {
  /// 按最大批次预分配，推理时原地覆盖
  pub fn with_capacity(max_batch_size: usize, max_detections: usize) -> Self {
    Self {
      data: vec![0.0; max_batch_size * slot_stride(max_detections)].into_boxed_slice(),
      max_detections,
      batch_size: 0,
    }
  }

  pub fn max_detections(&self) -> usize {
    self.max_detections
  }

  pub fn slot_stride(&self) -> usize {
    slot_stride(self.max_detections)
  }

  pub fn max_batch_size(&self) -> usize {
    self.data.len() / self.slot_stride()
  }

  /// 最近一次推理写入的有效槽位数
  pub fn batch_size(&self) -> usize {
    self.batch_size
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  /// 前 `batch_size` 个槽位的可写区域，供引擎写入
  pub fn prepare(&mut self, batch_size: usize) -> &mut [f32] {
    self.batch_size = batch_size;
    let end = (batch_size * self.slot_stride()).min(self.data.len());
    &mut self.data[..end]
  }

  /// 读取单个槽位，超出缓冲区时返回 `None`
  pub fn slot(&self, index: usize) -> Option<&[f32]> {
    let stride = self.slot_stride();
    self.data.get(index * stride..(index + 1) * stride)
  }

  /// 写入一个槽位的候选框，超过容量的部分被截断
  pub fn write_slot(&mut self, index: usize, candidates: &[[f32; DETECTION_FIELDS]]) {
    let stride = self.slot_stride();
    let count = candidates.len().min(self.max_detections);
    let slot = &mut self.data[index * stride..(index + 1) * stride];
    slot[0] = count as f32;
    for (dst, candidate) in slot[1..]
      .chunks_exact_mut(DETECTION_FIELDS)
      .zip(candidates.iter().take(count))
    {
      dst.copy_from_slice(candidate);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_layout() {
    let mut raw = RawDetectionOutput::with_capacity(2, 3);
    assert_eq!(raw.slot_stride(), 19);
    assert_eq!(raw.max_batch_size(), 2);

    raw.write_slot(1, &[[1.0, 2.0, 3.0, 4.0, 0.5, 7.0]]);
    let slot = raw.slot(1).unwrap();
    assert_eq!(slot[0], 1.0);
    assert_eq!(&slot[1..7], &[1.0, 2.0, 3.0, 4.0, 0.5, 7.0]);
    assert!(raw.slot(2).is_none());
  }

  #[test]
  fn test_write_slot_truncates_to_capacity() {
    let mut raw = RawDetectionOutput::with_capacity(1, 1);
    raw.write_slot(0, &[[0.0; 6], [1.0; 6]]);
    assert_eq!(raw.slot(0).unwrap()[0], 1.0);
  }

  #[test]
  fn test_prepare_sets_batch_size() {
    let mut raw = RawDetectionOutput::with_capacity(4, 2);
    assert_eq!(raw.prepare(3).len(), 3 * 13);
    assert_eq!(raw.batch_size(), 3);
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/decoder.rs - 检测结果解码与批内非极大值抑制
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

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  config::{PipelineConfig, SuppressionMode},
  model::{DETECTION_FIELDS, DetectResult, Detection, RawDetectionOutput},
  transform::LetterboxTransform,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
  #[error("槽位 {slot} 不在输出缓冲区内")]
  SlotMissing { slot: usize },
  #[error("槽位 {slot} 的检测数量无效: {count}")]
  InvalidCount { slot: usize, count: f32 },
  #[error("槽位 {slot} 的检测数量 {count} 超过容量 {capacity}")]
  CountOverflow {
    slot: usize,
    count: usize,
    capacity: usize,
  },
}

/// 转为角点格式后的候选框，`slot` 记录其所属槽位
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
  slot: usize,
  class_id: u32,
  score: f32,
  bbox: [f32; 4],
}

impl Candidate {
  fn into_detection(self) -> Detection {
    Detection {
      class_id: self.class_id,
      score: self.score,
      bbox: self.bbox,
    }
  }
}

pub struct Decoder {
  conf_threshold: f32,
  iou_threshold: f32,
  mode: SuppressionMode,
  class_aware: bool,
}

impl Decoder {
  pub fn new(config: &PipelineConfig) -> Self {
    Self {
      conf_threshold: config.conf_threshold(),
      iou_threshold: config.iou_threshold(),
      mode: config.suppression(),
      class_aware: config.class_aware(),
    }
  }

  /// 读取槽位 `slot` 的候选框，并丢弃置信度不高于阈值的项
  pub fn slot_candidates<'a>(
    &self,
    raw: &'a RawDetectionOutput,
    slot: usize,
  ) -> Result<Vec<&'a [f32]>, DecodeError> {
    let data = raw.slot(slot).ok_or(DecodeError::SlotMissing { slot })?;
    let count = data[0];
    if !count.is_finite() || count < 0.0 {
      return Err(DecodeError::InvalidCount { slot, count });
    }
    let count = count as usize;
    if count > raw.max_detections() {
      return Err(DecodeError::CountOverflow {
        slot,
        count,
        capacity: raw.max_detections(),
      });
    }

    Ok(
      data[1..]
        .chunks_exact(DETECTION_FIELDS)
        .take(count)
        .filter(|tuple| tuple[4] > self.conf_threshold)
        .collect(),
    )
  }

  /// 解码一个批次，返回与槽位一一对应的检测结果
  ///
  /// 解析失败的槽位记录警告并返回空结果，不影响其他槽位。
  pub fn decode(
    &self,
    raw: &RawDetectionOutput,
    batch_size: usize,
    transform: &LetterboxTransform,
  ) -> Vec<DetectResult> {
    let results = match self.mode {
      SuppressionMode::SharedSpace if batch_size > 1 => {
        self.decode_shared_space(raw, batch_size, transform)
      }
      _ => self.decode_per_slot(raw, batch_size, transform),
    };

    debug!(
      "解码完成: 批次 {}, 检测数 {:?}",
      batch_size,
      results.iter().map(DetectResult::len).collect::<Vec<_>>()
    );
    results
  }

  fn candidates_or_empty<'a>(&self, raw: &'a RawDetectionOutput, slot: usize) -> Vec<&'a [f32]> {
    self.slot_candidates(raw, slot).unwrap_or_else(|e| {
      warn!("丢弃槽位 {} 的检测结果: {}", slot, e);
      Vec::new()
    })
  }

  fn decode_per_slot(
    &self,
    raw: &RawDetectionOutput,
    batch_size: usize,
    transform: &LetterboxTransform,
  ) -> Vec<DetectResult> {
    (0..batch_size)
      .map(|slot| {
        let mut candidates: Vec<Candidate> = self
          .candidates_or_empty(raw, slot)
          .into_iter()
          .map(|tuple| Candidate {
            slot,
            class_id: tuple[5] as u32,
            score: tuple[4],
            bbox: transform.inverse([tuple[0], tuple[1], tuple[2], tuple[3]]),
          })
          .collect();
        non_max_suppression(&mut candidates, self.iou_threshold, self.class_aware);
        DetectResult::from(
          candidates
            .into_iter()
            .map(Candidate::into_detection)
            .collect::<Vec<_>>(),
        )
      })
      .collect()
  }

  /// 把各槽位平移到互不相交的坐标空间后做一次统一抑制
  ///
  /// 平移量为 `(2 * target_w * i, 2 * target_h * i)`；候选框显式携带槽位号，
  /// 还原时按槽位号分组，而不是按坐标回绕推断。
  fn decode_shared_space(
    &self,
    raw: &RawDetectionOutput,
    batch_size: usize,
    transform: &LetterboxTransform,
  ) -> Vec<DetectResult> {
    let target = transform.target();
    let offset = |slot: usize| {
      (
        2.0 * target.width as f32 * slot as f32,
        2.0 * target.height as f32 * slot as f32,
      )
    };

    let mut pooled = Vec::new();
    for slot in 0..batch_size {
      let (dx, dy) = offset(slot);
      pooled.extend(
        self
          .candidates_or_empty(raw, slot)
          .into_iter()
          .map(|tuple| Candidate {
            slot,
            class_id: tuple[5] as u32,
            score: tuple[4],
            bbox: transform.inverse([tuple[0] + dx, tuple[1] + dy, tuple[2], tuple[3]]),
          }),
      );
    }

    non_max_suppression(&mut pooled, self.iou_threshold, self.class_aware);

    let mut groups = vec![Vec::new(); batch_size];
    for mut candidate in pooled {
      let (dx, dy) = offset(candidate.slot);
      let (dx, dy) = (transform.unscale(dx), transform.unscale(dy));
      candidate.bbox[0] -= dx;
      candidate.bbox[1] -= dy;
      candidate.bbox[2] -= dx;
      candidate.bbox[3] -= dy;
      groups[candidate.slot].push(candidate.into_detection());
    }
    groups.into_iter().map(DetectResult::from).collect()
  }
}

/// 两个角点格式框的交并比
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 按分数降序（稳定排序，分数相同时先插入者优先）保留候选框，
/// 与已保留框 IoU 超过阈值的候选框被丢弃
fn non_max_suppression(xs: &mut Vec<Candidate>, iou_threshold: f32, class_aware: bool) {
  xs.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut current_index = 0;
  for index in 0..xs.len() {
    let mut drop = false;
    for prev_index in 0..current_index {
      if class_aware && xs[prev_index].class_id != xs[index].class_id {
        continue;
      }
      if iou(&xs[prev_index].bbox, &xs[index].bbox) > iou_threshold {
        drop = true;
        break;
      }
    }
    if !drop {
      xs.swap(current_index, index);
      current_index += 1;
    }
  }
  xs.truncate(current_index);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::Size;

  fn decoder(conf: f32, iou: f32, mode: SuppressionMode, class_aware: bool) -> Decoder {
    let config = PipelineConfig::builder()
      .input(Size::new(640, 480))
      .target(Size::new(640, 640))
      .conf_threshold(conf)
      .iou_threshold(iou)
      .max_batch_size(4)
      .suppression(mode)
      .class_aware(class_aware)
      .build()
      .unwrap();
    Decoder::new(&config)
  }

  fn transform() -> LetterboxTransform {
    LetterboxTransform::compute(Size::new(640, 480), Size::new(640, 640)).unwrap()
  }

  fn candidate(score: f32, bbox: [f32; 4]) -> Candidate {
    Candidate {
      slot: 0,
      class_id: 0,
      score,
      bbox,
    }
  }

  #[test]
  fn test_iou() {
    let a = [0.0, 0.0, 10.0, 10.0];
    assert_eq!(iou(&a, &a), 1.0);
    assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
    let half = iou(&a, &[5.0, 0.0, 15.0, 10.0]);
    assert!((half - 50.0 / 150.0).abs() < 1e-6);
    assert_eq!(iou(&[1.0, 1.0, 1.0, 1.0], &[1.0, 1.0, 1.0, 1.0]), 0.0);
  }

  #[test]
  fn test_nms_keeps_higher_score() {
    let mut xs = vec![
      candidate(0.5, [0.0, 0.0, 10.0, 10.0]),
      candidate(0.9, [1.0, 1.0, 11.0, 11.0]),
      candidate(0.7, [100.0, 100.0, 110.0, 110.0]),
    ];
    non_max_suppression(&mut xs, 0.4, true);
    assert_eq!(xs.len(), 2);
    assert_eq!(xs[0].score, 0.9);
    assert_eq!(xs[1].score, 0.7);
  }

  #[test]
  fn test_nms_tie_keeps_earlier() {
    let mut first = candidate(0.8, [0.0, 0.0, 10.0, 10.0]);
    first.class_id = 1;
    let mut second = candidate(0.8, [0.0, 0.0, 10.0, 10.0]);
    second.class_id = 1;
    second.slot = 9;
    let mut xs = vec![first, second];
    non_max_suppression(&mut xs, 0.4, true);
    assert_eq!(xs, vec![first]);
  }

  #[test]
  fn test_nms_class_aware_and_agnostic() {
    let a = candidate(0.9, [0.0, 0.0, 10.0, 10.0]);
    let mut b = candidate(0.8, [0.0, 0.0, 10.0, 10.0]);
    b.class_id = 3;

    let mut aware = vec![a, b];
    non_max_suppression(&mut aware, 0.4, true);
    assert_eq!(aware.len(), 2);

    let mut agnostic = vec![a, b];
    non_max_suppression(&mut agnostic, 0.4, false);
    assert_eq!(agnostic, vec![a]);
  }

  #[test]
  fn test_single_box_letterbox_inverse() {
    let mut raw = RawDetectionOutput::with_capacity(1, 8);
    raw.write_slot(0, &[[320.0, 240.0, 100.0, 50.0, 0.9, 0.0]]);

    let results = decoder(0.1, 0.4, SuppressionMode::PerSlot, true).decode(&raw, 1, &transform());
    assert_eq!(results.len(), 1);
    let items = &results[0].items;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].class_id, 0);
    assert_eq!(items[0].score, 0.9);
    assert_eq!(items[0].bbox, [270.0, 135.0, 370.0, 185.0]);
  }

  #[test]
  fn test_confidence_filter_is_strict_and_monotonic() {
    let mut raw = RawDetectionOutput::with_capacity(1, 8);
    raw.write_slot(
      0,
      &[
        [10.0, 10.0, 4.0, 4.0, 0.1, 0.0],
        [50.0, 50.0, 4.0, 4.0, 0.3, 0.0],
        [90.0, 90.0, 4.0, 4.0, 0.6, 0.0],
        [130.0, 130.0, 4.0, 4.0, 0.95, 0.0],
      ],
    );

    let mut previous = usize::MAX;
    for conf in [0.0, 0.1, 0.2, 0.3, 0.5, 0.9, 1.0] {
      let survivors = decoder(conf, 0.4, SuppressionMode::PerSlot, true)
        .slot_candidates(&raw, 0)
        .unwrap()
        .len();
      assert!(survivors <= previous);
      previous = survivors;
    }
    // 置信度恰好等于阈值的候选框被丢弃
    let at_threshold = decoder(0.1, 0.4, SuppressionMode::PerSlot, true)
      .slot_candidates(&raw, 0)
      .unwrap();
    assert_eq!(at_threshold.len(), 3);
  }

  #[test]
  fn test_batch_isolation_both_modes() {
    let tuple = [320.0, 320.0, 200.0, 200.0, 0.8, 2.0];
    let mut raw = RawDetectionOutput::with_capacity(2, 8);
    raw.write_slot(0, &[tuple]);
    raw.write_slot(1, &[tuple]);

    for mode in [SuppressionMode::PerSlot, SuppressionMode::SharedSpace] {
      let results = decoder(0.1, 0.4, mode, false).decode(&raw, 2, &transform());
      assert_eq!(results.len(), 2);
      assert_eq!(results[0].len(), 1);
      assert_eq!(results[1].len(), 1);
      for result in &results {
        let bbox = result.items[0].bbox;
        let expected = [220.0, 140.0, 420.0, 340.0];
        for (a, b) in bbox.iter().zip(expected.iter()) {
          assert!((a - b).abs() < 1e-3, "{:?} {:?}", bbox, expected);
        }
      }
    }
  }

  #[test]
  fn test_same_slot_overlap_collapses() {
    let mut raw = RawDetectionOutput::with_capacity(2, 8);
    raw.write_slot(
      0,
      &[
        [320.0, 320.0, 200.0, 200.0, 0.7, 2.0],
        [322.0, 322.0, 200.0, 200.0, 0.8, 2.0],
      ],
    );
    raw.write_slot(1, &[]);

    for mode in [SuppressionMode::PerSlot, SuppressionMode::SharedSpace] {
      let results = decoder(0.1, 0.4, mode, true).decode(&raw, 2, &transform());
      assert_eq!(results[0].len(), 1);
      assert_eq!(results[0].items[0].score, 0.8);
      assert!(results[1].is_empty());
    }
  }

  #[test]
  fn test_empty_slot_yields_empty_group() {
    let mut raw = RawDetectionOutput::with_capacity(3, 4);
    raw.write_slot(0, &[]);
    raw.write_slot(1, &[[100.0, 100.0, 10.0, 10.0, 0.5, 1.0]]);
    raw.write_slot(2, &[]);
    let results = decoder(0.1, 0.4, SuppressionMode::PerSlot, true).decode(&raw, 3, &transform());
    assert_eq!(
      results.iter().map(DetectResult::len).collect::<Vec<_>>(),
      [0, 1, 0]
    );
  }

  #[test]
  fn test_malformed_slot_is_isolated() {
    let mut raw = RawDetectionOutput::with_capacity(2, 2);
    raw.write_slot(0, &[[100.0, 100.0, 10.0, 10.0, 0.5, 1.0]]);
    raw.write_slot(1, &[[100.0, 100.0, 10.0, 10.0, 0.5, 1.0]]);
    // 槽位 0 的计数超过容量
    raw.prepare(2)[0] = 5.0;

    let d = decoder(0.1, 0.4, SuppressionMode::PerSlot, true);
    assert_eq!(
      d.slot_candidates(&raw, 0),
      Err(DecodeError::CountOverflow {
        slot: 0,
        count: 5,
        capacity: 2
      })
    );
    assert_eq!(
      d.slot_candidates(&raw, 7),
      Err(DecodeError::SlotMissing { slot: 7 })
    );

    for mode in [SuppressionMode::PerSlot, SuppressionMode::SharedSpace] {
      let results = decoder(0.1, 0.4, mode, true).decode(&raw, 2, &transform());
      assert!(results[0].is_empty());
      assert_eq!(results[1].len(), 1);
    }
  }

  #[test]
  fn test_shared_space_matches_per_slot() {
    let mut raw = RawDetectionOutput::with_capacity(3, 8);
    raw.write_slot(
      0,
      &[
        [100.0, 200.0, 50.0, 40.0, 0.9, 0.0],
        [104.0, 202.0, 50.0, 40.0, 0.6, 0.0],
        [500.0, 400.0, 30.0, 30.0, 0.4, 1.0],
      ],
    );
    raw.write_slot(1, &[[600.0, 560.0, 60.0, 60.0, 0.7, 0.0]]);
    raw.write_slot(
      2,
      &[
        [10.0, 90.0, 20.0, 20.0, 0.3, 4.0],
        [11.0, 91.0, 20.0, 20.0, 0.35, 4.0],
      ],
    );

    let per_slot = decoder(0.2, 0.45, SuppressionMode::PerSlot, true).decode(&raw, 3, &transform());
    let shared =
      decoder(0.2, 0.45, SuppressionMode::SharedSpace, true).decode(&raw, 3, &transform());

    for (a, b) in per_slot.iter().zip(shared.iter()) {
      assert_eq!(a.len(), b.len());
      for (x, y) in a.iter().zip(b.iter()) {
        assert_eq!(x.class_id, y.class_id);
        assert_eq!(x.score, y.score);
        for (p, q) in x.bbox.iter().zip(y.bbox.iter()) {
          assert!((p - q).abs() < 1e-2);
        }
      }
    }
  }
}

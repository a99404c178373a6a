// 该文件是 Shanan （山南西风） 项目的一部分。
// src/engine.rs - 推理引擎接口
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

use std::path::Path;

use crate::frame::Size;

/// 编译好的推理引擎：加载 / 执行 / 卸载（Drop）
///
/// 输入为 NCHW 归一化张量，输出为 [`crate::model::RawDetectionOutput`] 布局的扁平缓冲区。
pub trait Engine: Sized {
  /// 引擎 URL 方案，例如 `rknn`
  const SCHEME: &'static str;

  type Error: std::error::Error + Send + Sync + 'static;

  fn load(path: &Path) -> Result<Self, Self::Error>;

  /// 引擎内置的最大批次
  fn max_batch_size(&self) -> usize;

  /// 单槽位可输出的最大候选框数量
  fn max_detections_per_slot(&self) -> usize;

  /// 引擎的输入分辨率
  fn input_size(&self) -> Size;

  /// 执行一次推理，`output` 长度为 `batch_size * slot_stride`
  fn execute(
    &mut self,
    input: &[f32],
    batch_size: usize,
    output: &mut [f32],
  ) -> Result<(), Self::Error>;
}

#[cfg(feature = "rknpu")]
pub mod rknn;

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use crate::frame::Size;

const DEFAULT_INPUT: Size = Size::new(1920, 1080);
const DEFAULT_TARGET: Size = Size::new(608, 608);
const DEFAULT_CONF_THRESHOLD: f32 = 0.1;
const DEFAULT_IOU_THRESHOLD: f32 = 0.4;
const DEFAULT_PAD_VALUE: u8 = 128;

/// 批内非极大值抑制的执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuppressionMode {
  /// 每个槽位独立抑制
  #[default]
  PerSlot,
  /// 按槽位平移到互不相交的坐标空间后统一抑制（兼容旧版输出）
  SharedSpace,
}

impl FromStr for SuppressionMode {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "per-slot" => Ok(SuppressionMode::PerSlot),
      "shared-space" => Ok(SuppressionMode::SharedSpace),
      other => Err(ConfigError::UnknownSuppressionMode(other.to_string())),
    }
  }
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("{name} 分辨率无效: {size}")]
  InvalidResolution { name: &'static str, size: Size },
  #[error("{name} 阈值超出范围 [0, 1]: {value}")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
  #[error("最大批次必须大于 0")]
  ZeroBatchSize,
  #[error("未知的抑制模式: {0} (可选 per-slot / shared-space)")]
  UnknownSuppressionMode(String),
}

/// 启动时解析一次的不可变配置
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
  input: Size,
  target: Size,
  conf_threshold: f32,
  iou_threshold: f32,
  max_batch_size: usize,
  suppression: SuppressionMode,
  class_aware: bool,
  profiling: bool,
  warm_up_rounds: usize,
  pad_value: u8,
}

impl PipelineConfig {
  pub fn builder() -> PipelineConfigBuilder {
    PipelineConfigBuilder::default()
  }

  pub fn input(&self) -> Size {
    self.input
  }

  pub fn target(&self) -> Size {
    self.target
  }

  pub fn conf_threshold(&self) -> f32 {
    self.conf_threshold
  }

  pub fn iou_threshold(&self) -> f32 {
    self.iou_threshold
  }

  pub fn max_batch_size(&self) -> usize {
    self.max_batch_size
  }

  pub fn suppression(&self) -> SuppressionMode {
    self.suppression
  }

  pub fn class_aware(&self) -> bool {
    self.class_aware
  }

  pub fn profiling(&self) -> bool {
    self.profiling
  }

  pub fn warm_up_rounds(&self) -> usize {
    self.warm_up_rounds
  }

  pub fn pad_value(&self) -> u8 {
    self.pad_value
  }
}

#[derive(Debug, Clone)]
pub struct PipelineConfigBuilder {
  input: Size,
  target: Size,
  conf_threshold: f32,
  iou_threshold: f32,
  max_batch_size: usize,
  suppression: SuppressionMode,
  class_aware: bool,
  profiling: bool,
  warm_up_rounds: usize,
  pad_value: u8,
}

impl Default for PipelineConfigBuilder {
  fn default() -> Self {
    Self {
      input: DEFAULT_INPUT,
      target: DEFAULT_TARGET,
      conf_threshold: DEFAULT_CONF_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      max_batch_size: 1,
      suppression: SuppressionMode::default(),
      class_aware: true,
      profiling: false,
      warm_up_rounds: 0,
      pad_value: DEFAULT_PAD_VALUE,
    }
  }
}

impl PipelineConfigBuilder {
  pub fn input(mut self, input: Size) -> Self {
    self.input = input;
    self
  }

  pub fn target(mut self, target: Size) -> Self {
    self.target = target;
    self
  }

  pub fn conf_threshold(mut self, threshold: f32) -> Self {
    self.conf_threshold = threshold;
    self
  }

  pub fn iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn max_batch_size(mut self, max_batch_size: usize) -> Self {
    self.max_batch_size = max_batch_size;
    self
  }

  pub fn suppression(mut self, mode: SuppressionMode) -> Self {
    self.suppression = mode;
    self
  }

  pub fn class_aware(mut self, class_aware: bool) -> Self {
    self.class_aware = class_aware;
    self
  }

  pub fn profiling(mut self, profiling: bool) -> Self {
    self.profiling = profiling;
    self
  }

  pub fn warm_up_rounds(mut self, rounds: usize) -> Self {
    self.warm_up_rounds = rounds;
    self
  }

  pub fn pad_value(mut self, value: u8) -> Self {
    self.pad_value = value;
    self
  }

  pub fn build(self) -> Result<PipelineConfig, ConfigError> {
    if self.input.is_empty() {
      return Err(ConfigError::InvalidResolution {
        name: "输入",
        size: self.input,
      });
    }
    if self.target.is_empty() {
      return Err(ConfigError::InvalidResolution {
        name: "推理",
        size: self.target,
      });
    }
    check_threshold("置信度", self.conf_threshold)?;
    check_threshold("IoU", self.iou_threshold)?;
    if self.max_batch_size == 0 {
      return Err(ConfigError::ZeroBatchSize);
    }

    let config = PipelineConfig {
      input: self.input,
      target: self.target,
      conf_threshold: self.conf_threshold,
      iou_threshold: self.iou_threshold,
      max_batch_size: self.max_batch_size,
      suppression: self.suppression,
      class_aware: self.class_aware,
      profiling: self.profiling,
      warm_up_rounds: self.warm_up_rounds,
      pad_value: self.pad_value,
    };
    debug!("流水线配置: {:?}", config);
    Ok(config)
  }
}

fn check_threshold(name: &'static str, value: f32) -> Result<(), ConfigError> {
  if (0.0..=1.0).contains(&value) {
    Ok(())
  } else {
    Err(ConfigError::ThresholdOutOfRange { name, value })
  }
}

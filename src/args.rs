// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::Args;
use url::Url;

use crate::{
  config::{ConfigError, PipelineConfig, SuppressionMode},
  frame::Size,
};

/// 流水线参数，各可执行文件共用
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
  /// 推理引擎，例如 rknn:///path/to/model.rknn?device=0
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源 (image:///path 或 v4l:///dev/video0)
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 报告输出 (folder:///path 或 file:///path.jsonl)，缺省写到标准输出
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,

  /// 输入帧宽度
  #[arg(long, default_value_t = 1920)]
  pub input_width: u32,

  /// 输入帧高度
  #[arg(long, default_value_t = 1080)]
  pub input_height: u32,

  /// 推理宽度
  #[arg(long, default_value_t = 608)]
  pub width: u32,

  /// 推理高度
  #[arg(long, default_value_t = 608)]
  pub height: u32,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.1, value_name = "THRESHOLD")]
  pub conf: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.4, value_name = "THRESHOLD")]
  pub iou: f32,

  /// 最大批次
  #[arg(long, default_value_t = 1)]
  pub max_batch: usize,

  /// 批内抑制方式: per-slot / shared-space
  #[arg(long, default_value = "per-slot")]
  pub suppression: SuppressionMode,

  /// 跨类别抑制
  #[arg(long)]
  pub class_agnostic: bool,

  /// 统计推理耗时
  #[arg(long)]
  pub profile: bool,

  /// 预热轮数
  #[arg(long, default_value_t = 0)]
  pub warm_up: usize,
}

impl PipelineArgs {
  pub fn to_config(&self) -> Result<PipelineConfig, ConfigError> {
    PipelineConfig::builder()
      .input(Size::new(self.input_width, self.input_height))
      .target(Size::new(self.width, self.height))
      .conf_threshold(self.conf)
      .iou_threshold(self.iou)
      .max_batch_size(self.max_batch)
      .suppression(self.suppression)
      .class_aware(!self.class_agnostic)
      .profiling(self.profile)
      .warm_up_rounds(self.warm_up)
      .build()
  }
}

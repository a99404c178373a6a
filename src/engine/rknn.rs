// 该文件是 Shanan （山南西风） 项目的一部分。
// src/engine/rknn.rs - RKNN 推理引擎
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{engine::Engine, frame::Size, model::slot_stride};

const RKNN_NUM_INPUTS: u32 = 1;
const RKNN_NUM_OUTPUTS: u32 = 1;
const RKNN_INPUT: Size = Size::new(608, 608);
const RKNN_MAX_BATCH: usize = 4;
const RKNN_MAX_DETECTIONS: usize = 1000;

#[derive(Error, Debug)]
pub enum RknnEngineError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("输出长度 {actual} 小于期望的 {expected}")]
  OutputTooShort { expected: usize, actual: usize },
}

impl RknnEngineError {
  fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknnEngineError::ModelInvalid(msg.to_string(), e)
  }
}

/// 输出端带解码头（[count, cx, cy, w, h, conf, cls] 布局）的 RKNN 模型
pub struct RknnEngine {
  context: Context,
}

impl Engine for RknnEngine {
  const SCHEME: &'static str = "rknn";

  type Error = RknnEngineError;

  fn load(path: &Path) -> Result<Self, Self::Error> {
    info!("加载模型文件: {}", path.display());
    let model_data = std::fs::read(path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, InitFlags::default())?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(RknnEngineError::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| RknnEngineError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| RknnEngineError::invalid("无法获取输出数量", e))?;

    if num_inputs != RKNN_NUM_INPUTS || num_outputs != RKNN_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        RKNN_NUM_INPUTS, RKNN_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(RknnEngineError::invalid(&msg, rknpu::Error::InvalidModel));
    }

    info!("模型加载完成");
    Ok(Self { context })
  }

  fn max_batch_size(&self) -> usize {
    RKNN_MAX_BATCH
  }

  fn max_detections_per_slot(&self) -> usize {
    RKNN_MAX_DETECTIONS
  }

  fn input_size(&self) -> Size {
    RKNN_INPUT
  }

  fn execute(
    &mut self,
    input: &[f32],
    batch_size: usize,
    output: &mut [f32],
  ) -> Result<(), Self::Error> {
    debug!("设置模型输入 (批次 {})", batch_size);
    self.context.set_input(
      0,
      bytemuck::cast_slice(input),
      TensorFormat::NCHW,
      TensorType::Float32,
    )?;

    debug!("执行模型推理");
    self.context.run()?;

    debug!("获取模型输出");
    let outputs = self.context.get_outputs()?;
    let raw = outputs.get_f32(0)?;

    let expected = output.len();
    debug_assert_eq!(expected, batch_size * slot_stride(RKNN_MAX_DETECTIONS));
    if raw.len() < expected {
      return Err(RknnEngineError::OutputTooShort {
        expected,
        actual: raw.len(),
      });
    }
    output.copy_from_slice(&raw[..expected]);

    Ok(())
  }
}

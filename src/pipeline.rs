// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline.rs - 预处理 / 推理 / 后处理流水线
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

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  buffer::{BatchFrameBuffer, BufferError},
  config::{ConfigError, PipelineConfig},
  decoder::Decoder,
  engine::Engine,
  frame::{Batch, BatchError, Frame, Size},
  model::DetectResult,
  session::{InferenceError, InferenceSession},
  transform::{LetterboxCache, LetterboxTransform},
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("批次组装失败: {0}")]
  Batch(#[from] BatchError),
  #[error("预处理阶段失败: {0}")]
  Preprocess(#[from] BufferError),
  #[error("推理阶段失败: {0}")]
  Inference(#[from] InferenceError),
  #[error("批次内所有帧都被丢弃")]
  EmptyBatch,
  #[error("引擎输入尺寸 {engine} 与配置的推理尺寸 {config} 不一致")]
  TargetMismatch { engine: Size, config: Size },
}

/// 各阶段累计耗时与计数
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
  pub preprocess: Duration,
  pub inference: Duration,
  pub postprocess: Duration,
  pub batches: u64,
  pub frames: u64,
}

impl StageTimings {
  pub fn reset(&mut self) {
    *self = Self::default();
  }

  pub fn total(&self) -> Duration {
    self.preprocess + self.inference + self.postprocess
  }

  /// 每批次平均耗时，未处理任何批次时为零
  pub fn mean(&self) -> StageTimings {
    if self.batches == 0 {
      return StageTimings::default();
    }
    let n = self.batches as u32;
    StageTimings {
      preprocess: self.preprocess / n,
      inference: self.inference / n,
      postprocess: self.postprocess / n,
      batches: 1,
      frames: self.frames / self.batches,
    }
  }

  fn accumulate(&mut self, other: &StageTimings) {
    self.preprocess += other.preprocess;
    self.inference += other.inference;
    self.postprocess += other.postprocess;
    self.batches += other.batches;
    self.frames += other.frames;
  }
}

/// 一次 `run_batch` 的结果
///
/// `results[i]` 对应输入的第 `i` 帧；被丢弃的帧为 `None`，其位置记录在 `dropped`。
#[derive(Debug, Clone, Default)]
pub struct BatchOutput {
  pub results: Vec<Option<DetectResult>>,
  pub dropped: Vec<usize>,
  pub timings: StageTimings,
}

impl BatchOutput {
  pub fn detections(&self) -> usize {
    self.results.iter().flatten().map(DetectResult::len).sum()
  }
}

pub struct Pipeline<E: Engine> {
  config: PipelineConfig,
  transforms: LetterboxCache,
  buffer: BatchFrameBuffer,
  session: InferenceSession<E>,
  decoder: Decoder,
  timings: StageTimings,
}

impl<E: Engine> Pipeline<E> {
  pub fn new(config: PipelineConfig, session: InferenceSession<E>) -> Result<Self, PipelineError> {
    let engine_input = session.input_size();
    if engine_input != config.target() {
      return Err(PipelineError::TargetMismatch {
        engine: engine_input,
        config: config.target(),
      });
    }
    if config.max_batch_size() > session.max_batch_size() {
      return Err(PipelineError::Batch(BatchError::TooLarge {
        len: config.max_batch_size(),
        max: session.max_batch_size(),
      }));
    }

    info!(
      "初始化流水线: 输入 {}, 推理 {}, 最大批次 {}, 抑制模式 {:?}",
      config.input(),
      config.target(),
      config.max_batch_size(),
      config.suppression()
    );

    Ok(Self {
      buffer: BatchFrameBuffer::new(&config),
      decoder: Decoder::new(&config),
      transforms: LetterboxCache::default(),
      session,
      config,
      timings: StageTimings::default(),
    })
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn session(&self) -> &InferenceSession<E> {
    &self.session
  }

  pub fn timings(&self) -> &StageTimings {
    &self.timings
  }

  pub fn reset_timings(&mut self) {
    self.timings.reset();
  }

  /// 处理一个批次：预处理 → 推理 → 解码
  pub fn run_batch(&mut self, frames: &[Frame]) -> Result<BatchOutput, PipelineError> {
    let mut timings = StageTimings::default();
    let target = self.config.target();

    let preprocess_start = Instant::now();
    let mut dropped = Vec::new();
    let mut kept = Vec::with_capacity(frames.len());
    let mut transform: Option<LetterboxTransform> = None;
    for (index, frame) in frames.iter().enumerate() {
      if frame.size() != self.config.input() {
        warn!(
          "丢弃第 {} 帧 ({}): 分辨率 {} 与配置的输入 {} 不一致",
          index,
          frame.id(),
          frame.size(),
          self.config.input()
        );
        dropped.push(index);
        continue;
      }
      match self.transforms.get(frame.size(), target) {
        Ok(t) => {
          transform.get_or_insert(t);
          kept.push((index, frame));
        }
        Err(e) => {
          warn!("丢弃第 {} 帧 ({}): {}", index, frame.id(), e);
          dropped.push(index);
        }
      }
    }
    let Some(transform) = transform else {
      return Err(PipelineError::EmptyBatch);
    };

    let batch = Batch::new(
      kept.iter().map(|(_, frame)| *frame).collect(),
      self.config.max_batch_size(),
    )?;

    self.buffer.reset();
    for (slot, frame) in batch.iter().enumerate() {
      self.buffer.load_frame(frame, slot, &transform)?;
    }
    timings.preprocess = preprocess_start.elapsed();

    let inference_start = Instant::now();
    let handle = self.buffer.tensor_handle();
    let raw = self.session.infer(handle.as_slice(), handle.batch_size())?;
    timings.inference = inference_start.elapsed();

    let postprocess_start = Instant::now();
    let decoded = self.decoder.decode(raw, batch.len(), &transform);
    let mut results = vec![None; frames.len()];
    for ((index, _), result) in kept.iter().zip(decoded) {
      results[*index] = Some(result);
    }
    timings.postprocess = postprocess_start.elapsed();

    timings.batches = 1;
    timings.frames = batch.len() as u64;
    self.timings.accumulate(&timings);

    debug!(
      "批次完成: {} 帧 (丢弃 {}), 预处理 {:.2?}, 推理 {:.2?}, 后处理 {:.2?}",
      batch.len(),
      dropped.len(),
      timings.preprocess,
      timings.inference,
      timings.postprocess
    );

    Ok(BatchOutput {
      results,
      dropped,
      timings,
    })
  }

  /// 执行 `warm_up_rounds` 次完整批次并丢弃结果，随后清零所有计时
  pub fn warm_up(&mut self, frames: &[Frame]) -> Result<(), PipelineError> {
    let rounds = self.config.warm_up_rounds();
    if rounds > 0 {
      info!("预热 {} 轮", rounds);
    }
    for _ in 0..rounds {
      self.run_batch(frames)?;
    }
    self.timings.reset();
    self.session.reset_profile();
    Ok(())
  }

  /// 卸载引擎
  pub fn release(self) {
    info!(
      "释放流水线: 共处理 {} 批次 / {} 帧",
      self.timings.batches, self.timings.frames
    );
    self.session.release();
  }
}

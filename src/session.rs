// 该文件是 Shanan （山南西风） 项目的一部分。
// src/session.rs - 推理会话
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

use std::{
  marker::PhantomData,
  path::{Path, PathBuf},
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl,
  device::{DeviceContext, DeviceError},
  engine::Engine,
  frame::{RGB_CHANNELS, Size},
  model::RawDetectionOutput,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum EngineLoadError {
  #[error("引擎文件不存在: {}", .0.display())]
  NotFound(PathBuf),
  #[error("引擎文件不可读: {}: {source}", .path.display())]
  Unreadable {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("引擎不兼容: {}: {source}", .path.display())]
  Incompatible {
    path: PathBuf,
    #[source]
    source: BoxError,
  },
  #[error("请求的最大批次 {requested} 超过引擎容量 {capacity}")]
  BatchCapacity { requested: usize, capacity: usize },
  #[error("最大批次必须大于 0")]
  ZeroBatchSize,
  #[error("引擎路径必须使用 {expected} 方案, 实际为 {actual}")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("引擎 URL 参数无效: {key}={value}")]
  InvalidQuery { key: String, value: String },
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("设备上下文错误: {0}")]
  Device(#[from] DeviceError),
  #[error("批次大小 {batch_size} 超出范围 1..={max}")]
  BatchSize { batch_size: usize, max: usize },
  #[error("输入张量长度不匹配: 期望 {expected}, 实际 {actual}")]
  InputLength { expected: usize, actual: usize },
  #[error("引擎执行失败: {0}")]
  Execute(#[source] BoxError),
}

/// 持有引擎与独占执行上下文
///
/// `infer` 是单个临界区：获取设备 → 绑定输入输出 → 执行 → 拷回主机内存 → 释放设备。
pub struct InferenceSession<E: Engine> {
  engine: E,
  device: DeviceContext,
  max_batch_size: usize,
  output: RawDetectionOutput,
  profiling: bool,
  profiled: Duration,
  runs: u64,
}

impl<E: Engine> InferenceSession<E> {
  pub fn load(
    engine_path: impl AsRef<Path>,
    max_batch_size: usize,
    device: DeviceContext,
  ) -> Result<Self, EngineLoadError> {
    let path = engine_path.as_ref();
    if max_batch_size == 0 {
      return Err(EngineLoadError::ZeroBatchSize);
    }
    if !path.exists() {
      error!("引擎文件不存在: {}", path.display());
      return Err(EngineLoadError::NotFound(path.to_path_buf()));
    }
    std::fs::File::open(path).map_err(|source| EngineLoadError::Unreadable {
      path: path.to_path_buf(),
      source,
    })?;

    info!("加载推理引擎: {}", path.display());
    let engine = E::load(path).map_err(|e| EngineLoadError::Incompatible {
      path: path.to_path_buf(),
      source: Box::new(e),
    })?;

    let capacity = engine.max_batch_size();
    if max_batch_size > capacity {
      error!("请求的最大批次 {} 超过引擎容量 {}", max_batch_size, capacity);
      return Err(EngineLoadError::BatchCapacity {
        requested: max_batch_size,
        capacity,
      });
    }

    let output = RawDetectionOutput::with_capacity(max_batch_size, engine.max_detections_per_slot());
    debug!(
      "引擎输入 {}, 最大批次 {}, 单槽位容量 {}",
      engine.input_size(),
      max_batch_size,
      engine.max_detections_per_slot()
    );

    Ok(Self {
      engine,
      device,
      max_batch_size,
      output,
      profiling: false,
      profiled: Duration::ZERO,
      runs: 0,
    })
  }

  pub fn with_profiling(mut self, profiling: bool) -> Self {
    self.profiling = profiling;
    self
  }

  pub fn input_size(&self) -> Size {
    self.engine.input_size()
  }

  pub fn max_batch_size(&self) -> usize {
    self.max_batch_size
  }

  pub fn device(&self) -> &DeviceContext {
    &self.device
  }

  pub fn infer(
    &mut self,
    input: &[f32],
    batch_size: usize,
  ) -> Result<&RawDetectionOutput, InferenceError> {
    if batch_size == 0 || batch_size > self.max_batch_size {
      return Err(InferenceError::BatchSize {
        batch_size,
        max: self.max_batch_size,
      });
    }
    let expected = batch_size * RGB_CHANNELS * self.engine.input_size().area();
    if input.len() != expected {
      return Err(InferenceError::InputLength {
        expected,
        actual: input.len(),
      });
    }

    let start = Instant::now();
    {
      let _device = self.device.acquire()?;
      let output = self.output.prepare(batch_size);
      self
        .engine
        .execute(input, batch_size, output)
        .map_err(|e| {
          error!("引擎执行失败: {}", e);
          InferenceError::Execute(Box::new(e))
        })?;
    }
    self.runs += 1;

    if self.profiling {
      self.profiled += start.elapsed();
    }
    debug!("推理完成 (批次 {}), 耗时 {:.2?}", batch_size, start.elapsed());

    Ok(&self.output)
  }

  /// 开启 profiling 后累计的推理时间
  pub fn profiled_time(&self) -> Duration {
    self.profiled
  }

  pub fn reset_profile(&mut self) {
    self.profiled = Duration::ZERO;
  }

  pub fn runs(&self) -> u64 {
    self.runs
  }

  /// 卸载引擎
  pub fn release(self) {
    info!("释放推理会话 ({} 次推理)", self.runs);
    drop(self.engine);
  }
}

/// 从 `<scheme>:///path/to/engine?max_batch=N&device=0` 构造会话
pub struct InferenceSessionBuilder<E> {
  engine_path: PathBuf,
  max_batch_size: Option<usize>,
  device: DeviceContext,
  profiling: bool,
  _engine: PhantomData<E>,
}

impl<E: Engine> FromUrl for InferenceSessionBuilder<E> {
  type Error = EngineLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != E::SCHEME {
      return Err(EngineLoadError::SchemeMismatch {
        expected: E::SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    let mut max_batch_size = None;
    let mut device = DeviceContext::default();
    for (k, v) in url.query_pairs() {
      let invalid = || EngineLoadError::InvalidQuery {
        key: k.to_string(),
        value: v.to_string(),
      };
      match k.as_ref() {
        "max_batch" => max_batch_size = Some(v.parse().map_err(|_| invalid())?),
        "device" => device = DeviceContext::new(v.parse().map_err(|_| invalid())?),
        _ => {}
      }
    }

    Ok(Self {
      engine_path: PathBuf::from(url.path()),
      max_batch_size,
      device,
      profiling: false,
      _engine: PhantomData,
    })
  }
}

impl<E: Engine> InferenceSessionBuilder<E> {
  pub fn max_batch_size(mut self, max_batch_size: usize) -> Self {
    self.max_batch_size = Some(max_batch_size);
    self
  }

  /// 共享已有设备上下文，多条流水线由此串行化设备访问
  pub fn device(mut self, device: DeviceContext) -> Self {
    self.device = device;
    self
  }

  pub fn profiling(mut self, profiling: bool) -> Self {
    self.profiling = profiling;
    self
  }

  pub fn build(self) -> Result<InferenceSession<E>, EngineLoadError> {
    let session =
      InferenceSession::load(&self.engine_path, self.max_batch_size.unwrap_or(1), self.device)?;
    Ok(session.with_profiling(self.profiling))
  }
}

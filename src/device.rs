// 该文件是 Shanan （山南西风） 项目的一部分。
// src/device.rs - 加速器设备上下文
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

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DeviceError {
  #[error("设备 {0} 的上下文已失效（持有者发生 panic）")]
  Poisoned(u32),
}

#[derive(Debug, Default)]
struct DeviceState {
  acquisitions: u64,
}

/// 按设备编号登记的进程级上下文
static REGISTRY: OnceLock<Mutex<HashMap<u32, Arc<Mutex<DeviceState>>>>> = OnceLock::new();

/// 进程内共享的设备上下文句柄
///
/// 同一时刻至多一个调用方持有设备；编号相同的句柄指向同一设备。
#[derive(Debug, Clone)]
pub struct DeviceContext {
  ordinal: u32,
  state: Arc<Mutex<DeviceState>>,
}

impl Default for DeviceContext {
  fn default() -> Self {
    Self::new(0)
  }
}

impl DeviceContext {
  pub fn new(ordinal: u32) -> Self {
    let registry = REGISTRY.get_or_init(Mutex::default);
    // 登记表只做插入，持有者 panic 后其内容仍然完整
    let mut devices = registry.lock().unwrap_or_else(|e| e.into_inner());
    let state = devices.entry(ordinal).or_default().clone();
    Self { ordinal, state }
  }

  pub fn ordinal(&self) -> u32 {
    self.ordinal
  }

  /// 阻塞直到获得设备，返回的守卫在离开作用域时释放设备
  pub fn acquire(&self) -> Result<ContextGuard<'_>, DeviceError> {
    let mut state = self
      .state
      .lock()
      .map_err(|_| DeviceError::Poisoned(self.ordinal))?;
    state.acquisitions += 1;
    trace!("获取设备上下文 {} (第 {} 次)", self.ordinal, state.acquisitions);
    Ok(ContextGuard {
      ordinal: self.ordinal,
      _state: state,
    })
  }

  /// 当前没有调用方持有设备
  pub fn is_idle(&self) -> bool {
    self.state.try_lock().is_ok()
  }

  /// 累计获取次数
  pub fn acquisitions(&self) -> Result<u64, DeviceError> {
    self
      .state
      .lock()
      .map(|state| state.acquisitions)
      .map_err(|_| DeviceError::Poisoned(self.ordinal))
  }
}

pub struct ContextGuard<'a> {
  ordinal: u32,
  _state: MutexGuard<'a, DeviceState>,
}

impl Drop for ContextGuard<'_> {
  fn drop(&mut self) {
    trace!("释放设备上下文 {}", self.ordinal);
  }
}

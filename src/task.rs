// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 任务定义
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
  sync::mpsc::{self, Receiver},
  thread,
  time::Duration,
};

use anyhow::Context;
use tracing::{info, warn};

use crate::{
  engine::Engine,
  input::{FrameSource, next_batch},
  pipeline::{Pipeline, PipelineError, StageTimings},
  report::Record,
};

pub trait Task<I, E: Engine, O>: Sized {
  type Error;
  fn run_task(self, input: I, pipeline: &mut Pipeline<E>, output: O) -> Result<(), Self::Error>;
}

fn log_timings(prefix: &str, timings: &StageTimings) {
  warn!(
    "{}: 预处理 {:.2?}, 推理 {:.2?}, 后处理 {:.2?} ({} 批次 / {} 帧)",
    prefix,
    timings.preprocess,
    timings.inference,
    timings.postprocess,
    timings.batches,
    timings.frames
  );
}

/// 读取一个批次，处理并记录
pub struct OneShotTask;

impl<I, E, O> Task<I, E, O> for OneShotTask
where
  I: FrameSource,
  E: Engine,
  O: Record,
  O::Error: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    pipeline: &mut Pipeline<E>,
    mut output: O,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frames = next_batch(&mut input, pipeline.config().max_batch_size())?;
    if frames.is_empty() {
      anyhow::bail!("没有输入帧");
    }
    info!("获取 {} 帧，开始处理...", frames.len());
    pipeline.warm_up(&frames).context("预热失败")?;
    let result = pipeline.run_batch(&frames)?;
    info!(
      "处理完成，检测到 {} 个目标，耗时: {:.2?}",
      result.detections(),
      result.timings.total()
    );
    output.record(&frames, &result)?;
    input.shutdown();

    Ok(())
  }
}

/// 对同一批次重复处理，统计各阶段平均耗时
pub struct RepeatShotTask {
  repeat_times: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { repeat_times: 1000 }
  }
}

impl RepeatShotTask {
  pub fn with_repeat_times(mut self, repeat_times: usize) -> Self {
    self.repeat_times = repeat_times.max(1);
    self
  }
}

impl<I, E, O> Task<I, E, O> for RepeatShotTask
where
  I: FrameSource,
  E: Engine,
  O: Record,
  O::Error: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    pipeline: &mut Pipeline<E>,
    mut output: O,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frames = next_batch(&mut input, pipeline.config().max_batch_size())?;
    if frames.is_empty() {
      anyhow::bail!("没有输入帧");
    }
    input.shutdown();
    info!("获取 {} 帧，开始预热...", frames.len());
    pipeline.warm_up(&frames).context("预热失败")?;

    let mut last = None;
    for i in 0..self.repeat_times {
      let result = pipeline.run_batch(&frames)?;
      info!("({})处理完成，耗时: {:.2?}", i, result.timings.total());
      last = Some(result);
    }
    if let Some(result) = last {
      output.record(&frames, &result)?;
    }

    log_timings("平均耗时", &pipeline.timings().mean());

    Ok(())
  }
}

/// 持续读取直到来源结束、达到指定帧数或收到中断信号
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  report_interval: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 每处理 `interval` 个批次输出一次累计耗时并清零
  pub fn with_report_interval(mut self, interval: Option<usize>) -> Self {
    self.report_interval = interval.filter(|n| *n > 0);
    self
  }
}

fn interrupt_receiver() -> Receiver<()> {
  let (tx, rx) = mpsc::channel();

  let installed = ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  });
  if let Err(e) = installed {
    warn!("无法设置 Ctrl-C 处理器: {}", e);
  }

  rx
}

impl<I, E, O> Task<I, E, O> for ContinuousTask
where
  I: FrameSource,
  E: Engine,
  O: Record,
  O::Error: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    pipeline: &mut Pipeline<E>,
    mut output: O,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let rx = interrupt_receiver();
    let max_batch_size = pipeline.config().max_batch_size();

    let mut frame_index = 0;
    let mut batch_index = 0;
    loop {
      let want = match self.frame_number {
        Some(n) => max_batch_size.min(n.saturating_sub(frame_index)),
        None => max_batch_size,
      };
      if want == 0 {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }

      let frames = next_batch(&mut input, want)?;
      if frames.is_empty() {
        info!("输入结束，退出任务循环");
        break;
      }
      frame_index += frames.len();
      batch_index += 1;

      match pipeline.run_batch(&frames) {
        Ok(result) => {
          info!(
            "第 {} 批次 ({} 帧) 完成，检测到 {} 个目标，耗时: {:.2?}",
            batch_index,
            frames.len(),
            result.detections(),
            result.timings.total()
          );
          output.record(&frames, &result)?;
        }
        Err(PipelineError::EmptyBatch) => {
          warn!("第 {} 批次的所有帧都被丢弃，跳过", batch_index);
        }
        Err(e) => return Err(e.into()),
      }

      if self
        .report_interval
        .is_some_and(|interval| batch_index % interval == 0)
      {
        log_timings("阶段累计耗时", pipeline.timings());
        pipeline.reset_timings();
      }

      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    input.shutdown();
    info!("任务完成，共处理 {} 帧，退出", frame_index);
    Ok(())
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/simple_oneshot.rs - 单批次检测
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shanan_batch::{
  FromUrl,
  args::PipelineArgs,
  engine::rknn::RknnEngine,
  input::InputWrapper,
  pipeline::Pipeline,
  report::ReportWrapper,
  session::InferenceSessionBuilder,
  task::{OneShotTask, Task},
};

/// 取一个批次完成检测后退出
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub pipeline: PipelineArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.pipeline.model);
  info!("输入来源: {}", args.pipeline.input);

  let config = args.pipeline.to_config().context("配置无效")?;
  let session = InferenceSessionBuilder::<RknnEngine>::from_url(&args.pipeline.model)?
    .max_batch_size(config.max_batch_size())
    .profiling(config.profiling())
    .build()
    .context("加载推理引擎失败")?;
  let mut pipeline = Pipeline::new(config, session)?;

  let input = InputWrapper::from_url(&args.pipeline.input)?;
  let output = ReportWrapper::from_optional_url(args.pipeline.output.as_ref())?;

  OneShotTask.run_task(input, &mut pipeline, output)?;
  pipeline.release();

  Ok(())
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/report/directory_report.rs - 目录报告输出
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
  fs::File,
  io::{BufWriter, Write},
  path::PathBuf,
};

use chrono::{Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  pipeline::BatchOutput,
  report::{BatchReport, Record, ReportError},
};

#[derive(Error, Debug)]
pub enum DirectoryReportError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 按日期分目录写入 `batch-NNNNNN.json`
///
/// 带 `?always` 参数时没有检测结果的批次也会写入。
pub struct DirectoryReport {
  directory: PathBuf,
  batch_counter: u64,
  always: bool,
}

impl FromUrlWithScheme for DirectoryReport {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryReport {
  type Error = DirectoryReportError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryReportError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryReport {
      directory: PathBuf::from(uri.path()),
      batch_counter: 0,
      always,
    })
  }
}

impl DirectoryReport {
  fn batch_path(&mut self) -> Result<PathBuf, std::io::Error> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    self.batch_counter += 1;
    Ok(directory.join(format!("batch-{:06}.json", self.batch_counter)))
  }
}

impl Record for DirectoryReport {
  type Error = ReportError;

  fn record(&mut self, frames: &[Frame], output: &BatchOutput) -> Result<(), Self::Error> {
    if !self.always && output.detections() == 0 {
      return Ok(());
    }

    let report = BatchReport::new(frames, output)?;
    let path = self.batch_path()?;
    debug!("写入报告: {}", path.display());
    let mut writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(&mut writer, &report)?;
    writer.flush()?;
    Ok(())
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/report.rs - 检测报告
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
  io::{BufWriter, Stdout, Write},
  time::Duration,
};

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::{FromUrl, frame::Frame, model::Detection, pipeline::BatchOutput};

#[cfg(feature = "directory_record")]
mod directory_report;
#[cfg(feature = "directory_record")]
pub use self::directory_report::{DirectoryReport, DirectoryReportError};

#[derive(Error, Debug)]
pub enum ReportError {
  #[error("序列化错误: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("帧数量 {frames} 与结果数量 {results} 不一致")]
  LengthMismatch { frames: usize, results: usize },
  #[cfg(feature = "directory_record")]
  #[error("目录报告错误: {0}")]
  Directory(#[from] DirectoryReportError),
}

/// 一个批次的检测报告，字段按声明顺序序列化
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
  pub preprocess_time: f64,
  pub inference_time: f64,
  pub postprocess_time: f64,
  pub results: Vec<ImageReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageReport {
  pub file: String,
  pub objects: Vec<ObjectReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectReport {
  pub position: [i64; 4],
  pub confidence_score: f32,
}

impl From<&Detection> for ObjectReport {
  fn from(detection: &Detection) -> Self {
    Self {
      position: detection.bbox.map(|v| v.trunc() as i64),
      confidence_score: detection.score,
    }
  }
}

fn millis(d: Duration) -> f64 {
  d.as_nanos() as f64 / 1_000_000.0
}

impl BatchReport {
  /// 由输入帧与对应结果构造报告，被丢弃的帧不出现在 `results` 中
  pub fn new(frames: &[Frame], output: &BatchOutput) -> Result<Self, ReportError> {
    if frames.len() != output.results.len() {
      return Err(ReportError::LengthMismatch {
        frames: frames.len(),
        results: output.results.len(),
      });
    }

    let results = frames
      .iter()
      .zip(output.results.iter())
      .filter_map(|(frame, result)| {
        result.as_ref().map(|result| ImageReport {
          file: frame.id().to_string(),
          objects: result.iter().map(ObjectReport::from).collect(),
        })
      })
      .collect();

    Ok(Self {
      preprocess_time: millis(output.timings.preprocess),
      inference_time: millis(output.timings.inference),
      postprocess_time: millis(output.timings.postprocess),
      results,
    })
  }
}

/// 批次结果的记录端
pub trait Record {
  type Error;
  fn record(&mut self, frames: &[Frame], output: &BatchOutput) -> Result<(), Self::Error>;
}

impl<R: Record> Record for &mut R {
  type Error = R::Error;

  fn record(&mut self, frames: &[Frame], output: &BatchOutput) -> Result<(), Self::Error> {
    (**self).record(frames, output)
  }
}

/// 每个批次写一行 JSON
pub struct JsonWriterReport<W: Write> {
  writer: W,
}

impl<W: Write> JsonWriterReport<W> {
  pub fn new(writer: W) -> Self {
    Self { writer }
  }

  pub fn into_inner(self) -> W {
    self.writer
  }
}

impl<W: Write> Record for JsonWriterReport<W> {
  type Error = ReportError;

  fn record(&mut self, frames: &[Frame], output: &BatchOutput) -> Result<(), Self::Error> {
    let report = BatchReport::new(frames, output)?;
    serde_json::to_writer(&mut self.writer, &report)?;
    self.writer.write_all(b"\n")?;
    self.writer.flush()?;
    Ok(())
  }
}

pub enum ReportWrapper {
  Stdout(JsonWriterReport<Stdout>),
  File(JsonWriterReport<BufWriter<File>>),
  #[cfg(feature = "directory_record")]
  Directory(DirectoryReport),
}

impl ReportWrapper {
  pub fn stdout() -> Self {
    ReportWrapper::Stdout(JsonWriterReport::new(std::io::stdout()))
  }

  /// 缺省写到标准输出
  pub fn from_optional_url(url: Option<&Url>) -> Result<Self, ReportError> {
    url.map_or_else(|| Ok(Self::stdout()), Self::from_url)
  }
}

impl FromUrl for ReportWrapper {
  type Error = ReportError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "directory_record")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == DirectoryReport::SCHEME {
        return Ok(ReportWrapper::Directory(DirectoryReport::from_url(url)?));
      }
    }
    match url.scheme() {
      "file" => {
        let file = File::create(url.path())?;
        Ok(ReportWrapper::File(JsonWriterReport::new(BufWriter::new(
          file,
        ))))
      }
      "stdout" => Ok(Self::stdout()),
      _ => Err(ReportError::SchemeMismatch),
    }
  }
}

impl Record for ReportWrapper {
  type Error = ReportError;

  fn record(&mut self, frames: &[Frame], output: &BatchOutput) -> Result<(), Self::Error> {
    match self {
      ReportWrapper::Stdout(report) => report.record(frames, output),
      ReportWrapper::File(report) => report.record(frames, output),
      #[cfg(feature = "directory_record")]
      ReportWrapper::Directory(report) => report.record(frames, output),
    }
  }
}

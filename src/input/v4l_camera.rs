// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/v4l_camera.rs - V4L2 摄像头输入
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

use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use v4l::{
  Device, FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  video::Capture,
};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{ChannelOrder, Frame, FrameError, Size},
  input::FrameSource,
};

const DEFAULT_DEVICE: &str = "/dev/video0";
const STREAM_BUFFERS: u32 = 4;
// 连续收到不完整缓冲区的上限
const SHORT_FRAME_RETRIES: usize = 8;

#[derive(Error, Debug)]
pub enum V4lCameraError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("V4L error: {0}")]
  V4lError(#[from] std::io::Error),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(FourCC),
  #[error("Frame error: {0}")]
  FrameError(#[from] FrameError),
  #[error("Short YUYV buffer: expected {expected} bytes, got {actual}")]
  ShortFrame { expected: usize, actual: usize },
}

/// YUYV 采集，转为 RGB 后输出；`v4l:///dev/video0?width=640&height=480`
pub struct V4lCamera {
  stream: Option<Stream<'static>>,
  size: Size,
  frame_index: u64,
}

impl FromUrlWithScheme for V4lCamera {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lCamera {
  type Error = V4lCameraError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lCameraError::SchemaMismatch);
    }

    let device_path = if url.path().is_empty() || url.path() == "/" {
      DEFAULT_DEVICE
    } else {
      url.path()
    };

    let mut width = None;
    let mut height = None;
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "width" => width = v.parse().ok(),
        "height" => height = v.parse().ok(),
        _ => {}
      }
    }

    let device = Device::with_path(device_path)?;
    let mut format = device.format()?;
    if let Some(width) = width {
      format.width = width;
    }
    if let Some(height) = height {
      format.height = height;
    }
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;
    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(V4lCameraError::UnsupportedPixelFormat(format.fourcc));
    }

    let stream = Stream::with_buffers(&device, Type::VideoCapture, STREAM_BUFFERS)?;
    let size = Size::new(format.width, format.height);
    info!("打开摄像头 {}: {}", device_path, size);

    Ok(Self {
      stream: Some(stream),
      size,
      frame_index: 0,
    })
  }
}

/// 一帧 YUYV 数据所需的字节数，奇数像素按整组补齐
fn yuyv_len(pixels: usize) -> usize {
  pixels.div_ceil(2) * 4
}

/// 缓冲区不足一帧时返回 `None`
fn yuyv_to_rgb(yuyv: &[u8], pixels: usize) -> Option<Vec<u8>> {
  if yuyv.len() < yuyv_len(pixels) {
    return None;
  }
  let mut rgb = Vec::with_capacity(pixels.div_ceil(2) * 6);

  for chunk in yuyv.chunks_exact(4).take(pixels.div_ceil(2)) {
    let u = chunk[1] as f32 - 128.0;
    let v = chunk[3] as f32 - 128.0;
    for y in [chunk[0] as f32, chunk[2] as f32] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb.truncate(pixels * 3);
  Some(rgb)
}

impl FrameSource for V4lCamera {
  type Error = V4lCameraError;

  fn capture_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
    let Some(stream) = self.stream.as_mut() else {
      return Ok(None);
    };

    let expected = yuyv_len(self.size.area());
    let mut attempts = 0;
    let rgb = loop {
      let (buffer, _meta) = stream.next()?;
      if let Some(rgb) = yuyv_to_rgb(buffer, self.size.area()) {
        break rgb;
      }
      attempts += 1;
      warn!(
        "跳过不完整的帧: 需要 {} 字节, 实际 {} 字节",
        expected,
        buffer.len()
      );
      if attempts >= SHORT_FRAME_RETRIES {
        return Err(V4lCameraError::ShortFrame {
          expected,
          actual: buffer.len(),
        });
      }
    };
    let frame = Frame::new(
      format!("v4l-{:06}", self.frame_index),
      self.size,
      ChannelOrder::Rgb,
      rgb,
    )?;
    self.frame_index += 1;
    Ok(Some(frame))
  }

  fn shutdown(&mut self) {
    if self.stream.take().is_some() {
      info!("关闭摄像头 ({} 帧)", self.frame_index);
    }
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 帧来源定义
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

use crate::{FromUrl, frame::Frame};

/// 逐帧产出 [`Frame`] 的来源，`Ok(None)` 表示来源已结束
pub trait FrameSource {
  type Error: std::error::Error + Send + Sync + 'static;

  fn capture_frame(&mut self) -> Result<Option<Frame>, Self::Error>;

  fn shutdown(&mut self) {}
}

impl<S: FrameSource> FrameSource for &mut S {
  type Error = S::Error;

  fn capture_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
    (**self).capture_frame()
  }

  fn shutdown(&mut self) {
    (**self).shutdown()
  }
}

#[cfg(feature = "read_image_file")]
mod image_file;
#[cfg(feature = "read_image_file")]
pub use self::image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "v4l_input")]
mod v4l_camera;
#[cfg(feature = "v4l_input")]
pub use self::v4l_camera::{V4lCamera, V4lCameraError};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "v4l_input")]
  #[error("V4L input error: {0}")]
  V4lCameraError(#[from] V4lCameraError),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "v4l_input")]
  V4lCamera(V4lCamera),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    #[cfg(feature = "v4l_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4lCamera::SCHEME {
        let input = V4lCamera::from_url(url)?;
        return Ok(InputWrapper::V4lCamera(input));
      }
    }
    Err(InputError::SchemeMismatch)
  }
}

impl FrameSource for InputWrapper {
  type Error = InputError;

  #[allow(unreachable_code, unused_variables)]
  fn capture_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => Ok(input.capture_frame()?),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4lCamera(input) => Ok(input.capture_frame()?),
    }
  }

  #[allow(unreachable_code, unused_variables)]
  fn shutdown(&mut self) {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.shutdown(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4lCamera(input) => input.shutdown(),
    }
  }
}

/// 从来源读取至多 `max` 帧；来源结束时返回的帧可能少于 `max`
pub fn next_batch<S: FrameSource>(source: &mut S, max: usize) -> Result<Vec<Frame>, S::Error> {
  let mut frames = Vec::with_capacity(max);
  while frames.len() < max {
    match source.capture_frame()? {
      Some(frame) => frames.push(frame),
      None => break,
    }
  }
  Ok(frames)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::{ChannelOrder, Size};

  struct Counter(u32);

  impl FrameSource for Counter {
    type Error = std::io::Error;

    fn capture_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
      if self.0 == 0 {
        return Ok(None);
      }
      self.0 -= 1;
      Ok(Some(
        Frame::new(
          format!("{}", self.0),
          Size::new(1, 1),
          ChannelOrder::Rgb,
          vec![0; 3],
        )
        .unwrap(),
      ))
    }
  }

  #[test]
  fn test_next_batch_stops_at_end() {
    let mut source = Counter(5);
    assert_eq!(next_batch(&mut source, 2).unwrap().len(), 2);
    assert_eq!(next_batch(&mut source, 2).unwrap().len(), 2);
    assert_eq!(next_batch(&mut source, 2).unwrap().len(), 1);
    assert!(next_batch(&mut source, 2).unwrap().is_empty());
  }

  #[test]
  fn test_unknown_scheme() {
    let url = url::Url::parse("rtsp://camera/stream").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch)
    ));
  }
}

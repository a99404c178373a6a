// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/image_file.rs - 图像文件输入
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
  collections::VecDeque,
  path::{Path, PathBuf},
};

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, input::FrameSource};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("No image found at {}", .0.display())]
  NoImage(PathBuf),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 单个图像文件，或目录内按文件名排序的全部图像
pub struct ImageFileInput {
  pending: VecDeque<PathBuf>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Self::open(url.path())
  }
}

fn is_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .is_some_and(|ext| {
      IMAGE_EXTENSIONS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(ext))
    })
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let pending: VecDeque<PathBuf> = if path.is_dir() {
      let mut files = std::fs::read_dir(path)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
      files.retain(|p| p.is_file() && is_image(p));
      files.sort();
      files.into()
    } else if path.is_file() {
      VecDeque::from([path.to_path_buf()])
    } else {
      Vec::new().into()
    };

    if pending.is_empty() {
      return Err(ImageFileInputError::NoImage(path.to_path_buf()));
    }
    info!("图像输入: {} ({} 个文件)", path.display(), pending.len());
    Ok(Self { pending })
  }

  pub fn remaining(&self) -> usize {
    self.pending.len()
  }
}

impl FrameSource for ImageFileInput {
  type Error = ImageFileInputError;

  fn capture_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
    let Some(path) = self.pending.pop_front() else {
      return Ok(None);
    };
    debug!("读取图像: {}", path.display());
    let image = ImageReader::open(&path)?.decode()?.to_rgb8();
    let id = path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_else(|| path.display().to_string());
    Ok(Some(Frame::from_rgb_image(id, image)))
  }

  fn shutdown(&mut self) {
    self.pending.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::Size;
  use image::RgbImage;

  fn write_png(dir: &Path, name: &str, width: u32, height: u32) {
    RgbImage::new(width, height).save(dir.join(name)).unwrap();
  }

  #[test]
  fn test_directory_in_sorted_order() {
    let dir = tempfile::tempdir().unwrap();
    write_png(dir.path(), "b.png", 4, 2);
    write_png(dir.path(), "a.png", 2, 2);
    std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();

    let url = Url::parse(&format!("image://{}", dir.path().display())).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    assert_eq!(input.remaining(), 2);

    let first = input.capture_frame().unwrap().unwrap();
    assert_eq!(first.id(), "a.png");
    assert_eq!(first.size(), Size::new(2, 2));
    let second = input.capture_frame().unwrap().unwrap();
    assert_eq!(second.id(), "b.png");
    assert_eq!(second.size(), Size::new(4, 2));
    assert!(input.capture_frame().unwrap().is_none());
  }

  #[test]
  fn test_single_file_and_missing() {
    let dir = tempfile::tempdir().unwrap();
    write_png(dir.path(), "one.png", 3, 3);

    let mut input = ImageFileInput::open(dir.path().join("one.png")).unwrap();
    assert_eq!(input.capture_frame().unwrap().unwrap().id(), "one.png");

    assert!(matches!(
      ImageFileInput::open(dir.path().join("none.png")),
      Err(ImageFileInputError::NoImage(_))
    ));
    let url = Url::parse("folder:///tmp").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }
}

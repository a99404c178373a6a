// 该文件是 Shanan （山南西风） 项目的一部分。
// src/transform.rs - Letterbox 缩放/归一化与坐标逆映射
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

//! # Letterbox 变换
//!
//! 保持宽高比缩放：`r = min(target_w / in_w, target_h / in_h)`，
//! 受限的一维恰好填满目标尺寸，另一维居中并对称填充。
//!
//! 正向：颜色转换 → 按 `r` 缩放 → 贴到目标画布的填充偏移处 → 边框填充常量
//! → 归一化到 [0, 1] → 以通道优先 (CHW) 写入调用方提供的张量槽位。
//!
//! 逆向：中心格式转角点格式，减去填充偏移再除以 `r`。全程浮点运算。

use image::{ImageBuffer, Rgb, RgbImage, imageops};
use thiserror::Error;
use tracing::debug;

use crate::frame::{Frame, RGB_CHANNELS, Size};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
  #[error("无效几何: 输入 {input}, 目标 {target}")]
  InvalidGeometry { input: Size, target: Size },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
  input: Size,
  target: Size,
  ratio: f32,
  pad_x: f32,
  pad_y: f32,
  // 正向缩放时使用的整数尺寸与偏移
  scaled: Size,
  offset: (u32, u32),
}

impl LetterboxTransform {
  pub fn compute(input: Size, target: Size) -> Result<Self, GeometryError> {
    let invalid = || GeometryError::InvalidGeometry { input, target };
    if input.is_empty() || target.is_empty() {
      return Err(invalid());
    }

    let (in_w, in_h) = (input.width as f32, input.height as f32);
    let (t_w, t_h) = (target.width as f32, target.height as f32);
    let r_w = t_w / in_w;
    let r_h = t_h / in_h;

    // 宽高比完全一致时两轴都不填充，用整数交叉相乘判断避免浮点误差
    let same_aspect =
      input.width as u64 * target.height as u64 == input.height as u64 * target.width as u64;
    let (ratio, pad_x, pad_y) = if same_aspect {
      (r_w, 0.0, 0.0)
    } else if r_h > r_w {
      (r_w, 0.0, (t_h - r_w * in_h) / 2.0)
    } else {
      (r_h, (t_w - r_h * in_w) / 2.0, 0.0)
    };

    if !ratio.is_finite() || ratio <= 0.0 {
      return Err(invalid());
    }

    let scaled = Size::new(
      ((in_w * ratio).round() as u32).clamp(1, target.width),
      ((in_h * ratio).round() as u32).clamp(1, target.height),
    );
    // 整数偏移取浮点填充的最近像素，贴图不越出画布
    let offset = (
      (pad_x.round() as u32).min(target.width - scaled.width),
      (pad_y.round() as u32).min(target.height - scaled.height),
    );

    debug!(
      "Letterbox: {} -> {}, r = {:.6}, pad = ({:.2}, {:.2})",
      input, target, ratio, pad_x, pad_y
    );

    Ok(Self {
      input,
      target,
      ratio,
      pad_x,
      pad_y,
      scaled,
      offset,
    })
  }

  pub fn input(&self) -> Size {
    self.input
  }

  pub fn target(&self) -> Size {
    self.target
  }

  pub fn ratio(&self) -> f32 {
    self.ratio
  }

  pub fn pad_x(&self) -> f32 {
    self.pad_x
  }

  pub fn pad_y(&self) -> f32 {
    self.pad_y
  }

  /// 目标空间中心格式 `[cx, cy, w, h]` → 输入空间角点格式 `[x1, y1, x2, y2]`
  ///
  /// 使用精确的浮点比例与填充；正向贴图的整数偏移与之至多相差半个像素。
  pub fn inverse(&self, cxcywh: [f32; 4]) -> [f32; 4] {
    let [cx, cy, w, h] = cxcywh;
    [
      (cx - w / 2.0 - self.pad_x) / self.ratio,
      (cy - h / 2.0 - self.pad_y) / self.ratio,
      (cx + w / 2.0 - self.pad_x) / self.ratio,
      (cy + h / 2.0 - self.pad_y) / self.ratio,
    ]
  }

  /// `inverse` 的对偶：输入空间角点格式 → 目标空间中心格式
  pub fn forward_box(&self, xyxy: [f32; 4]) -> [f32; 4] {
    let [x1, y1, x2, y2] = xyxy;
    let (tx1, ty1) = (x1 * self.ratio + self.pad_x, y1 * self.ratio + self.pad_y);
    let (tx2, ty2) = (x2 * self.ratio + self.pad_x, y2 * self.ratio + self.pad_y);
    [
      (tx1 + tx2) / 2.0,
      (ty1 + ty2) / 2.0,
      tx2 - tx1,
      ty2 - ty1,
    ]
  }

  /// 将目标空间中的长度换算到输入空间
  pub fn unscale(&self, length: f32) -> f32 {
    length / self.ratio
  }

  /// 正向变换：把 `frame` 缩放贴入 `canvas`，再以 CHW 归一化写入 `dst`
  ///
  /// `canvas` 必须是目标尺寸，`dst` 长度必须为 `3 * target_h * target_w`。
  pub fn forward(
    &self,
    frame: &Frame,
    canvas: &mut RgbImage,
    dst: &mut [f32],
    pad_value: u8,
  ) -> Result<(), GeometryError> {
    if frame.size() != self.input {
      return Err(GeometryError::InvalidGeometry {
        input: frame.size(),
        target: self.target,
      });
    }
    debug_assert_eq!(canvas.dimensions(), (self.target.width, self.target.height));
    debug_assert_eq!(dst.len(), RGB_CHANNELS * self.target.area());

    let source: ImageBuffer<Rgb<u8>, &[u8]> =
      ImageBuffer::from_raw(self.input.width, self.input.height, frame.as_hwc()).ok_or(
        GeometryError::InvalidGeometry {
          input: frame.size(),
          target: self.target,
        },
      )?;
    let resized = imageops::resize(
      &source,
      self.scaled.width,
      self.scaled.height,
      imageops::FilterType::Triangle,
    );

    for pixel in canvas.pixels_mut() {
      *pixel = Rgb([pad_value; RGB_CHANNELS]);
    }
    imageops::replace(
      canvas,
      &resized,
      self.offset.0 as i64,
      self.offset.1 as i64,
    );

    let width = self.target.width as usize;
    let plane = self.target.area();
    let order = frame.order();
    for (x, y, pixel) in canvas.enumerate_pixels() {
      let idx = y as usize * width + x as usize;
      for c in 0..RGB_CHANNELS {
        dst[c * plane + idx] = pixel[order.source_channel(c)] as f32 / 255.0;
      }
    }

    Ok(())
  }
}

/// 按 (输入尺寸, 目标尺寸) 缓存最近一次计算的变换
#[derive(Debug, Default)]
pub struct LetterboxCache {
  cached: Option<LetterboxTransform>,
}

impl LetterboxCache {
  pub fn get(&mut self, input: Size, target: Size) -> Result<LetterboxTransform, GeometryError> {
    match self.cached {
      Some(transform) if transform.input == input && transform.target == target => Ok(transform),
      _ => {
        let transform = LetterboxTransform::compute(input, target)?;
        self.cached = Some(transform);
        Ok(transform)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::ChannelOrder;

  fn assert_close(a: [f32; 4], b: [f32; 4], tol: f32) {
    for (x, y) in a.iter().zip(b.iter()) {
      assert!((x - y).abs() < tol, "{:?} != {:?}", a, b);
    }
  }

  #[test]
  fn test_vertical_padding() {
    let t = LetterboxTransform::compute(Size::new(640, 480), Size::new(640, 640)).unwrap();
    assert_eq!(t.ratio(), 1.0);
    assert_eq!(t.pad_x(), 0.0);
    assert_eq!(t.pad_y(), 80.0);
  }

  #[test]
  fn test_horizontal_padding() {
    let t = LetterboxTransform::compute(Size::new(480, 640), Size::new(640, 640)).unwrap();
    assert_eq!(t.ratio(), 1.0);
    assert_eq!(t.pad_x(), 80.0);
    assert_eq!(t.pad_y(), 0.0);
  }

  #[test]
  fn test_zero_padding_when_aspect_matches() {
    for (input, target) in [
      (Size::new(1280, 720), Size::new(640, 360)),
      (Size::new(1920, 1080), Size::new(608, 342)),
      (Size::new(608, 608), Size::new(608, 608)),
    ] {
      let t = LetterboxTransform::compute(input, target).unwrap();
      assert_eq!(t.pad_x(), 0.0);
      assert_eq!(t.pad_y(), 0.0);
    }
  }

  #[test]
  fn test_longer_side_fills_target() {
    let t = LetterboxTransform::compute(Size::new(1920, 1080), Size::new(608, 608)).unwrap();
    assert!((1920.0 * t.ratio() - 608.0).abs() < 1e-3);
    assert!((t.pad_y() - (608.0 - 1080.0 * t.ratio()) / 2.0).abs() < 1e-3);
  }

  #[test]
  fn test_pixel_placement_within_half_pixel_of_inverse() {
    for (input, target) in [
      (Size::new(640, 481), Size::new(640, 640)),
      (Size::new(641, 480), Size::new(640, 640)),
      (Size::new(1920, 1080), Size::new(608, 608)),
      (Size::new(300, 900), Size::new(416, 256)),
      (Size::new(333, 77), Size::new(608, 608)),
    ] {
      let t = LetterboxTransform::compute(input, target).unwrap();
      assert!((t.offset.0 as f32 - t.pad_x()).abs() <= 0.5, "{:?}", t);
      assert!((t.offset.1 as f32 - t.pad_y()).abs() <= 0.5, "{:?}", t);
      let right = t.offset.0 as f32 + t.scaled.width as f32;
      let bottom = t.offset.1 as f32 + t.scaled.height as f32;
      assert!((right - (input.width as f32 * t.ratio() + t.pad_x())).abs() <= 1.0, "{:?}", t);
      assert!((bottom - (input.height as f32 * t.ratio() + t.pad_y())).abs() <= 1.0, "{:?}", t);

      // 贴图区域的左上角映射回输入原点附近
      let [x1, y1, ..] = t.inverse([t.offset.0 as f32, t.offset.1 as f32, 0.0, 0.0]);
      assert!(x1.abs() * t.ratio() <= 0.5 && y1.abs() * t.ratio() <= 0.5, "{:?}", t);
    }
  }

  #[test]
  fn test_degenerate_geometry() {
    for (input, target) in [
      (Size::new(0, 480), Size::new(640, 640)),
      (Size::new(640, 0), Size::new(640, 640)),
      (Size::new(640, 480), Size::new(0, 640)),
    ] {
      assert_eq!(
        LetterboxTransform::compute(input, target),
        Err(GeometryError::InvalidGeometry { input, target })
      );
    }
  }

  #[test]
  fn test_round_trip() {
    let cases = [
      (Size::new(1920, 1080), Size::new(608, 608)),
      (Size::new(640, 480), Size::new(640, 640)),
      (Size::new(300, 900), Size::new(416, 256)),
      (Size::new(1280, 720), Size::new(640, 360)),
    ];
    for (input, target) in cases {
      let t = LetterboxTransform::compute(input, target).unwrap();
      let (w, h) = (input.width as f32, input.height as f32);
      for bbox in [
        [0.0, 0.0, w, h],
        [w * 0.1, h * 0.2, w * 0.4, h * 0.9],
        [w * 0.5, h * 0.5, w * 0.5 + 1.0, h * 0.5 + 1.0],
      ] {
        let back = t.inverse(t.forward_box(bbox));
        assert_close(back, bbox, 1e-2);
      }
    }
  }

  #[test]
  fn test_inverse_single_box() {
    let t = LetterboxTransform::compute(Size::new(640, 480), Size::new(640, 640)).unwrap();
    assert_close(
      t.inverse([320.0, 240.0, 100.0, 50.0]),
      [270.0, 135.0, 370.0, 185.0],
      1e-4,
    );
  }

  #[test]
  fn test_forward_writes_chw_with_padding() {
    let input = Size::new(4, 2);
    let target = Size::new(4, 4);
    // BGR 输入：蓝=10, 绿=20, 红=30
    let data = [10u8, 20, 30].repeat(input.area());
    let frame = Frame::new("f", input, ChannelOrder::Bgr, data).unwrap();
    let t = LetterboxTransform::compute(input, target).unwrap();

    let mut canvas = RgbImage::new(target.width, target.height);
    let mut dst = vec![0.0f32; 3 * target.area()];
    t.forward(&frame, &mut canvas, &mut dst, 128).unwrap();

    let plane = target.area();
    let pad = 128.0 / 255.0;
    // 第 0 行与第 3 行为填充
    for x in 0..4 {
      assert_eq!(dst[x], pad);
      assert_eq!(dst[3 * 4 + x], pad);
    }
    // 中间两行：R 通道来自源的第 2 通道
    for y in 1..3 {
      for x in 0..4 {
        let idx = y * 4 + x;
        assert!((dst[idx] - 30.0 / 255.0).abs() < 1e-6);
        assert!((dst[plane + idx] - 20.0 / 255.0).abs() < 1e-6);
        assert!((dst[2 * plane + idx] - 10.0 / 255.0).abs() < 1e-6);
      }
    }
  }

  #[test]
  fn test_forward_rejects_other_resolution() {
    let t = LetterboxTransform::compute(Size::new(4, 2), Size::new(4, 4)).unwrap();
    let frame = Frame::new("f", Size::new(2, 2), ChannelOrder::Rgb, vec![0; 12]).unwrap();
    let mut canvas = RgbImage::new(4, 4);
    let mut dst = vec![0.0f32; 48];
    assert!(t.forward(&frame, &mut canvas, &mut dst, 0).is_err());
  }

  #[test]
  fn test_cache_recomputes_on_change() {
    let mut cache = LetterboxCache::default();
    let a = cache.get(Size::new(640, 480), Size::new(640, 640)).unwrap();
    let b = cache.get(Size::new(640, 480), Size::new(640, 640)).unwrap();
    assert_eq!(a, b);
    let c = cache.get(Size::new(480, 640), Size::new(640, 640)).unwrap();
    assert_eq!(c.pad_x(), 80.0);
    assert!(cache.get(Size::new(0, 640), Size::new(640, 640)).is_err());
  }
}

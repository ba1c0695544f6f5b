// 该文件是 Weicheng （渭城朝雨） 项目的一部分。
// src/frame.rs - RGB 帧与输入张量缓冲定义
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

use image::{ImageBuffer, Rgb, RgbImage};

const RGB_CHANNELS: usize = 3;

/// RGB 像素帧，HWC 排布，尺寸在运行时确定
#[derive(Debug, Clone)]
pub struct RgbFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl RgbFrame {
  pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
    if data.len() != RGB_CHANNELS * width as usize * height as usize {
      panic!(
        "数据长度不匹配: 期望长度 {}, 实际长度 {}",
        RGB_CHANNELS * width as usize * height as usize,
        data.len()
      );
    }

    Self {
      width,
      height,
      data: data.into_boxed_slice(),
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_raw(&self) -> &[u8] {
    &self.data
  }

  /// 转为 image 库的 RGB 图像
  pub fn to_rgb_image(&self) -> RgbImage {
    ImageBuffer::from_fn(self.width, self.height, |x, y| {
      let idx = ((y * self.width + x) as usize) * RGB_CHANNELS;
      Rgb([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    })
  }
}

impl From<RgbImage> for RgbFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = (image.width(), image.height());
    Self::new(width, height, image.into_raw())
  }
}

/// 每次推理调用的输入张量暂存区。
///
/// 由检测器独占持有并在多次调用间复用；预处理链的各个步骤依次在其上就地变换，
/// 同时记录原始尺寸与缩放比例等辅助形状信息。
#[derive(Debug, Clone, Default)]
pub struct ImageBlob {
  /// 原始图像宽度
  pub ori_width: u32,
  /// 原始图像高度
  pub ori_height: u32,
  /// 当前张量宽度（经缩放、填充后）
  pub width: u32,
  /// 当前张量高度（经缩放、填充后）
  pub height: u32,
  /// 横向缩放比例
  pub scale_x: f32,
  /// 纵向缩放比例
  pub scale_y: f32,
  /// 数据排布是否为 CHW（Permute 之后为 true）
  pub channel_first: bool,
  /// 像素数据，初始为 HWC 排布的 0-255 浮点值
  pub data: Vec<f32>,
}

impl ImageBlob {
  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// 用一帧图像重置暂存区，保留已分配的容量
  pub fn reset(&mut self, frame: &RgbFrame) {
    self.ori_width = frame.width();
    self.ori_height = frame.height();
    self.width = frame.width();
    self.height = frame.height();
    self.scale_x = 1.0;
    self.scale_y = 1.0;
    self.channel_first = false;
    self.data.clear();
    self.data.extend(frame.as_raw().iter().map(|&v| v as f32));
  }

  /// 当前张量形状，NCHW 或 NHWC 取决于排布标志
  pub fn shape(&self) -> [usize; 4] {
    if self.channel_first {
      [1, RGB_CHANNELS, self.height as usize, self.width as usize]
    } else {
      [1, self.height as usize, self.width as usize, RGB_CHANNELS]
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frame_round_trip_through_rgb_image() {
    let data: Vec<u8> = (0..2 * 2 * 3).map(|v| v as u8).collect();
    let frame = RgbFrame::new(2, 2, data.clone());
    let image = frame.to_rgb_image();
    let back = RgbFrame::from(image);
    assert_eq!(back.as_raw(), &data[..]);
  }

  #[test]
  #[should_panic]
  fn frame_rejects_mismatched_length() {
    let _ = RgbFrame::new(2, 2, vec![0u8; 5]);
  }

  #[test]
  fn blob_reset_keeps_capacity_and_records_shape() {
    let frame = RgbFrame::new(4, 2, vec![128u8; 4 * 2 * 3]);
    let mut blob = ImageBlob::default();
    blob.reset(&frame);
    let cap = blob.data.capacity();
    blob.reset(&frame);

    assert_eq!(blob.data.capacity(), cap);
    assert_eq!(blob.shape(), [1, 2, 4, 3]);
    assert_eq!(blob.data.len(), 4 * 2 * 3);
    assert!((blob.data[0] - 128.0).abs() < f32::EPSILON);
    assert_eq!((blob.ori_width, blob.ori_height), (4, 2));
  }
}

// 该文件是 Weicheng （渭城朝雨） 项目的一部分。
// src/visualize.rs - 检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::warn;

use crate::detector::Detection;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: i32 = 20;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const FALLBACK_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色

#[derive(Error, Debug)]
#[error("类别 {class_id} 没有对应标签（标签表共 {num_labels} 项）")]
pub struct LabelLookupError {
  pub class_id: u32,
  pub num_labels: usize,
}

/// 为每个类别生成可视化颜色。
///
/// 采用固定的位交织方案：类别编号每轮取 3 个比特分配给 R/G/B 的
/// 高位，保证确定性且相邻类别颜色可区分。
pub fn generate_color_map(num_classes: usize) -> Vec<[u8; 3]> {
  (0..num_classes)
    .map(|i| {
      let mut color = [0u8; 3];
      let mut lab = i;
      let mut j = 0u32;
      while lab != 0 && j < 8 {
        for (c, channel) in color.iter_mut().enumerate() {
          *channel |= (((lab >> c) & 1) as u8) << (7 - j);
        }
        j += 1;
        lab >>= 3;
      }
      color
    })
    .collect()
}

/// 可视化工具，持有颜色表与可选字体
pub struct Visualizer {
  font: Option<FontArc>,
  font_scale: PxScale,
  colormap: Vec<[u8; 3]>,
}

impl Visualizer {
  /// 按类别数生成颜色表创建可视化工具，不加载字体时只画边框不写标签
  pub fn new(num_classes: usize) -> Self {
    Self {
      font: None,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      colormap: generate_color_map(num_classes),
    }
  }

  /// 从字体文件加载标签文本所用的字体
  pub fn with_font_file(mut self, path: &Path) -> Result<Self, std::io::Error> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data).map_err(|e| {
      std::io::Error::new(std::io::ErrorKind::InvalidData, format!("无法加载字体: {}", e))
    })?;
    self.font = Some(font);
    Ok(self)
  }

  fn color_for(&self, class_id: u32) -> [u8; 3] {
    if self.colormap.is_empty() {
      FALLBACK_COLOR
    } else {
      self.colormap[class_id as usize % self.colormap.len()]
    }
  }

  /// 在源图像的副本上绘制检测结果，源图像不被修改。
  ///
  /// 每个检测画一个 2 像素边框与 "标签 置信度" 文本；
  /// 类别编号超出标签表范围时失败。
  pub fn visualize_result(
    &self,
    img: &RgbImage,
    results: &[Detection],
    label_list: &[String],
  ) -> Result<RgbImage, LabelLookupError> {
    let mut canvas = img.clone();
    let (img_w, img_h) = (canvas.width() as i32, canvas.height() as i32);

    if self.font.is_none() && !results.is_empty() {
      warn!("未加载字体，标签文本将被跳过");
    }

    for det in results {
      let label = label_list
        .get(det.class_id as usize)
        .ok_or(LabelLookupError {
          class_id: det.class_id,
          num_labels: label_list.len(),
        })?;
      let color = Rgb(self.color_for(det.class_id));

      // 空图像上无从绘制，但标签校验照常进行
      if img_w <= 0 || img_h <= 0 {
        continue;
      }

      let [left, top, right, bottom] = det.rect;
      let left = left.clamp(0, img_w - 1);
      let top = top.clamp(0, img_h - 1);
      let right = right.clamp(0, img_w - 1);
      let bottom = bottom.clamp(0, img_h - 1);
      if left >= right || top >= bottom {
        warn!("退化的边界框被跳过: {:?}", det.rect);
        continue;
      }

      let width = (right - left) as u32;
      let height = (bottom - top) as u32;
      draw_hollow_rect_mut(&mut canvas, Rect::at(left, top).of_size(width, height), color);
      // 第二圈边框增加可见度
      if width > 2 && height > 2 {
        draw_hollow_rect_mut(
          &mut canvas,
          Rect::at(left + 1, top + 1).of_size(width - 2, height - 2),
          color,
        );
      }

      let text = format!("{} {:.2}", label, det.confidence);
      let text_width = ((text.len() as f32 * LABEL_CHAR_WIDTH) as i32).min(img_w - left);
      let label_y = (top - LABEL_TEXT_HEIGHT).max(0);

      if text_width > 0 {
        let rect = Rect::at(left, label_y).of_size(text_width as u32, LABEL_TEXT_HEIGHT as u32);
        draw_filled_rect_mut(&mut canvas, rect, color);

        if let Some(font) = &self.font {
          draw_text_mut(
            &mut canvas,
            Rgb([255, 255, 255]),
            left,
            label_y + LABEL_TEXT_VERTICAL_PADDING,
            self.font_scale,
            font,
            &text,
          );
        }
      }
    }

    Ok(canvas)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn white_image(size: u32) -> RgbImage {
    RgbImage::from_pixel(size, size, Rgb([255, 255, 255]))
  }

  fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn color_map_is_deterministic() {
    assert_eq!(generate_color_map(80), generate_color_map(80));
  }

  #[test]
  fn adjacent_classes_get_distinct_colors() {
    let map = generate_color_map(80);
    for pair in map.windows(2) {
      assert_ne!(pair[0], pair[1]);
    }
  }

  #[test]
  fn color_map_matches_bit_interleaving_scheme() {
    let map = generate_color_map(4);
    assert_eq!(map[0], [0, 0, 0]);
    assert_eq!(map[1], [128, 0, 0]);
    assert_eq!(map[2], [0, 128, 0]);
    assert_eq!(map[3], [128, 128, 0]);
  }

  #[test]
  fn visualize_does_not_mutate_source_image() {
    let img = white_image(64);
    let before = img.clone();
    let detections = vec![Detection {
      rect: [10, 25, 40, 50],
      class_id: 1,
      confidence: 0.9,
    }];

    let canvas = Visualizer::new(2)
      .visualize_result(&img, &detections, &labels(&["background", "person"]))
      .unwrap();

    assert_eq!(img.as_raw(), before.as_raw());
    assert_ne!(canvas.as_raw(), img.as_raw());
    // 边框像素被染成类别颜色
    assert_eq!(canvas.get_pixel(10, 25), &Rgb([128, 0, 0]));
    // 远离所有绘制区域的像素保持原样
    assert_eq!(canvas.get_pixel(60, 60), &Rgb([255, 255, 255]));
  }

  #[test]
  fn out_of_range_class_id_fails_lookup() {
    let img = white_image(32);
    let detections = vec![Detection {
      rect: [1, 1, 10, 10],
      class_id: 9,
      confidence: 0.8,
    }];

    let err = Visualizer::new(2)
      .visualize_result(&img, &detections, &labels(&["background", "person"]))
      .unwrap_err();
    assert_eq!(err.class_id, 9);
    assert_eq!(err.num_labels, 2);
  }

  #[test]
  fn empty_result_list_copies_the_image() {
    let img = white_image(16);
    let canvas = Visualizer::new(2)
      .visualize_result(&img, &[], &labels(&["background", "person"]))
      .unwrap();
    assert_eq!(canvas.as_raw(), img.as_raw());
  }

  #[test]
  fn zero_sized_image_does_not_panic() {
    let img = RgbImage::new(0, 0);
    let detections = vec![Detection {
      rect: [0, 0, 10, 10],
      class_id: 1,
      confidence: 0.9,
    }];

    let canvas = Visualizer::new(2)
      .visualize_result(&img, &detections, &labels(&["background", "person"]))
      .unwrap();
    assert_eq!(canvas.dimensions(), (0, 0));
  }

  #[test]
  fn zero_sized_image_still_validates_labels() {
    let img = RgbImage::new(0, 0);
    let detections = vec![Detection {
      rect: [0, 0, 10, 10],
      class_id: 5,
      confidence: 0.9,
    }];

    let err = Visualizer::new(2)
      .visualize_result(&img, &detections, &labels(&["background", "person"]))
      .unwrap_err();
    assert_eq!(err.class_id, 5);
  }

  #[test]
  fn degenerate_boxes_are_skipped_without_error() {
    let img = white_image(32);
    let detections = vec![Detection {
      rect: [10, 10, 10, 10],
      class_id: 1,
      confidence: 0.9,
    }];

    let canvas = Visualizer::new(2)
      .visualize_result(&img, &detections, &labels(&["background", "person"]))
      .unwrap();
    assert_eq!(canvas.as_raw(), img.as_raw());
  }
}

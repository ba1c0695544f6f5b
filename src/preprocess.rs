// 该文件是 Weicheng （渭城朝雨） 项目的一部分。
// src/preprocess.rs - 图像预处理链
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

use image::{ImageBuffer, Rgb, RgbImage, imageops::FilterType};
use serde::Deserialize;
use tracing::debug;

use crate::frame::{ImageBlob, RgbFrame};

fn default_true() -> bool {
  true
}

/// 单个预处理步骤，由配置文件按顺序声明。
///
/// 每个步骤都是纯的值到值变换，在检测器构造时组装为一条链，
/// 而不是硬编码在检测器内部。
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum PreprocessOp {
  /// 缩放到目标尺寸，interp: 0 最近邻 / 1 双线性 / 2 三次
  Resize {
    target_size: u32,
    #[serde(default)]
    interp: u32,
    #[serde(default)]
    keep_ratio: bool,
  },
  /// 按通道归一化，可选先除以 255
  NormalizeImage {
    mean: [f32; 3],
    std: [f32; 3],
    #[serde(default = "default_true")]
    is_scale: bool,
  },
  /// HWC 转 CHW
  Permute,
  /// 高宽零填充到 stride 的整数倍
  PadStride { stride: u32 },
}

impl PreprocessOp {
  /// 参数合法性检查，在配置加载时调用
  pub fn validate(&self) -> Result<(), String> {
    match self {
      PreprocessOp::Resize { target_size, .. } if *target_size == 0 => {
        Err("Resize 的 target_size 不能为 0".to_string())
      }
      PreprocessOp::NormalizeImage { std, .. } if std.iter().any(|&v| v == 0.0) => {
        Err("NormalizeImage 的 std 不能包含 0".to_string())
      }
      _ => Ok(()),
    }
  }

  /// 在暂存区上就地应用该步骤
  pub fn apply(&self, blob: &mut ImageBlob) {
    match self {
      PreprocessOp::Resize {
        target_size,
        interp,
        keep_ratio,
      } => resize(blob, *target_size, *interp, *keep_ratio),
      PreprocessOp::NormalizeImage {
        mean,
        std,
        is_scale,
      } => normalize(blob, mean, std, *is_scale),
      PreprocessOp::Permute => permute(blob),
      PreprocessOp::PadStride { stride } => pad_stride(blob, *stride),
    }
  }
}

fn filter_type(interp: u32) -> FilterType {
  match interp {
    0 => FilterType::Nearest,
    1 => FilterType::Triangle,
    2 => FilterType::CatmullRom,
    _ => FilterType::Triangle,
  }
}

// 缩放要求数据仍为未归一化的 HWC 排布
fn resize(blob: &mut ImageBlob, target_size: u32, interp: u32, keep_ratio: bool) {
  debug_assert!(!blob.channel_first, "Resize 必须在 Permute 之前执行");

  let (src_w, src_h) = (blob.width, blob.height);
  let (dst_w, dst_h) = if keep_ratio {
    let scale = target_size as f32 / src_w.max(src_h) as f32;
    (
      ((src_w as f32 * scale).round() as u32).max(1),
      ((src_h as f32 * scale).round() as u32).max(1),
    )
  } else {
    (target_size, target_size)
  };

  if (dst_w, dst_h) == (src_w, src_h) {
    return;
  }

  let src: RgbImage = ImageBuffer::from_fn(src_w, src_h, |x, y| {
    let idx = ((y * src_w + x) as usize) * 3;
    Rgb([
      blob.data[idx].clamp(0.0, 255.0) as u8,
      blob.data[idx + 1].clamp(0.0, 255.0) as u8,
      blob.data[idx + 2].clamp(0.0, 255.0) as u8,
    ])
  });
  let resized = image::imageops::resize(&src, dst_w, dst_h, filter_type(interp));

  blob.data.clear();
  blob.data.extend(resized.as_raw().iter().map(|&v| v as f32));
  blob.width = dst_w;
  blob.height = dst_h;
  blob.scale_x = dst_w as f32 / blob.ori_width as f32;
  blob.scale_y = dst_h as f32 / blob.ori_height as f32;
}

fn normalize(blob: &mut ImageBlob, mean: &[f32; 3], std: &[f32; 3], is_scale: bool) {
  let plane = (blob.width * blob.height) as usize;
  let channel_first = blob.channel_first;
  for (idx, v) in blob.data.iter_mut().enumerate() {
    let c = if channel_first { idx / plane } else { idx % 3 };
    let mut value = *v;
    if is_scale {
      value /= 255.0;
    }
    *v = (value - mean[c]) / std[c];
  }
}

fn permute(blob: &mut ImageBlob) {
  if blob.channel_first {
    return;
  }

  let plane = (blob.width * blob.height) as usize;
  let mut chw = vec![0.0f32; blob.data.len()];
  for i in 0..plane {
    for c in 0..3 {
      chw[c * plane + i] = blob.data[i * 3 + c];
    }
  }
  blob.data = chw;
  blob.channel_first = true;
}

fn pad_stride(blob: &mut ImageBlob, stride: u32) {
  if stride <= 1 {
    return;
  }

  let (w, h) = (blob.width, blob.height);
  let pad_w = w.div_ceil(stride) * stride;
  let pad_h = h.div_ceil(stride) * stride;
  if (pad_w, pad_h) == (w, h) {
    return;
  }

  // 在右侧与下方补零
  let mut padded = vec![0.0f32; 3 * pad_w as usize * pad_h as usize];
  if blob.channel_first {
    for c in 0..3usize {
      for y in 0..h as usize {
        let src = c * (w * h) as usize + y * w as usize;
        let dst = c * (pad_w * pad_h) as usize + y * pad_w as usize;
        padded[dst..dst + w as usize].copy_from_slice(&blob.data[src..src + w as usize]);
      }
    }
  } else {
    for y in 0..h as usize {
      let src = y * w as usize * 3;
      let dst = y * pad_w as usize * 3;
      padded[dst..dst + w as usize * 3].copy_from_slice(&blob.data[src..src + w as usize * 3]);
    }
  }
  blob.data = padded;
  blob.width = pad_w;
  blob.height = pad_h;
}

/// 预处理链，在检测器构造时从配置组装一次
#[derive(Debug, Clone)]
pub struct Preprocessor {
  ops: Vec<PreprocessOp>,
}

impl Preprocessor {
  pub fn new(ops: &[PreprocessOp]) -> Self {
    debug!("组装预处理链，共 {} 个步骤", ops.len());
    Self { ops: ops.to_vec() }
  }

  /// 将一帧图像变换为输入张量，结果写入复用的暂存区
  pub fn run(&self, frame: &RgbFrame, blob: &mut ImageBlob) {
    blob.reset(frame);
    for op in &self.ops {
      op.apply(blob);
    }
  }
}

// 该文件是 Weicheng （渭城朝雨） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图片推理演示
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use weicheng::{Detector, Device, PredictOptions, RgbFrame, RunMode, Visualizer};

/// Weicheng 单张图片推理演示
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型目录，需包含权重文件与推理配置
  #[arg(long, value_name = "DIR")]
  pub model_dir: PathBuf,

  /// 输入图片路径
  #[arg(long, value_name = "IMAGE")]
  pub input: PathBuf,

  /// 标注结果输出路径
  #[arg(long, value_name = "IMAGE")]
  pub output: PathBuf,

  /// 计算设备: cpu / gpu / coreml
  #[arg(long, default_value = "cpu", value_name = "DEVICE")]
  pub device: Device,

  /// 执行模式: standard / trt_fp32 / trt_fp16 / trt_int8
  #[arg(long, default_value = "standard", value_name = "MODE")]
  pub run_mode: RunMode,

  /// 设备编号
  #[arg(long, default_value = "0", value_name = "ID")]
  pub device_id: u32,

  /// TensorRT INT8 校准模式
  #[arg(long)]
  pub trt_calib_mode: bool,

  /// 置信度阈值，缺省使用模型配置中的默认值
  #[arg(long, value_name = "THRESHOLD")]
  pub threshold: Option<f32>,

  /// 标签文本字体文件，缺省时只画边框
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型目录: {}", args.model_dir.display());
  info!("输入图片: {}", args.input.display());
  info!("输出路径: {}", args.output.display());

  let mut detector = Detector::new(
    &args.model_dir,
    args.device,
    args.run_mode,
    args.device_id,
    args.trt_calib_mode,
  )?;

  let image = image::open(&args.input)?.to_rgb8();
  let frame = RgbFrame::from(image.clone());

  let options = PredictOptions {
    threshold: args.threshold,
    ..Default::default()
  };
  let mut result = Vec::new();

  info!("开始推理...");
  let now = std::time::Instant::now();
  detector.predict(&frame, &options, &mut result)?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  info!("检测到 {} 个目标", result.len());
  for det in &result {
    let label = detector
      .label_list()
      .get(det.class_id as usize)
      .map(String::as_str)
      .unwrap_or("?");
    info!(
      "  - {}: {:.2}% at [{}, {}, {}, {}]",
      label,
      det.confidence * 100.0,
      det.rect[0],
      det.rect[1],
      det.rect[2],
      det.rect[3]
    );
  }

  let mut visualizer = Visualizer::new(detector.label_list().len());
  if let Some(font) = &args.font {
    visualizer = visualizer.with_font_file(font)?;
  }
  let canvas = visualizer.visualize_result(&image, &result, detector.label_list())?;
  canvas.save(&args.output)?;
  info!("标注结果已保存到 {}", args.output.display());

  Ok(())
}

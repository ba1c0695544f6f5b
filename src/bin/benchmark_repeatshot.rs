// 该文件是 Weicheng （渭城朝雨） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复推理基准测试
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

use weicheng::{Detector, Device, PredictOptions, RgbFrame, RunMode};

/// Weicheng 重复推理基准测试
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型目录，需包含权重文件与推理配置
  #[arg(long, value_name = "DIR")]
  pub model_dir: PathBuf,

  /// 输入图片路径
  #[arg(long, value_name = "IMAGE")]
  pub input: PathBuf,

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

  /// 预热次数，不计时
  #[arg(long, default_value = "10", value_name = "COUNT")]
  pub warmup: usize,

  /// 重复次数
  #[arg(long, default_value = "100", value_name = "COUNT")]
  pub repeats: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let mut detector = Detector::new(
    &args.model_dir,
    args.device,
    args.run_mode,
    args.device_id,
    args.trt_calib_mode,
  )?;

  let image = image::open(&args.input)?.to_rgb8();
  let frame = RgbFrame::from(image);

  let options = PredictOptions {
    threshold: None,
    warmup: args.warmup,
    repeats: args.repeats,
    run_benchmark: true,
  };
  let mut result = Vec::new();

  info!("开始基准测试: 预热 {} 次, 重复 {} 次", args.warmup, args.repeats);
  detector.predict(&frame, &options, &mut result)?;

  info!("最后一次解码结果共 {} 个目标", result.len());
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

  Ok(())
}

// 该文件是 Weicheng （渭城朝雨） 项目的一部分。
// src/detector.rs - 目标检测器与结果解码
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
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, DetectorConfig};
use crate::engine::{self, Device, EngineInitError, EngineRunError, Predictable, RunMode};
use crate::frame::{ImageBlob, RgbFrame};
use crate::preprocess::Preprocessor;

/// 原始输出每行的浮点数个数: 类别、得分、左、上、右、下
const OUTPUT_ROW_WIDTH: usize = 6;

/// 单个检测结果，由解码器产出后不再变化
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  /// 边界框像素坐标 [左, 上, 右, 下]，已夹取到源图像范围内
  pub rect: [i32; 4],
  /// 类别编号
  pub class_id: u32,
  /// 置信度，位于 [0, 1]
  pub confidence: f32,
}

/// 检测器构造错误，构造要么完全成功要么不产生任何可用对象
#[derive(Error, Debug)]
pub enum DetectorError {
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error(transparent)]
  EngineInit(#[from] EngineInitError),
}

/// 单次推理调用错误。
///
/// 只有引擎执行失败会让调用失败；形状不合法的输出行被视为模型噪声，
/// 静默丢弃后调用仍然成功返回。
#[derive(Error, Debug)]
pub enum InferenceError {
  #[error(transparent)]
  Engine(#[from] EngineRunError),
}

/// 单次调用的预测参数
#[derive(Debug, Clone)]
pub struct PredictOptions {
  /// 置信度阈值，None 时使用配置中的默认阈值
  pub threshold: Option<f32>,
  /// 基准测试前的预热次数，不计时
  pub warmup: usize,
  /// 基准测试的重复次数
  pub repeats: usize,
  /// 是否以基准测试模式运行
  pub run_benchmark: bool,
}

impl Default for PredictOptions {
  fn default() -> Self {
    Self {
      threshold: None,
      warmup: 0,
      repeats: 1,
      run_benchmark: false,
    }
  }
}

/// 目标检测器。
///
/// 从模型目录构造一次，此后除内部暂存缓冲区外不可变。
/// 暂存缓冲区在多次调用间复用且由本实例独占，因此同一实例上的
/// `predict` 不能并发调用，需要并行时每个工作线程各持有一个实例，
/// 或由调用方以互斥锁串行化。
pub struct Detector {
  config: DetectorConfig,
  preprocessor: Preprocessor,
  engine: Box<dyn Predictable>,
  threshold: f32,
  // 调用间复用的暂存区
  inputs: ImageBlob,
  output_data: Vec<f32>,
}

impl Detector {
  /// 从模型目录构造检测器。
  ///
  /// 依次完成配置加载、预处理链组装与推理引擎初始化，任一步失败
  /// 则整个构造失败。
  pub fn new(
    model_dir: &Path,
    device: Device,
    run_mode: RunMode,
    device_id: u32,
    trt_calib_mode: bool,
  ) -> Result<Self, DetectorError> {
    info!("从 {} 加载检测器", model_dir.display());
    let config = DetectorConfig::load(model_dir)?;
    let preprocessor = Preprocessor::new(&config.preprocess);
    let engine = engine::build_engine(
      model_dir,
      device,
      run_mode,
      device_id,
      trt_calib_mode,
      config.min_subgraph_size,
    )?;
    let threshold = config.draw_threshold;
    info!("检测器就绪: arch={}", config.arch);

    Ok(Self {
      config,
      preprocessor,
      engine,
      threshold,
      inputs: ImageBlob::default(),
      output_data: Vec::new(),
    })
  }

  /// 只读的类别标签表，下标即类别编号
  pub fn label_list(&self) -> &[String] {
    &self.config.label_list
  }

  /// 对一帧图像执行推理，解码结果写入调用方提供的列表（原有内容被替换）。
  ///
  /// 基准测试模式先进行 warmup 次不计时的预热，再重复 repeats 次并
  /// 记录平均耗时，最终解码结果与单次调用一致。
  pub fn predict(
    &mut self,
    frame: &RgbFrame,
    options: &PredictOptions,
    result: &mut Vec<Detection>,
  ) -> Result<(), InferenceError> {
    let threshold = options.threshold.unwrap_or(self.threshold);

    self.preprocessor.run(frame, &mut self.inputs);
    debug!(
      "预处理完成: {}x{} -> {:?}",
      frame.width(),
      frame.height(),
      self.inputs.shape()
    );

    if options.run_benchmark {
      for _ in 0..options.warmup {
        self.engine.run(&self.inputs, &mut self.output_data)?;
      }

      let repeats = options.repeats.max(1);
      let mut total = Duration::ZERO;
      for i in 0..repeats {
        let now = Instant::now();
        self.engine.run(&self.inputs, &mut self.output_data)?;
        let elapsed = now.elapsed();
        debug!("({}) 推理耗时: {:.2?}", i, elapsed);
        total += elapsed;
      }
      info!(
        "基准测试完成: 预热 {} 次, 重复 {} 次, 平均推理时间 {:.2?}",
        options.warmup,
        repeats,
        total / repeats as u32
      );
    } else {
      self.engine.run(&self.inputs, &mut self.output_data)?;
    }

    result.clear();
    decode_detections(
      &self.output_data,
      frame.width(),
      frame.height(),
      threshold,
      self.config.background_label,
      result,
    );
    debug!("检测到 {} 个目标", result.len());
    Ok(())
  }
}

/// 把定宽的原始输出行解码为检测结果。
///
/// 每行依次为 (类别, 得分, 左, 上, 右, 下)。背景类别与低于阈值的行被
/// 跳过；坐标夹取到 [0, 宽] × [0, 高] 后取整；夹取后左右或上下颠倒的
/// 行属于模型可能产生的退化输出，同样丢弃。输出保持引擎的行顺序，
/// 不做重排序也不做非极大值抑制。
pub fn decode_detections(
  raw: &[f32],
  width: u32,
  height: u32,
  threshold: f32,
  background_label: Option<u32>,
  result: &mut Vec<Detection>,
) {
  let remainder = raw.len() % OUTPUT_ROW_WIDTH;
  if remainder != 0 {
    warn!(
      "原始输出长度 {} 不是行宽 {} 的整数倍，末尾 {} 个值被丢弃",
      raw.len(),
      OUTPUT_ROW_WIDTH,
      remainder
    );
  }

  for row in raw.chunks_exact(OUTPUT_ROW_WIDTH) {
    let class_raw = row[0];
    let confidence = row[1];

    if !class_raw.is_finite() || class_raw < 0.0 {
      debug!("类别取值非法的输出行被丢弃: {:?}", row);
      continue;
    }
    if !confidence.is_finite() {
      debug!("得分非法的输出行被丢弃: {:?}", row);
      continue;
    }
    let class_id = class_raw.round() as u32;

    if background_label == Some(class_id) {
      continue;
    }
    if confidence < threshold {
      continue;
    }

    let left = row[2].clamp(0.0, width as f32).round() as i32;
    let top = row[3].clamp(0.0, height as f32).round() as i32;
    let right = row[4].clamp(0.0, width as f32).round() as i32;
    let bottom = row[5].clamp(0.0, height as f32).round() as i32;

    if right < left || bottom < top {
      debug!("坐标颠倒的输出行被丢弃: {:?}", row);
      continue;
    }

    result.push(Detection {
      rect: [left, top, right, bottom],
      class_id,
      confidence,
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn decode(raw: &[f32], threshold: f32) -> Vec<Detection> {
    let mut result = Vec::new();
    decode_detections(raw, 300, 300, threshold, Some(0), &mut result);
    result
  }

  #[test]
  fn background_and_low_score_rows_are_dropped() {
    // 三行: 背景、低于阈值、正常
    let raw = [
      0.0, 0.9, 10.0, 10.0, 50.0, 50.0, //
      2.0, 0.3, 5.0, 5.0, 20.0, 20.0, //
      1.0, 0.7, 100.0, 100.0, 200.0, 200.0,
    ];
    let result = decode(&raw, 0.5);

    assert_eq!(result.len(), 1);
    assert_eq!(
      result[0],
      Detection {
        rect: [100, 100, 200, 200],
        class_id: 1,
        confidence: 0.7,
      }
    );
  }

  #[test]
  fn emitted_detections_satisfy_threshold_and_sentinel() {
    let raw = [
      1.0, 0.51, 0.0, 0.0, 10.0, 10.0, //
      0.0, 0.99, 0.0, 0.0, 10.0, 10.0, //
      3.0, 0.49, 0.0, 0.0, 10.0, 10.0,
    ];
    let result = decode(&raw, 0.5);

    for det in &result {
      assert!(det.confidence >= 0.5);
      assert_ne!(det.class_id, 0);
    }
    assert_eq!(result.len(), 1);
  }

  #[test]
  fn coordinates_are_clamped_to_image_bounds() {
    let raw = [1.0, 0.9, -20.0, -5.0, 400.0, 350.0];
    let result = decode(&raw, 0.5);

    assert_eq!(result[0].rect, [0, 0, 300, 300]);
    let [left, top, right, bottom] = result[0].rect;
    assert!(0 <= left && left <= right && right <= 300);
    assert!(0 <= top && top <= bottom && bottom <= 300);
  }

  #[test]
  fn inverted_rows_after_clamping_are_dropped() {
    // 夹取后 right < left
    let raw = [1.0, 0.9, 50.0, 10.0, 20.0, 40.0];
    let result = decode(&raw, 0.5);
    assert!(result.is_empty());
  }

  #[test]
  fn trailing_partial_row_is_dropped() {
    let raw = [
      1.0, 0.9, 10.0, 10.0, 50.0, 50.0, //
      2.0, 0.8, 1.0, // 残缺行
    ];
    let result = decode(&raw, 0.5);
    assert_eq!(result.len(), 1);
  }

  #[test]
  fn order_is_preserved() {
    let raw = [
      5.0, 0.9, 0.0, 0.0, 10.0, 10.0, //
      0.0, 0.9, 0.0, 0.0, 10.0, 10.0, //
      2.0, 0.8, 0.0, 0.0, 10.0, 10.0, //
      7.0, 0.7, 0.0, 0.0, 10.0, 10.0,
    ];
    let result = decode(&raw, 0.5);

    let ids: Vec<u32> = result.iter().map(|d| d.class_id).collect();
    assert_eq!(ids, vec![5, 2, 7]);
  }

  #[test]
  fn background_sentinel_is_configurable() {
    let raw = [
      0.0, 0.9, 0.0, 0.0, 10.0, 10.0, //
      3.0, 0.9, 0.0, 0.0, 10.0, 10.0,
    ];

    let mut result = Vec::new();
    decode_detections(&raw, 300, 300, 0.5, Some(3), &mut result);
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].class_id, 0);

    result.clear();
    decode_detections(&raw, 300, 300, 0.5, None, &mut result);
    assert_eq!(result.len(), 2);
  }

  #[test]
  fn negative_or_nan_class_rows_are_dropped() {
    let raw = [
      -1.0, 0.9, 0.0, 0.0, 10.0, 10.0, //
      f32::NAN, 0.9, 0.0, 0.0, 10.0, 10.0, //
      1.0, 0.9, 0.0, 0.0, 10.0, 10.0,
    ];
    let result = decode(&raw, 0.5);
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].class_id, 1);
  }

  #[test]
  fn nan_score_rows_are_dropped() {
    // NaN 与阈值比较恒为假，不加检查会绕过阈值过滤
    let raw = [
      1.0, f32::NAN, 10.0, 10.0, 50.0, 50.0, //
      2.0, f32::INFINITY, 10.0, 10.0, 50.0, 50.0, //
      1.0, 0.9, 0.0, 0.0, 10.0, 10.0,
    ];
    let result = decode(&raw, 0.5);

    assert_eq!(result.len(), 1);
    assert!((result[0].confidence - 0.9).abs() < 1e-6);
    for det in &result {
      assert!(det.confidence >= 0.5);
    }
  }

  #[test]
  fn decoded_class_beyond_label_list_does_not_fail_decode() {
    // 标签表长度之外的类别编号只在可视化时报错，解码阶段照常产出
    let raw = [42.0, 0.9, 0.0, 0.0, 10.0, 10.0];
    let result = decode(&raw, 0.5);
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].class_id, 42);
  }
}

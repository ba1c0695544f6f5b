// 该文件是 Weicheng （渭城朝雨） 项目的一部分。
// src/config.rs - 模型目录配置解析
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

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::preprocess::PreprocessOp;

/// 模型目录中的推理配置文件名
pub const CONFIG_FILE: &str = "infer_cfg.json";

const DEFAULT_DRAW_THRESHOLD: f32 = 0.5;
const DEFAULT_MIN_SUBGRAPH_SIZE: i32 = 3;

fn default_draw_threshold() -> f32 {
  DEFAULT_DRAW_THRESHOLD
}

fn default_min_subgraph_size() -> i32 {
  DEFAULT_MIN_SUBGRAPH_SIZE
}

fn default_background_label() -> Option<u32> {
  // 默认标签方案中 0 号类别为背景
  Some(0)
}

/// 检测器配置，在构造时从模型目录读取一次，此后只读
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
  /// 模型结构标签，如 "YOLO"、"SSD"、"RCNN"
  pub arch: String,

  /// 传递给推理引擎的最小子图规模
  #[serde(default = "default_min_subgraph_size")]
  pub min_subgraph_size: i32,

  /// 默认置信度阈值，可在单次调用时覆盖
  #[serde(default = "default_draw_threshold")]
  pub draw_threshold: f32,

  /// 有序类别标签表，下标即类别编号
  pub label_list: Vec<String>,

  /// 背景类别编号，None 表示该模型没有背景类别
  #[serde(default = "default_background_label")]
  pub background_label: Option<u32>,

  /// 预处理步骤列表，按顺序执行
  #[serde(rename = "Preprocess")]
  pub preprocess: Vec<PreprocessOp>,
}

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {0}: {1}")]
  Read(PathBuf, std::io::Error),
  #[error("配置文件格式错误: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("标签表为空")]
  EmptyLabelList,
  #[error("预处理步骤列表为空")]
  EmptyPreprocess,
  #[error("配置取值非法: {0}")]
  InvalidValue(String),
}

impl DetectorConfig {
  /// 从模型目录加载配置
  pub fn load(model_dir: &Path) -> Result<Self, ConfigError> {
    let path = model_dir.join(CONFIG_FILE);
    debug!("读取配置文件: {}", path.display());
    let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read(path, e))?;
    let config: Self = serde_json::from_str(&text)?;
    config.validate()?;
    debug!(
      "配置加载完成: arch={}, 类别数={}, 默认阈值={}",
      config.arch,
      config.label_list.len(),
      config.draw_threshold
    );
    Ok(config)
  }

  /// 配置一致性校验。
  ///
  /// 标签表必须在加载时验证非空，否则解码出的类别编号在查表时行为未定义。
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.label_list.is_empty() {
      return Err(ConfigError::EmptyLabelList);
    }
    if self.preprocess.is_empty() {
      return Err(ConfigError::EmptyPreprocess);
    }
    if self.min_subgraph_size < 0 {
      return Err(ConfigError::InvalidValue(format!(
        "min_subgraph_size 不能为负数，实际为 {}",
        self.min_subgraph_size
      )));
    }
    if !(0.0..=1.0).contains(&self.draw_threshold) {
      return Err(ConfigError::InvalidValue(format!(
        "draw_threshold 必须位于 [0, 1] 区间，实际为 {}",
        self.draw_threshold
      )));
    }
    for op in &self.preprocess {
      op.validate().map_err(ConfigError::InvalidValue)?;
    }
    Ok(())
  }
}

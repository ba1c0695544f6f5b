// 该文件是 Weicheng （渭城朝雨） 项目的一部分。
// src/engine.rs - 推理引擎封装与后端工厂
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

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ort::execution_providers::ExecutionProviderDispatch;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::frame::ImageBlob;

/// 模型目录中的权重/计算图文件名，内容对本组件不透明
pub const MODEL_FILE: &str = "model.onnx";

/// 目标计算设备
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
  Cpu,
  Gpu,
  CoreMl,
}

/// 推理引擎执行模式。
///
/// Standard 为默认模式；Trt 系列启用 TensorRT 优化执行，仅在 GPU 上可用。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
  Standard,
  TrtFp32,
  TrtFp16,
  TrtInt8,
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cpu => write!(f, "cpu"),
      Device::Gpu => write!(f, "gpu"),
      Device::CoreMl => write!(f, "coreml"),
    }
  }
}

impl FromStr for Device {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "cpu" => Ok(Device::Cpu),
      "gpu" | "cuda" => Ok(Device::Gpu),
      "coreml" => Ok(Device::CoreMl),
      other => Err(format!("未知的计算设备: {}", other)),
    }
  }
}

impl fmt::Display for RunMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RunMode::Standard => write!(f, "standard"),
      RunMode::TrtFp32 => write!(f, "trt_fp32"),
      RunMode::TrtFp16 => write!(f, "trt_fp16"),
      RunMode::TrtInt8 => write!(f, "trt_int8"),
    }
  }
}

impl FromStr for RunMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "standard" | "fluid" => Ok(RunMode::Standard),
      "trt_fp32" => Ok(RunMode::TrtFp32),
      "trt_fp16" => Ok(RunMode::TrtFp16),
      "trt_int8" => Ok(RunMode::TrtInt8),
      other => Err(format!("未知的执行模式: {}", other)),
    }
  }
}

#[derive(Error, Debug)]
pub enum EngineInitError {
  #[error("找不到模型文件: {0}")]
  ModelNotFound(PathBuf),
  #[error("设备 {device} 不支持执行模式 {run_mode}")]
  UnsupportedRunMode { device: Device, run_mode: RunMode },
  #[error("未启用 {0} 特性，无法使用该后端")]
  FeatureDisabled(&'static str),
  #[error("模型无效: {0}")]
  InvalidModel(String),
  #[error("创建推理会话失败: {0}")]
  Session(#[from] ort::Error),
}

#[derive(Error, Debug)]
pub enum EngineRunError {
  #[error("推理引擎执行失败: {0}")]
  Session(#[from] ort::Error),
  #[error("推理引擎没有返回任何输出")]
  NoOutput,
}

/// 不透明的预测器接口。
///
/// 设备与执行模式在构造时一次性绑定进具体后端，检测器在构造之后
/// 不再根据设备类型分支。
pub trait Predictable {
  /// 同步阻塞地执行一次推理，原始输出写入复用的输出缓冲区
  fn run(&mut self, blob: &ImageBlob, output: &mut Vec<f32>) -> Result<(), EngineRunError>;
}

/// ONNX Runtime 后端
struct OrtEngine {
  session: Session,
  input_name: String,
}

impl Predictable for OrtEngine {
  fn run(&mut self, blob: &ImageBlob, output: &mut Vec<f32>) -> Result<(), EngineRunError> {
    let tensor = Tensor::from_array((blob.shape(), blob.data.clone().into_boxed_slice()))
      .map_err(EngineRunError::Session)?
      .into_dyn();

    let outputs = self
      .session
      .run(ort::inputs![self.input_name.as_str() => tensor])?;

    let value = outputs.values().next().ok_or(EngineRunError::NoOutput)?;
    let (_, data) = value
      .try_extract_tensor::<f32>()
      .map_err(EngineRunError::Session)?;

    output.clear();
    output.extend_from_slice(data);
    Ok(())
  }
}

#[cfg(feature = "cuda")]
fn cuda_provider(device_id: u32) -> Result<ExecutionProviderDispatch, EngineInitError> {
  use ort::execution_providers::CUDAExecutionProvider;
  Ok(
    CUDAExecutionProvider::default()
      .with_device_id(device_id as i32)
      .build(),
  )
}

#[cfg(not(feature = "cuda"))]
fn cuda_provider(_device_id: u32) -> Result<ExecutionProviderDispatch, EngineInitError> {
  Err(EngineInitError::FeatureDisabled("cuda"))
}

#[cfg(feature = "tensorrt")]
fn tensorrt_provider(
  device_id: u32,
  run_mode: RunMode,
  trt_calib_mode: bool,
  min_subgraph_size: i32,
) -> Result<ExecutionProviderDispatch, EngineInitError> {
  use ort::execution_providers::TensorRTExecutionProvider;

  if trt_calib_mode && run_mode == RunMode::TrtInt8 {
    info!("启用 TensorRT INT8 校准模式");
  }

  Ok(
    TensorRTExecutionProvider::default()
      .with_device_id(device_id as i32)
      .with_min_subgraph_size(min_subgraph_size as u32)
      .with_fp16(run_mode == RunMode::TrtFp16)
      .with_int8(run_mode == RunMode::TrtInt8)
      .build(),
  )
}

#[cfg(not(feature = "tensorrt"))]
fn tensorrt_provider(
  _device_id: u32,
  _run_mode: RunMode,
  _trt_calib_mode: bool,
  _min_subgraph_size: i32,
) -> Result<ExecutionProviderDispatch, EngineInitError> {
  Err(EngineInitError::FeatureDisabled("tensorrt"))
}

#[cfg(feature = "coreml")]
fn coreml_provider() -> Result<ExecutionProviderDispatch, EngineInitError> {
  use ort::execution_providers::CoreMLExecutionProvider;
  Ok(CoreMLExecutionProvider::default().build())
}

#[cfg(not(feature = "coreml"))]
fn coreml_provider() -> Result<ExecutionProviderDispatch, EngineInitError> {
  Err(EngineInitError::FeatureDisabled("coreml"))
}

/// 按设备与执行模式构造推理引擎。
///
/// 能力检查在加载模型之前完成：Trt 系列模式要求 GPU 设备。
pub fn build_engine(
  model_dir: &Path,
  device: Device,
  run_mode: RunMode,
  device_id: u32,
  trt_calib_mode: bool,
  min_subgraph_size: i32,
) -> Result<Box<dyn Predictable>, EngineInitError> {
  if run_mode != RunMode::Standard && device != Device::Gpu {
    return Err(EngineInitError::UnsupportedRunMode { device, run_mode });
  }
  if trt_calib_mode && run_mode != RunMode::TrtInt8 {
    warn!("校准标志仅在 trt_int8 模式下生效，已忽略");
  }

  let model_path = model_dir.join(MODEL_FILE);
  if !model_path.exists() {
    return Err(EngineInitError::ModelNotFound(model_path));
  }

  info!(
    "初始化推理引擎: device={}, run_mode={}, device_id={}",
    device, run_mode, device_id
  );

  let mut builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
  builder = match (device, run_mode) {
    (Device::Cpu, RunMode::Standard) => builder,
    (Device::CoreMl, RunMode::Standard) => {
      builder.with_execution_providers([coreml_provider()?])?
    }
    (Device::Gpu, RunMode::Standard) => {
      builder.with_execution_providers([cuda_provider(device_id)?])?
    }
    (Device::Gpu, mode) => builder.with_execution_providers([tensorrt_provider(
      device_id,
      mode,
      trt_calib_mode,
      min_subgraph_size,
    )?])?,
    // 能力检查已排除其余组合
    _ => unreachable!(),
  };

  let session = builder.commit_from_file(&model_path)?;
  let input_name = session
    .inputs
    .first()
    .map(|input| input.name.clone())
    .ok_or_else(|| EngineInitError::InvalidModel("模型没有声明任何输入".to_string()))?;
  debug!("模型输入名: {}", input_name);

  Ok(Box::new(OrtEngine {
    session,
    input_name,
  }))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn device_and_run_mode_parse_from_str() {
    assert_eq!("CPU".parse::<Device>().unwrap(), Device::Cpu);
    assert_eq!("cuda".parse::<Device>().unwrap(), Device::Gpu);
    assert_eq!("fluid".parse::<RunMode>().unwrap(), RunMode::Standard);
    assert_eq!("trt_fp16".parse::<RunMode>().unwrap(), RunMode::TrtFp16);
    assert!("npu9000".parse::<Device>().is_err());
  }

  #[test]
  fn trt_mode_requires_gpu() {
    let err = build_engine(
      Path::new("/no/such/dir"),
      Device::Cpu,
      RunMode::TrtFp16,
      0,
      false,
      3,
    )
    .err()
    .unwrap();
    assert!(matches!(err, EngineInitError::UnsupportedRunMode { .. }));
  }

  #[test]
  fn missing_model_file_is_reported() {
    let err = build_engine(
      Path::new("/no/such/dir"),
      Device::Cpu,
      RunMode::Standard,
      0,
      false,
      3,
    )
    .err()
    .unwrap();
    match err {
      EngineInitError::ModelNotFound(path) => {
        assert!(path.ends_with(MODEL_FILE));
      }
      other => panic!("意外的错误: {other:?}"),
    }
  }
}

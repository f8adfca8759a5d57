// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 推理引擎接口与检测器实现
///
/// # 架构说明
///
/// ## InferenceEngine trait
/// 推理后端的能力接口: 输入归一化 RGB 缓冲区, 原地填充两个预分配输出张量
/// - boxes:  [N, 4]  (cx, cy, w, h)
/// - scores: [N, C]
///
/// ## YOLOv4
/// 检测器外观: 推理 → 解码 → NMS, 只依赖 `InferenceEngine`
///
/// ## 后端
/// - `OnnxEngine`: ONNX Runtime (feature = "onnx")
/// - `SyntheticEngine`: 随机生成目标, 用于演示与测试
use anyhow::Result;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::SentinelError;

/// 模型变体 (决定候选框数量 N)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    /// YOLOv4-tiny: 2 个检测头 (stride 32, 16)
    Tiny,
    /// YOLOv4: 3 个检测头 (stride 32, 16, 8)
    Full,
}

impl ModelVariant {
    /// 每个网格单元的 anchor 数
    pub const ANCHORS_PER_CELL: usize = 3;

    pub fn strides(&self) -> &'static [u32] {
        match self {
            ModelVariant::Tiny => &[32, 16],
            ModelVariant::Full => &[32, 16, 8],
        }
    }

    /// 候选框数量 N (416 输入: tiny 2535, full 10647)
    pub fn num_candidates(&self, input_size: u32) -> usize {
        self.strides()
            .iter()
            .map(|&s| {
                let cells = (input_size / s) as usize;
                cells * cells * Self::ANCHORS_PER_CELL
            })
            .sum()
    }

    /// 从模型路径推断变体
    pub fn from_path(path: &str) -> Self {
        if path.contains("tiny") {
            ModelVariant::Tiny
        } else {
            ModelVariant::Full
        }
    }
}

/// 推理加速后端 (ONNX Runtime execution provider)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    #[default]
    Cpu,
    Cuda,
    /// TensorRT, 不可用时依次回退到 CUDA、CPU
    TensorRt,
}

/// 推理会话参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub accelerator: Accelerator,
    pub device_id: i32,
    pub num_threads: usize, // 算子内线程数
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            accelerator: Accelerator::Cpu,
            device_id: 0,
            num_threads: 4,
        }
    }
}

/// 预分配的输出张量, 推理时原地填充
#[derive(Debug, Clone)]
pub struct OutputTensors {
    pub boxes: Array2<f32>,
    pub scores: Array2<f32>,
}

impl OutputTensors {
    pub fn new(num_candidates: usize, num_classes: usize) -> Self {
        Self {
            boxes: Array2::zeros((num_candidates, 4)),
            scores: Array2::zeros((num_candidates, num_classes)),
        }
    }

    pub fn num_candidates(&self) -> usize {
        self.boxes.nrows()
    }

    pub fn num_classes(&self) -> usize {
        self.scores.ncols()
    }
}

/// 推理引擎能力接口
///
/// 一个模型家族一个实现; 检测核心只依赖此接口
pub trait InferenceEngine: Send {
    /// 后端名称
    fn name(&self) -> &'static str;

    /// 模型输入边长 (正方形)
    fn input_size(&self) -> u32;

    /// 模型声明的类别数 (无法从模型得知时为 None)
    fn num_classes(&self) -> Option<usize> {
        None
    }

    /// 前向推理
    ///
    /// `pixels`: input x input x 3, 行优先, RGB 交错, [0,1]。
    /// 结果原地写入 `outputs`; 形状由模型变体保证, 不逐帧校验。
    fn run(&mut self, pixels: &[f32], outputs: &mut OutputTensors) -> Result<()>;

    /// 可选预热
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// 读取标签文件: 每行一个, 顺序即类别索引
pub fn load_labels<P: AsRef<Path>>(path: P) -> Result<Vec<String>, SentinelError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| SentinelError::LabelFile {
        path: path.to_path_buf(),
        source,
    })?;

    let labels: Vec<String> = text.lines().map(|l| l.trim().to_string()).collect();
    if labels.iter().all(|l| l.is_empty()) {
        return Err(SentinelError::EmptyLabels(path.to_path_buf()));
    }
    Ok(labels)
}

#[cfg(feature = "onnx")]
pub mod onnx;
pub mod synthetic;
pub mod yolov4;

// Re-exports
#[cfg(feature = "onnx")]
pub use onnx::OnnxEngine;
pub use synthetic::SyntheticEngine;
pub use yolov4::YoloV4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_candidates() {
        assert_eq!(ModelVariant::Tiny.num_candidates(416), 2535);
        assert_eq!(ModelVariant::Full.num_candidates(416), 10647);
    }

    #[test]
    fn test_variant_from_path() {
        assert_eq!(ModelVariant::from_path("models/yolov4-tiny-416.onnx"), ModelVariant::Tiny);
        assert_eq!(ModelVariant::from_path("models/yolov4-416.onnx"), ModelVariant::Full);
    }

    #[test]
    fn test_load_labels_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coco.labels");
        fs::write(&path, "person\r\nbicycle\ncar\n").unwrap();
        let labels = load_labels(&path).unwrap();
        assert_eq!(labels, vec!["person", "bicycle", "car"]);
    }

    #[test]
    fn test_load_labels_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.labels");
        assert!(matches!(
            load_labels(&missing),
            Err(SentinelError::LabelFile { .. })
        ));

        let empty = dir.path().join("empty.labels");
        fs::write(&empty, "\n\n").unwrap();
        assert!(matches!(
            load_labels(&empty),
            Err(SentinelError::EmptyLabels(_))
        ));
    }
}

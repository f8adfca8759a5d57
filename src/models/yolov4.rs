// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv4 检测器
// 包含: 推理、解码、NMS

use anyhow::Result;
use log::info;

use super::{load_labels, InferenceEngine, ModelVariant, OutputTensors};
use crate::config::DetectorConfig;
use crate::detection::{decode, non_max_suppression, Detection};
use crate::error::SentinelError;

/// YOLOv4 检测器
pub struct YoloV4 {
    engine: Box<dyn InferenceEngine>,
    labels: Vec<String>,
    variant: ModelVariant,
    input_size: u32,
    conf: f32,
    iou: f32,
    outputs: OutputTensors,
}

impl YoloV4 {
    /// 用现成的推理引擎和标签创建检测器
    ///
    /// 输出张量在这里一次性分配, 之后每帧复用
    pub fn new(
        engine: Box<dyn InferenceEngine>,
        labels: Vec<String>,
        config: &DetectorConfig,
    ) -> Result<Self, SentinelError> {
        if labels.is_empty() {
            return Err(SentinelError::EmptyLabels(config.labels_path.clone().into()));
        }
        if let Some(nc) = engine.num_classes() {
            if nc != labels.len() {
                return Err(SentinelError::ClassCountMismatch {
                    model: nc,
                    labels: labels.len(),
                });
            }
        }
        if engine.input_size() != config.input_size {
            return Err(SentinelError::ModelLoad(format!(
                "{} expects {}x{} input, config says {}",
                engine.name(),
                engine.input_size(),
                engine.input_size(),
                config.input_size
            )));
        }

        let variant = config.model_variant;
        let outputs = OutputTensors::new(variant.num_candidates(config.input_size), labels.len());

        Ok(Self {
            engine,
            labels,
            variant,
            input_size: config.input_size,
            conf: config.conf_threshold,
            iou: config.iou_threshold,
            outputs,
        })
    }

    /// 读取标签文件后创建检测器
    pub fn load_with(
        engine: Box<dyn InferenceEngine>,
        config: &DetectorConfig,
    ) -> Result<Self, SentinelError> {
        let labels = load_labels(&config.labels_path)?;
        Self::new(engine, labels, config)
    }

    /// 推理: 填充输出张量
    pub fn run(&mut self, pixels: &[f32]) -> Result<()> {
        self.engine.run(pixels, &mut self.outputs)
    }

    /// 后处理: 输出张量 → 解码 → NMS (模型输入坐标)
    pub fn postprocess(&self) -> Vec<Detection> {
        let mut detections = decode(
            self.outputs.boxes.view(),
            self.outputs.scores.view(),
            &self.labels,
            self.conf,
            self.input_size,
        );
        non_max_suppression(&mut detections, self.iou);
        detections
    }

    /// 完整流程: run → postprocess
    pub fn recognize(&mut self, pixels: &[f32]) -> Result<Vec<Detection>> {
        self.run(pixels)?;
        Ok(self.postprocess())
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.engine.warm_up()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    /// 打印模型信息
    pub fn summary(&self) {
        info!("[YOLOv4 模型信息]");
        info!("  推理后端: {}", self.engine.name());
        info!("  模型变体: {:?}", self.variant);
        info!("  输入尺寸: {}x{}", self.input_size, self.input_size);
        info!("  候选框数: {}", self.outputs.num_candidates());
        info!("  类别数量: {}", self.labels.len());
        info!("  置信度阈值: {}", self.conf);
        info!("  IOU阈值: {}", self.iou);
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// ONNX Runtime 推理后端
// 输入: [1, S, S, 3] NHWC f32, 输出: boxes [1, N, 4] + scores [1, N, C]

use anyhow::{bail, Context, Result};
use log::info;
use ndarray::{ArrayView, Axis, Ix2};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, ValueType};

use super::{Accelerator, EngineOptions, InferenceEngine, OutputTensors};
use crate::error::SentinelError;

pub struct OnnxEngine {
    session: Session,
    input_size: u32,
    num_classes: Option<usize>,
    boxes_name: String,
    scores_name: String,
}

impl OnnxEngine {
    /// 加载 ONNX 模型
    ///
    /// 加速后端注册失败时 ONNX Runtime 会回退到 CPU
    pub fn load(
        model_path: &str,
        input_size: u32,
        options: EngineOptions,
    ) -> Result<Self, SentinelError> {
        info!(
            "⚙️  推理后端: {:?} (设备 {}), 线程 {}",
            options.accelerator, options.device_id, options.num_threads
        );
        let session = Session::builder()
            .and_then(|b| b.with_execution_providers(execution_providers(&options)))
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(options.num_threads))
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| SentinelError::ModelLoad(format!("{}: {}", model_path, e)))?;

        if session.outputs.len() < 2 {
            return Err(SentinelError::ModelLoad(format!(
                "{}: expected boxes and scores outputs, found {}",
                model_path,
                session.outputs.len()
            )));
        }

        // 输出顺序: boxes, scores
        let boxes_name = session.outputs[0].name.clone();
        let scores_name = session.outputs[1].name.clone();

        // 类别数取 scores 最后一维 (动态维度为 -1)
        let num_classes = match &session.outputs[1].output_type {
            ValueType::Tensor { dimensions, .. } => dimensions
                .last()
                .copied()
                .filter(|&d| d > 0)
                .map(|d| d as usize),
            _ => None,
        };

        info!(
            "✅ ONNX 模型加载成功: {} (输出: {}, {})",
            model_path, boxes_name, scores_name
        );

        Ok(Self {
            session,
            input_size,
            num_classes,
            boxes_name,
            scores_name,
        })
    }
}

/// 按优先级排列的 execution provider
fn execution_providers(options: &EngineOptions) -> Vec<ExecutionProviderDispatch> {
    let cuda = || {
        CUDAExecutionProvider::default()
            .with_device_id(options.device_id)
            .build()
    };
    match options.accelerator {
        Accelerator::Cpu => vec![CPUExecutionProvider::default().build()],
        Accelerator::Cuda => vec![cuda()],
        Accelerator::TensorRt => vec![
            TensorRTExecutionProvider::default()
                .with_device_id(options.device_id)
                .build(),
            cuda(),
        ],
    }
}

impl InferenceEngine for OnnxEngine {
    fn name(&self) -> &'static str {
        "onnxruntime"
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn num_classes(&self) -> Option<usize> {
        self.num_classes
    }

    fn run(&mut self, pixels: &[f32], outputs: &mut OutputTensors) -> Result<()> {
        let s = self.input_size as usize;
        let input = ArrayView::from_shape((1, s, s, 3), pixels)
            .context("pixel buffer does not match model input")?
            .to_owned();
        let tensor = Tensor::from_array(input)?;

        let ys = self.session.run(ort::inputs![tensor]?)?;

        let boxes = ys[self.boxes_name.as_str()].try_extract_tensor::<f32>()?;
        let scores = ys[self.scores_name.as_str()].try_extract_tensor::<f32>()?;

        let boxes = boxes.index_axis(Axis(0), 0).into_dimensionality::<Ix2>()?;
        let scores = scores.index_axis(Axis(0), 0).into_dimensionality::<Ix2>()?;
        if boxes.dim() != outputs.boxes.dim() || scores.dim() != outputs.scores.dim() {
            bail!(
                "model output {:?}/{:?} does not match buffers {:?}/{:?}",
                boxes.dim(),
                scores.dim(),
                outputs.boxes.dim(),
                outputs.scores.dim()
            );
        }

        outputs.boxes.assign(&boxes);
        outputs.scores.assign(&scores);
        Ok(())
    }

    fn warm_up(&mut self) -> Result<()> {
        let s = self.input_size as usize;
        let tensor = Tensor::from_array(ndarray::Array4::<f32>::zeros((1, s, s, 3)))?;
        self.session.run(ort::inputs![tensor]?)?;
        info!("🔥 模型预热完成");
        Ok(())
    }
}

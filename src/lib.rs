#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod alert; // 人数告警与资源估算
pub mod config; // 检测配置参数
pub mod detection; // 解码 + NMS
pub mod error;
pub mod models; // 推理引擎接口与YOLOv4实现
pub mod pipeline; // 帧准入与检测线程
pub mod presentation; // 帧源/展示接口
pub mod session; // 会话状态
pub mod utils; // 坐标变换

pub use crate::alert::{
    AlertAck, AlertPhase, AlertStateMachine, ResourceCoefficients, ResourceEstimate,
};
pub use crate::config::DetectorConfig;
pub use crate::detection::{count_label, decode, non_max_suppression, Detection, Rect};
pub use crate::error::SentinelError;
pub use crate::models::{Accelerator, EngineOptions, InferenceEngine, ModelVariant, OutputTensors, SyntheticEngine, YoloV4};
pub use crate::pipeline::{Admission, CapturedFrame, FramePipeline};
pub use crate::presentation::{FrameSource, LogPresenter, PassReport, Presenter, RedrawSignal};
pub use crate::session::{PipelineState, Session, SessionState};
pub use crate::utils::{AffineMatrix, CoordinateMapper, InterpolationMethod};

#[cfg(feature = "onnx")]
pub use crate::models::OnnxEngine;

/// 本地时间字符串, 如 `gen_time_string("-")` → `2024-05-01-12-30-00`
pub fn gen_time_string(delimiter: &str) -> String {
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S",
        delimiter, delimiter, delimiter, delimiter, delimiter
    );
    chrono::Local::now().format(&fmt).to_string()
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_time_string_fields() {
        let s = super::gen_time_string("-");
        assert_eq!(s.split('-').count(), 6);
        assert!(s.chars().all(|c| c.is_ascii_digit() || c == '-'));
    }
}

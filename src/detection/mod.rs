// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测后处理 (Detection Post-processing)
///
/// - types:   矩形几何 + 检测结果
/// - decoder: 原始张量 → 候选框
/// - nms:     按类别非极大值抑制
pub mod decoder;
pub mod nms;
pub mod types;

pub use decoder::decode;
pub use nms::{non_max_suppression, DEFAULT_IOU_THRESHOLD};
pub use types::{count_label, Detection, Rect};

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 张量解码 (Tensor Decoder)
//!
//! 输入格式 (YOLOv4 / YOLOv4-tiny):
//! - boxes:  [N, 4]  (cx, cy, w, h), 模型输入像素坐标
//! - scores: [N, C]  每个类别的分数 (0-1)
//!
//! 纯函数, 无副作用; 输出无序

use ndarray::ArrayView2;

use super::types::{Detection, Rect};

/// 解码原始输出为候选检测框 (模型输入坐标系)
///
/// 每一行取最大类别分数 (严格 `>`, 相同分数取第一个类别),
/// 分数大于 `conf_threshold` 时输出, 坐标限制在 `[0, input_size - 1]`。
pub fn decode(
    boxes: ArrayView2<f32>,
    scores: ArrayView2<f32>,
    labels: &[String],
    conf_threshold: f32,
    input_size: u32,
) -> Vec<Detection> {
    let limit = input_size.saturating_sub(1) as f32;
    let mut detections = Vec::new();

    for (i, (bbox, row)) in boxes.outer_iter().zip(scores.outer_iter()).enumerate() {
        // argmax: 初始最大值为 0, 全部非正分数时没有类别
        let mut max_score = 0.0f32;
        let mut class_index = None;
        for (c, &score) in row.iter().enumerate() {
            if score > max_score {
                max_score = score;
                class_index = Some(c);
            }
        }

        let Some(class_index) = class_index else {
            continue;
        };
        if max_score <= conf_threshold {
            continue;
        }

        let rect = Rect::from_cxcywh(bbox[0], bbox[1], bbox[2], bbox[3]).clamp(0.0, limit);
        let label = labels
            .get(class_index)
            .cloned()
            .unwrap_or_else(|| class_index.to_string());

        detections.push(Detection::new(
            i.to_string(),
            label,
            max_score,
            rect,
            class_index,
        ));
    }

    detections
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 按类别的贪心非极大值抑制 (per-class greedy NMS)

use super::types::Detection;

/// 默认 IOU 阈值
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.6;

/// 原地执行按类别 NMS
///
/// 同一类别内: 取剩余置信度最高的框, 丢弃与其 IOU >= `iou_threshold` 的框, 重复。
/// 一次稳定排序 (类别升序, 置信度降序) + 单次扫描实现, 相同输入顺序结果确定。
/// 输出按类别索引升序, 类别内按置信度降序。
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|a, b| {
        a.class_index
            .cmp(&b.class_index)
            .then_with(|| b.confidence.total_cmp(&a.confidence))
    });

    let mut current_index = 0;
    let mut class_start = 0;
    for index in 0..xs.len() {
        // 新类别: 已保留区间从这里重新开始
        if current_index > 0 && xs[current_index - 1].class_index != xs[index].class_index {
            class_start = current_index;
        }

        let mut drop = false;
        for prev_index in class_start..current_index {
            if xs[prev_index].bbox.iou(&xs[index].bbox) >= iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::Rect;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;

    fn det(id: usize, class_index: usize, confidence: f32, bbox: Rect) -> Detection {
        Detection::new(id.to_string(), format!("c{}", class_index), confidence, bbox, class_index)
    }

    #[test]
    fn test_overlapping_same_class_suppressed() {
        let mut xs = vec![
            det(0, 0, 0.70, Rect::new(0.0, 0.0, 100.0, 100.0)),
            det(1, 0, 0.95, Rect::new(2.0, 2.0, 102.0, 102.0)),
            det(2, 0, 0.80, Rect::new(200.0, 200.0, 250.0, 260.0)),
        ];
        non_max_suppression(&mut xs, DEFAULT_IOU_THRESHOLD);
        let ids: Vec<_> = xs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_other_class_not_suppressed() {
        let b = Rect::new(10.0, 10.0, 60.0, 60.0);
        let mut xs = vec![det(0, 0, 0.9, b), det(1, 1, 0.8, b), det(2, 1, 0.6, b)];
        non_max_suppression(&mut xs, 0.5);
        let ids: Vec<_> = xs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1"]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // IOU 正好 0.5: 50x100 交集, 并集 100x100
        let mut xs = vec![
            det(0, 0, 0.9, Rect::new(0.0, 0.0, 100.0, 100.0)),
            det(1, 0, 0.8, Rect::new(50.0, 0.0, 100.0, 100.0)),
        ];
        non_max_suppression(&mut xs, 0.5);
        assert_eq!(xs.len(), 1);
    }

    #[test]
    fn test_empty_input() {
        let mut xs: Vec<Detection> = Vec::new();
        non_max_suppression(&mut xs, 0.6);
        assert!(xs.is_empty());
    }

    #[test]
    fn test_random_sets_hold_invariants() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let n = rng.gen_range(0..40);
            let input: Vec<Detection> = (0..n)
                .map(|i| {
                    let x = rng.gen_range(0.0..300.0);
                    let y = rng.gen_range(0.0..300.0);
                    let w = rng.gen_range(0.0..120.0);
                    let h = rng.gen_range(0.0..120.0);
                    det(
                        i,
                        rng.gen_range(0..3),
                        rng.gen_range(0.0..1.0),
                        Rect::new(x, y, x + w, y + h),
                    )
                })
                .collect();

            let mut output = input.clone();
            non_max_suppression(&mut output, DEFAULT_IOU_THRESHOLD);

            let mut per_class_in: BTreeMap<usize, usize> = BTreeMap::new();
            for d in &input {
                *per_class_in.entry(d.class_index).or_default() += 1;
            }

            for class in 0..3 {
                let kept: Vec<_> = output.iter().filter(|d| d.class_index == class).collect();
                // 非空当且仅当输入非空
                assert_eq!(kept.is_empty(), !per_class_in.contains_key(&class));
                // 子集
                for d in &kept {
                    assert!(input.contains(d));
                }
                // 两两 IOU < 阈值, 置信度降序
                for (i, a) in kept.iter().enumerate() {
                    for b in kept.iter().skip(i + 1) {
                        assert!(a.bbox.iou(&b.bbox) < DEFAULT_IOU_THRESHOLD);
                        assert!(a.confidence >= b.confidence);
                    }
                }
            }
        }
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测数据结构定义
/// Data structures for the detection core
use serde::{Deserialize, Serialize};

// ========== 几何 ==========

/// 轴对齐矩形 (left, top, right, bottom)
///
/// 不强制 `right >= left`; 零面积矩形是合法输入
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// 从中心点 + 宽高创建 (YOLO 输出格式)
    pub fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn center_x(&self) -> f32 {
        (self.left + self.right) / 2.0
    }

    pub fn center_y(&self) -> f32 {
        (self.top + self.bottom) / 2.0
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// 交集面积: 每个轴独立计算一维重叠, 任一轴为负则不相交
    ///
    /// 仅边缘接触的两个框交集为 0
    pub fn intersection_area(&self, another: &Rect) -> f32 {
        let w = overlap(
            self.center_x(),
            self.width(),
            another.center_x(),
            another.width(),
        );
        let h = overlap(
            self.center_y(),
            self.height(),
            another.center_y(),
            another.height(),
        );
        if w < 0.0 || h < 0.0 {
            return 0.0;
        }
        w * h
    }

    pub fn union_area(&self, another: &Rect) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    /// 交并比; 并集为 0 (两个退化框) 时返回 0
    pub fn iou(&self, another: &Rect) -> f32 {
        let union = self.union_area(another);
        if union <= 0.0 {
            return 0.0;
        }
        self.intersection_area(another) / union
    }

    /// 每个坐标限制到 [min, max]
    pub fn clamp(&self, min: f32, max: f32) -> Self {
        Self::new(
            self.left.clamp(min, max),
            self.top.clamp(min, max),
            self.right.clamp(min, max),
            self.bottom.clamp(min, max),
        )
    }
}

/// 一维重叠长度 (中心 + 宽度形式)
fn overlap(c1: f32, w1: f32, c2: f32, w2: f32) -> f32 {
    let left = (c1 - w1 / 2.0).max(c2 - w2 / 2.0);
    let right = (c1 + w1 / 2.0).min(c2 + w2 / 2.0);
    right - left
}

// ========== 检测结果 ==========

/// 单个检测目标
///
/// 由解码器创建; 之后只有 `bbox` 会在映射回原始帧坐标时被改写
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: String,
    pub label: String,
    pub confidence: f32,
    pub bbox: Rect,
    pub class_index: usize,
}

impl Detection {
    pub fn new(id: String, label: String, confidence: f32, bbox: Rect, class_index: usize) -> Self {
        Self {
            id,
            label,
            confidence,
            bbox,
            class_index,
        }
    }

    /// 标签匹配 (忽略大小写)
    pub fn is_label(&self, label: &str) -> bool {
        self.label.eq_ignore_ascii_case(label)
    }
}

/// 统计指定标签的目标数
pub fn count_label(detections: &[Detection], label: &str) -> usize {
    detections.iter().filter(|d| d.is_label(label)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_area() {
        assert_eq!(Rect::new(0.0, 0.0, 10.0, 5.0).area(), 50.0);
        // 反向矩形面积为 0
        assert_eq!(Rect::new(10.0, 0.0, 0.0, 5.0).area(), 0.0);
    }

    #[test]
    fn test_iou_self_is_one() {
        let rects = [
            Rect::new(0.0, 0.0, 10.0, 10.0),
            Rect::new(3.5, 7.25, 19.0, 8.0),
            Rect::new(100.0, 40.0, 415.0, 415.0),
        ];
        for r in rects {
            assert!(close(r.iou(&r), 1.0), "iou({:?}) = {}", r, r.iou(&r));
        }
    }

    #[test]
    fn test_iou_symmetric() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 2.0, 17.0, 9.0);
        assert_eq!(a.iou(&b), b.iou(&a));
        // 交集 5x7=35, 并集 100+84-35=149
        assert!(close(a.iou(&b), 35.0 / 149.0));
    }

    #[test]
    fn test_iou_disjoint_and_touching() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let far = Rect::new(20.0, 20.0, 30.0, 30.0);
        let touch_x = Rect::new(10.0, 0.0, 20.0, 10.0);
        let touch_y = Rect::new(0.0, 10.0, 10.0, 20.0);
        let corner = Rect::new(10.0, 10.0, 20.0, 20.0);
        // 仅 x 轴重叠, y 轴分离
        let apart_y = Rect::new(2.0, 30.0, 8.0, 40.0);

        for b in [far, touch_x, touch_y, corner, apart_y] {
            assert_eq!(a.intersection_area(&b), 0.0);
            assert_eq!(a.iou(&b), 0.0);
        }
    }

    #[test]
    fn test_iou_degenerate_boxes() {
        let p = Rect::new(5.0, 5.0, 5.0, 5.0);
        assert_eq!(p.area(), 0.0);
        assert_eq!(p.iou(&p), 0.0);

        let line = Rect::new(0.0, 5.0, 10.0, 5.0);
        assert_eq!(line.iou(&p), 0.0);
        assert_eq!(line.iou(&Rect::new(0.0, 0.0, 10.0, 10.0)), 0.0);
    }

    #[test]
    fn test_from_cxcywh_and_clamp() {
        let r = Rect::from_cxcywh(10.0, 20.0, 30.0, 8.0);
        assert_eq!(r, Rect::new(-5.0, 16.0, 25.0, 24.0));
        assert_eq!(r.clamp(0.0, 20.0), Rect::new(0.0, 16.0, 20.0, 20.0));
    }

    #[test]
    fn test_count_label_ignores_case() {
        let mk = |label: &str| {
            Detection::new("0".into(), label.into(), 0.9, Rect::default(), 0)
        };
        let dets = vec![mk("person"), mk("Person"), mk("dog"), mk("PERSON")];
        assert_eq!(count_label(&dets, "person"), 3);
        assert_eq!(count_label(&dets, "cat"), 0);
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 合成推理引擎: 不加载模型, 随机生成目标
// 用于无模型环境下的演示和流水线压测

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use super::{InferenceEngine, OutputTensors};

/// 合成推理引擎
pub struct SyntheticEngine {
    input_size: u32,
    num_classes: usize,
    target_class: usize,
    max_objects: usize,
    latency: Duration,
    rng: StdRng,
}

impl SyntheticEngine {
    pub fn new(input_size: u32, num_classes: usize, seed: u64) -> Self {
        Self {
            input_size,
            num_classes,
            target_class: 0,
            max_objects: 6,
            latency: Duration::ZERO,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// 每次推理额外耗时 (模拟慢模型)
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// 每帧最多生成的目标数
    pub fn with_max_objects(mut self, max_objects: usize) -> Self {
        self.max_objects = max_objects;
        self
    }

    /// 生成目标的类别索引
    pub fn with_target_class(mut self, class: usize) -> Self {
        self.target_class = class;
        self
    }
}

impl InferenceEngine for SyntheticEngine {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn num_classes(&self) -> Option<usize> {
        Some(self.num_classes)
    }

    fn run(&mut self, _pixels: &[f32], outputs: &mut OutputTensors) -> Result<()> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        outputs.boxes.fill(0.0);
        outputs.scores.fill(0.0);

        let n = outputs.num_candidates();
        if n == 0 || self.target_class >= outputs.num_classes() {
            return Ok(());
        }

        let size = self.input_size as f32;
        let count = self.rng.gen_range(0..=self.max_objects.min(n));
        for _ in 0..count {
            let row = self.rng.gen_range(0..n);
            let w = self.rng.gen_range(size * 0.05..size * 0.3);
            let h = self.rng.gen_range(size * 0.1..size * 0.6);
            let cx = self.rng.gen_range(w / 2.0..size - w / 2.0);
            let cy = self.rng.gen_range(h / 2.0..size - h / 2.0);

            outputs.boxes[[row, 0]] = cx;
            outputs.boxes[[row, 1]] = cy;
            outputs.boxes[[row, 2]] = w;
            outputs.boxes[[row, 3]] = h;
            outputs.scores[[row, self.target_class]] = self.rng.gen_range(0.3..0.99);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boxes_stay_inside_input() {
        let mut engine = SyntheticEngine::new(416, 80, 42).with_max_objects(10);
        let mut outputs = OutputTensors::new(2535, 80);
        for _ in 0..20 {
            engine.run(&[], &mut outputs).unwrap();
            for row in outputs.boxes.rows() {
                let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
                assert!(cx - w / 2.0 >= 0.0 && cx + w / 2.0 <= 416.0);
                assert!(cy - h / 2.0 >= 0.0 && cy + h / 2.0 <= 416.0);
            }
            for row in outputs.scores.rows() {
                assert!(row.iter().skip(1).all(|&s| s == 0.0));
            }
        }
    }

    #[test]
    fn test_same_seed_same_output() {
        let mut a = SyntheticEngine::new(416, 3, 9);
        let mut b = SyntheticEngine::new(416, 3, 9);
        let mut oa = OutputTensors::new(100, 3);
        let mut ob = OutputTensors::new(100, 3);
        a.run(&[], &mut oa).unwrap();
        b.run(&[], &mut ob).unwrap();
        assert_eq!(oa.boxes, ob.boxes);
        assert_eq!(oa.scores, ob.scores);
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测器 (Detector)
/// 职责: 接收FrameJob → YOLOv4检测 → 映射回帧坐标 → 告警计数 → 发布PassReport
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Instant;

use super::FrameJob;
use crate::alert::AlertScheduler;
use crate::config::DetectorConfig;
use crate::detection::{count_label, Detection};
use crate::models::YoloV4;
use crate::presentation::{PassReport, Presenter};
use crate::session::SessionState;

/// 本轮检测持有忙标志; 提前返回或线程 panic 时也会归还
struct BusyGuard<'a>(&'a SessionState);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

pub struct Detector {
    model: YoloV4,
    state: Arc<SessionState>,
    presenter: Arc<dyn Presenter>,
    alert: AlertScheduler,
    tx_recycle: Sender<Vec<f32>>,

    // 发布过滤
    conf_threshold: f32,
    target_label: String,
    publish_target_only: bool,

    // 统计
    count: u64,
    failed: u64,
    last_frame_id: u64,
    last: Instant,
}

impl Detector {
    pub fn new(
        model: YoloV4,
        config: &DetectorConfig,
        state: Arc<SessionState>,
        presenter: Arc<dyn Presenter>,
        alert: AlertScheduler,
        tx_recycle: Sender<Vec<f32>>,
    ) -> Self {
        Self {
            model,
            state,
            presenter,
            alert,
            tx_recycle,
            conf_threshold: config.conf_threshold,
            target_label: config.target_label.clone(),
            publish_target_only: config.publish_target_only,
            count: 0,
            failed: 0,
            last_frame_id: 0,
            last: Instant::now(),
        }
    }

    /// 检测线程主循环, 任务槽关闭后退出
    pub(crate) fn run(mut self, rx_job: Receiver<FrameJob>) {
        info!("🔍 检测线程启动");

        while let Ok(job) = rx_job.recv() {
            self.process(job);
        }

        self.alert.join();
        info!("✅ 检测线程退出");
    }

    fn process(&mut self, job: FrameJob) {
        let state = self.state.clone();
        let busy = BusyGuard(&state);
        let start = Instant::now();
        let FrameJob {
            frame_id,
            pixels,
            mapper,
            admitted_at,
        } = job;

        let result = self.model.recognize(&pixels);
        let _ = self.tx_recycle.try_send(pixels);

        let mut detections = match result {
            Ok(d) => d,
            Err(e) => {
                // 单帧推理失败不结束会话
                self.failed += 1;
                warn!("⚠️  帧#{} 推理失败: {:#}", frame_id, e);
                return;
            }
        };

        // 模型输入坐标 → 帧坐标
        for d in detections.iter_mut() {
            d.bbox = mapper.to_frame(&d.bbox);
        }

        let target_count = count_label(&detections, &self.target_label);
        self.alert.observe(target_count);

        let processing_ms = start.elapsed().as_secs_f64() * 1000.0;
        drop(busy);

        let published: Vec<Detection> = detections
            .into_iter()
            .filter(|d| d.confidence >= self.conf_threshold)
            .filter(|d| !self.publish_target_only || d.is_label(&self.target_label))
            .collect();

        debug!(
            "帧#{} 检测完成: {} 个目标, 发布 {} 个, 推理 {:.1}ms, 等待 {:.1}ms",
            frame_id,
            target_count,
            published.len(),
            processing_ms,
            (start - admitted_at).as_secs_f64() * 1000.0
        );

        self.presenter.present(PassReport {
            frame_id,
            detections: published,
            target_count,
            processing_ms,
            frame_size: mapper.frame_size(),
            crop_size: mapper.crop_size(),
        });

        self.count += 1;
        self.stats(frame_id, processing_ms);
    }

    /// 每秒打印一次统计
    fn stats(&mut self, frame_id: u64, inference_ms: f64) {
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed < 1.0 {
            return;
        }

        let frames = frame_id.saturating_sub(self.last_frame_id);
        let dropped = frames.saturating_sub(self.count + self.failed);
        info!(
            "📊 检测统计: 收到{}帧 | 检测{}帧 | 丢弃{}帧 | 失败{}帧 | {:.1}fps | 每帧{:.1}ms",
            frames,
            self.count,
            dropped,
            self.failed,
            self.count as f64 / elapsed,
            inference_ms
        );

        self.last = Instant::now();
        self.last_frame_id = frame_id;
        self.count = 0;
        self.failed = 0;
    }
}

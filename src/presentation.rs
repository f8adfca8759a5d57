// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 帧源与展示接口
//!
//! 检测核心只通过这两个 trait 与外部交互:
//! - `FrameSource`: 暂停/恢复取帧
//! - `Presenter`: 接收检测结果、重绘请求、资源估算和致命错误

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::alert::{AlertAck, ResourceEstimate};
use crate::detection::Detection;
use crate::gen_time_string;

/// 帧源控制
pub trait FrameSource: Send + Sync {
    fn pause(&self);
    fn resume(&self);
}

/// 一次检测完成后发布的结果
#[derive(Clone, Debug, Serialize)]
pub struct PassReport {
    pub frame_id: u64,
    pub detections: Vec<Detection>, // 帧坐标
    pub target_count: usize,
    pub processing_ms: f64,
    pub frame_size: (u32, u32),
    pub crop_size: u32,
}

/// 展示层
pub trait Presenter: Send + Sync {
    /// 发布检测结果 (检测线程调用)
    fn present(&self, report: PassReport);

    /// 请求重绘, 可合并
    fn request_redraw(&self);

    /// 一次性展示资源估算; 确认后调用 `ack.acknowledge()`
    fn show_estimate(&self, estimate: ResourceEstimate, ack: AlertAck);

    /// 会话无法启动
    fn report_fatal(&self, err: &anyhow::Error);
}

/// 可合并的重绘信号: 渲染前多次请求等价于一次
#[derive(Debug, Default)]
pub struct RedrawSignal {
    pending: AtomicBool,
}

impl RedrawSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回 true 表示这是新请求 (之前没有待处理的)
    pub fn request(&self) -> bool {
        !self.pending.swap(true, Ordering::AcqRel)
    }

    /// 渲染端取走请求
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

/// 日志展示: 结果打印到日志, 估算通过通道交给主线程确认
pub struct LogPresenter {
    redraw: RedrawSignal,
    reports: AtomicU64,
    estimates: Sender<(ResourceEstimate, AlertAck)>,
}

impl LogPresenter {
    pub fn new() -> (Self, Receiver<(ResourceEstimate, AlertAck)>) {
        let (tx, rx) = unbounded();
        let presenter = Self {
            redraw: RedrawSignal::new(),
            reports: AtomicU64::new(0),
            estimates: tx,
        };
        (presenter, rx)
    }

    pub fn redraw(&self) -> &RedrawSignal {
        &self.redraw
    }

    pub fn reports(&self) -> u64 {
        self.reports.load(Ordering::Acquire)
    }
}

impl Presenter for LogPresenter {
    fn present(&self, report: PassReport) {
        self.reports.fetch_add(1, Ordering::AcqRel);
        info!(
            "🎯 帧#{} {}x{} → {}x{} | {} 个目标 | {:.1}ms",
            report.frame_id,
            report.frame_size.0,
            report.frame_size.1,
            report.crop_size,
            report.crop_size,
            report.target_count,
            report.processing_ms
        );
        for d in &report.detections {
            debug!(
                "   {} {:.2} [{:.0}, {:.0}, {:.0}, {:.0}]",
                d.label, d.confidence, d.bbox.left, d.bbox.top, d.bbox.right, d.bbox.bottom
            );
        }
    }

    fn request_redraw(&self) {
        self.redraw.request();
    }

    fn show_estimate(&self, estimate: ResourceEstimate, ack: AlertAck) {
        info!("📋 Resource Estimation ({})", gen_time_string(":"));
        for line in estimate.to_string().lines() {
            info!("   {}", line);
        }
        if let Err(e) = self.estimates.send((estimate, ack)) {
            // 没有人等待确认, 直接确认以免帧源一直暂停
            let (_, ack) = e.into_inner();
            ack.acknowledge();
        }
    }

    fn report_fatal(&self, err: &anyhow::Error) {
        error!("❌ 会话启动失败: {:#}", err);
    }
}

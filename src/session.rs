// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测会话
//!
//! 所有跨帧状态 (忙标志、帧计数、最大人数、告警锁存) 都归会话所有,
//! 会话开始时创建, 结束时销毁, 不使用进程级静态变量。

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::alert::{AlertScheduler, AlertStateMachine};
use crate::config::DetectorConfig;
use crate::models::{InferenceEngine, YoloV4};
use crate::pipeline::{Admission, CapturedFrame, FramePipeline};
use crate::presentation::{FrameSource, Presenter};

/// 会话状态快照
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineState {
    pub busy: bool,
    pub frame_counter: u64,
    pub max_observed_count: usize,
    pub alert_fired: bool,
}

/// 会话共享状态 (取帧线程 / 检测线程 / 告警线程)
#[derive(Debug)]
pub struct SessionState {
    busy: AtomicBool,
    frame_counter: AtomicU64,
    ended: AtomicBool,
    alert: Arc<AlertStateMachine>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
}

impl SessionState {
    pub fn new(alert: AlertStateMachine) -> Self {
        let (tx, rx) = bounded(0);
        Self {
            busy: AtomicBool::new(false),
            frame_counter: AtomicU64::new(0),
            ended: AtomicBool::new(false),
            alert: Arc::new(alert),
            shutdown_tx: Mutex::new(Some(tx)),
            shutdown_rx: rx,
        }
    }

    /// Idle → Busy, 失败说明已有一帧在检测
    pub fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Busy → Idle
    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// 帧计数 +1, 返回本帧序号 (从 1 开始)
    pub fn next_frame(&self) -> u64 {
        self.frame_counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter.load(Ordering::Acquire)
    }

    pub fn alert(&self) -> &Arc<AlertStateMachine> {
        &self.alert
    }

    /// 会话结束信号 (通道关闭即结束)
    pub fn shutdown_signal(&self) -> Receiver<()> {
        self.shutdown_rx.clone()
    }

    /// 结束会话; 只有第一次调用返回 true
    pub fn end(&self) -> bool {
        if self.ended.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.alert.cancel();
        if let Ok(mut tx) = self.shutdown_tx.lock() {
            tx.take();
        }
        true
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> PipelineState {
        PipelineState {
            busy: self.is_busy(),
            frame_counter: self.frame_counter(),
            max_observed_count: self.alert.max_observed(),
            alert_fired: self.alert.alert_fired(),
        }
    }
}

/// 检测会话: 模型 + 流水线 + 告警
pub struct Session {
    state: Arc<SessionState>,
    pipeline: FramePipeline,
}

impl Session {
    /// 开始会话
    ///
    /// `loader` 创建推理引擎; 引擎或标签加载失败是致命错误,
    /// 通过 `presenter.report_fatal` 上报后返回 Err, 不重试。
    pub fn start<F>(
        config: DetectorConfig,
        loader: F,
        source: Arc<dyn FrameSource>,
        presenter: Arc<dyn Presenter>,
    ) -> Result<Self>
    where
        F: FnOnce(&DetectorConfig) -> Result<Box<dyn InferenceEngine>>,
    {
        match Self::build(config, loader, source, presenter.clone()) {
            Ok(session) => Ok(session),
            Err(e) => {
                presenter.report_fatal(&e);
                Err(e)
            }
        }
    }

    fn build<F>(
        config: DetectorConfig,
        loader: F,
        source: Arc<dyn FrameSource>,
        presenter: Arc<dyn Presenter>,
    ) -> Result<Self>
    where
        F: FnOnce(&DetectorConfig) -> Result<Box<dyn InferenceEngine>>,
    {
        config.validate()?;

        let engine = loader(&config).context("failed to initialize inference engine")?;
        let mut model = YoloV4::load_with(engine, &config)?;
        model.summary();
        model.warm_up()?;

        let state = Arc::new(SessionState::new(AlertStateMachine::new(
            config.alert_delay(),
            config.resources.clone(),
        )));

        let ack_state = state.clone();
        let alert = AlertScheduler::new(
            state.alert().clone(),
            source,
            presenter.clone(),
            state.shutdown_signal(),
            Box::new(move || {
                ack_state.end();
            }),
        );

        let pipeline = FramePipeline::spawn(model, &config, state.clone(), presenter, alert)?;
        info!("🚀 检测会话已启动");

        Ok(Self { state, pipeline })
    }

    /// 提交一帧 (取帧线程调用, 不阻塞)
    pub fn submit(&mut self, frame: &CapturedFrame) -> Admission {
        self.pipeline.submit(frame)
    }

    /// 预览尺寸或方向变化时重建坐标变换
    pub fn configure(&mut self, width: u32, height: u32, rotation: i32) -> Result<()> {
        self.pipeline.configure(width, height, rotation)?;
        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        self.state.snapshot()
    }

    pub fn is_ended(&self) -> bool {
        self.state.is_ended()
    }

    /// 结束会话并等待检测线程退出
    pub fn end(&mut self) {
        if self.state.end() {
            info!("🛑 检测会话结束");
        }
        if let Err(e) = self.pipeline.shutdown() {
            warn!("⚠️  检测线程退出异常: {}", e);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::ResourceCoefficients;
    use std::time::Duration;

    fn state() -> SessionState {
        SessionState::new(AlertStateMachine::new(
            Duration::from_millis(10),
            ResourceCoefficients::default(),
        ))
    }

    #[test]
    fn test_busy_flag_admits_one() {
        let s = state();
        assert!(s.try_acquire());
        assert!(!s.try_acquire());
        assert!(s.snapshot().busy);
        s.release();
        assert!(s.try_acquire());
    }

    #[test]
    fn test_frame_counter_is_monotonic() {
        let s = state();
        assert_eq!(s.next_frame(), 1);
        assert_eq!(s.next_frame(), 2);
        assert_eq!(s.snapshot().frame_counter, 2);
    }

    #[test]
    fn test_end_closes_shutdown_signal() {
        let s = state();
        let rx = s.shutdown_signal();
        assert!(s.end());
        assert!(!s.end());
        assert!(s.is_ended());
        assert!(rx.recv().is_err());
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 人数告警状态机
//!
//! Monitoring → Scheduled → Fired, 会话提前结束则进入 Cancelled。
//! 首次检测到目标时启动延时定时器; 定时器线程只通过阶段锁存与流水线通信,
//! 之后的帧既不会取消也不会重新计时。

use crossbeam_channel::{after, select, Receiver};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::presentation::{FrameSource, Presenter};

/// 每人资源系数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceCoefficients {
    pub water_liters_per_person: u32,
    pub food_kg_per_person: u32,
    pub shelter_kits_per_person: u32,
    pub persons_per_medical_kit: u32, // 每 N 人一个医疗包 (向上取整)
}

impl Default for ResourceCoefficients {
    fn default() -> Self {
        Self {
            water_liters_per_person: 2,
            food_kg_per_person: 2,
            shelter_kits_per_person: 1,
            persons_per_medical_kit: 10,
        }
    }
}

/// 资源估算结果
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ResourceEstimate {
    pub total_water: u32,
    pub total_food: u32,
    pub shelter_kits: u32,
    pub medical_kits: u32,
    pub person_count: u32,
}

impl ResourceEstimate {
    pub fn from_count(person_count: u32, c: &ResourceCoefficients) -> Self {
        let per_kit = c.persons_per_medical_kit.max(1);
        Self {
            total_water: c.water_liters_per_person.saturating_mul(person_count),
            total_food: c.food_kg_per_person.saturating_mul(person_count),
            shelter_kits: c.shelter_kits_per_person.saturating_mul(person_count),
            medical_kits: person_count.div_ceil(per_kit),
            person_count,
        }
    }
}

impl fmt::Display for ResourceEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Estimated Resources:")?;
        writeln!(f, " for {} persons", self.person_count)?;
        writeln!(f, "Water: {} liters", self.total_water)?;
        writeln!(f, "Food: {} kg", self.total_food)?;
        writeln!(f, "Shelter Kits: {}", self.shelter_kits)?;
        write!(f, "Medical Kits: {}", self.medical_kits)
    }
}

/// 告警阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertPhase {
    Monitoring = 0,
    Scheduled = 1,
    Fired = 2,
    Cancelled = 3,
}

impl AlertPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => AlertPhase::Monitoring,
            1 => AlertPhase::Scheduled,
            2 => AlertPhase::Fired,
            _ => AlertPhase::Cancelled,
        }
    }
}

/// 告警状态 (会话内共享)
#[derive(Debug)]
pub struct AlertStateMachine {
    phase: AtomicU8,
    max_observed: AtomicUsize,
    latched: AtomicBool, // alert_fired: 调度即置位, 会话内不复位
    delay: Duration,
    coefficients: ResourceCoefficients,
}

impl AlertStateMachine {
    pub fn new(delay: Duration, coefficients: ResourceCoefficients) -> Self {
        Self {
            phase: AtomicU8::new(AlertPhase::Monitoring as u8),
            max_observed: AtomicUsize::new(0),
            latched: AtomicBool::new(false),
            delay,
            coefficients,
        }
    }

    /// 记录一次检测结果的目标数量
    ///
    /// 返回 true 表示本次调用触发了调度 (调用方负责启动定时器)
    pub fn observe(&self, count: usize) -> bool {
        self.max_observed.fetch_max(count, Ordering::AcqRel);
        if count == 0 {
            return false;
        }
        let scheduled = self
            .phase
            .compare_exchange(
                AlertPhase::Monitoring as u8,
                AlertPhase::Scheduled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if scheduled {
            self.latched.store(true, Ordering::Release);
        }
        scheduled
    }

    /// 定时器到期: 仅当仍处于 Scheduled 时进入 Fired 并返回估算
    pub fn try_fire(&self) -> Option<ResourceEstimate> {
        self.phase
            .compare_exchange(
                AlertPhase::Scheduled as u8,
                AlertPhase::Fired as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()?;
        let count = self.max_observed() as u32;
        Some(ResourceEstimate::from_count(count, &self.coefficients))
    }

    /// 会话结束: Monitoring/Scheduled → Cancelled
    pub fn cancel(&self) -> bool {
        let mut current = self.phase.load(Ordering::Acquire);
        loop {
            match AlertPhase::from_u8(current) {
                AlertPhase::Fired | AlertPhase::Cancelled => return false,
                _ => {}
            }
            match self.phase.compare_exchange_weak(
                current,
                AlertPhase::Cancelled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn phase(&self) -> AlertPhase {
        AlertPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn max_observed(&self) -> usize {
        self.max_observed.load(Ordering::Acquire)
    }

    pub fn alert_fired(&self) -> bool {
        self.latched.load(Ordering::Acquire)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// 告警确认: 恢复帧源并结束会话
pub struct AlertAck {
    source: Arc<dyn FrameSource>,
    on_ack: Box<dyn FnOnce() + Send>,
}

impl AlertAck {
    pub fn new(source: Arc<dyn FrameSource>, on_ack: Box<dyn FnOnce() + Send>) -> Self {
        Self { source, on_ack }
    }

    pub fn acknowledge(self) {
        info!("👌 告警已确认, 恢复帧源并结束会话");
        self.source.resume();
        (self.on_ack)();
    }
}

impl fmt::Debug for AlertAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertAck").finish_non_exhaustive()
    }
}

/// 告警调度器 (由检测线程持有)
pub struct AlertScheduler {
    machine: Arc<AlertStateMachine>,
    source: Arc<dyn FrameSource>,
    presenter: Arc<dyn Presenter>,
    shutdown: Receiver<()>,
    on_ack: Option<Box<dyn FnOnce() + Send>>,
    timer: Option<JoinHandle<()>>,
}

impl AlertScheduler {
    pub fn new(
        machine: Arc<AlertStateMachine>,
        source: Arc<dyn FrameSource>,
        presenter: Arc<dyn Presenter>,
        shutdown: Receiver<()>,
        on_ack: Box<dyn FnOnce() + Send>,
    ) -> Self {
        Self {
            machine,
            source,
            presenter,
            shutdown,
            on_ack: Some(on_ack),
            timer: None,
        }
    }

    /// 每次完成检测后调用
    pub fn observe(&mut self, count: usize) {
        if !self.machine.observe(count) {
            return;
        }
        let Some(on_ack) = self.on_ack.take() else {
            return;
        };

        let delay = self.machine.delay();
        info!("⏰ 检测到 {} 个目标, {}ms 后告警", count, delay.as_millis());

        let machine = self.machine.clone();
        let source = self.source.clone();
        let presenter = self.presenter.clone();
        let shutdown = self.shutdown.clone();

        let spawned = thread::Builder::new()
            .name("alert-timer".to_string())
            .spawn(move || {
                let expired = select! {
                    recv(after(delay)) -> _ => true,
                    recv(shutdown) -> _ => false,
                };
                if !expired {
                    debug!("告警定时器随会话结束退出");
                    return;
                }

                let Some(estimate) = machine.try_fire() else {
                    debug!("告警定时器到期但会话已结束, 忽略");
                    return;
                };

                source.pause();
                info!("🚨 告警触发: 最大人数 {}", estimate.person_count);
                presenter.show_estimate(estimate, AlertAck::new(source, on_ack));
            });

        match spawned {
            Ok(handle) => self.timer = Some(handle),
            Err(e) => self.timer_unavailable(&e),
        }
    }

    /// 定时器线程起不来: 放弃本次告警, 不让阶段停在 Scheduled
    fn timer_unavailable(&self, err: &std::io::Error) {
        warn!("⚠️  告警定时器启动失败, 本次告警取消: {}", err);
        self.machine.cancel();
    }

    /// 等待定时器线程退出
    pub fn join(&mut self) {
        if let Some(handle) = self.timer.take() {
            let _ = handle.join();
        }
    }
}

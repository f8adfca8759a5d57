// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 帧处理流水线 (Frame Pipeline)
///
/// 双线程架构:
/// - 取帧线程: 调用 `submit`, 做准入判断和预处理, 从不阻塞
/// - 检测线程: 推理 → 解码 → NMS → 映射回帧坐标 → 发布
///
/// 两者只共享原子忙标志和容量为 1 的任务槽; 忙时到达的帧直接丢弃, 不排队。
pub mod detector;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use image::DynamicImage;
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::alert::AlertScheduler;
use crate::config::DetectorConfig;
use crate::error::SentinelError;
use crate::models::YoloV4;
use crate::presentation::Presenter;
use crate::session::SessionState;
use crate::utils::{CoordinateMapper, InterpolationMethod};

pub use detector::Detector;

/// 采集到的一帧 (RGBA)
#[derive(Clone, Debug)]
pub struct CapturedFrame {
    rgba: Vec<u8>,
    width: u32,
    height: u32,
}

impl CapturedFrame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Result<Self, SentinelError> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || rgba.len() != expected {
            return Err(SentinelError::FrameSize {
                width,
                height,
                expected,
                got: rgba.len(),
            });
        }
        Ok(Self {
            rgba,
            width,
            height,
        })
    }

    pub fn from_image(img: &DynamicImage) -> Result<Self, SentinelError> {
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self::new(rgba.into_raw(), width, height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.rgba
    }
}

/// 准入结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// 已交给检测线程
    Admitted(u64),
    /// 检测中, 本帧丢弃
    Dropped(u64),
    /// 会话已结束
    Closed,
}

/// 交给检测线程的任务: 模型输入 + 本帧有效的坐标映射
pub(crate) struct FrameJob {
    pub frame_id: u64,
    pub pixels: Vec<f32>,
    pub mapper: CoordinateMapper,
    pub admitted_at: Instant,
}

pub struct FramePipeline {
    state: Arc<SessionState>,
    presenter: Arc<dyn Presenter>,
    mapper: CoordinateMapper,
    maintain_aspect: bool,
    interpolation: InterpolationMethod,
    tx_job: Option<Sender<FrameJob>>,
    rx_recycle: Receiver<Vec<f32>>,
    worker: Option<JoinHandle<()>>,
}

impl FramePipeline {
    /// 启动检测线程
    pub fn spawn(
        model: YoloV4,
        config: &DetectorConfig,
        state: Arc<SessionState>,
        presenter: Arc<dyn Presenter>,
        alert: AlertScheduler,
    ) -> Result<Self> {
        let mapper = CoordinateMapper::new(
            config.preview_width,
            config.preview_height,
            model.input_size(),
            config.sensor_rotation,
            config.maintain_aspect_ratio,
        )?;

        let (tx_job, rx_job) = bounded::<FrameJob>(1);
        let (tx_recycle, rx_recycle) = bounded::<Vec<f32>>(1);

        let detector = Detector::new(
            model,
            config,
            state.clone(),
            presenter.clone(),
            alert,
            tx_recycle,
        );
        let worker = thread::Builder::new()
            .name("detector".to_string())
            .spawn(move || detector.run(rx_job))?;

        info!(
            "✅ 流水线已启动: 预览 {}x{} → 输入 {}x{}",
            config.preview_width,
            config.preview_height,
            mapper.crop_size(),
            mapper.crop_size()
        );

        Ok(Self {
            state,
            presenter,
            mapper,
            maintain_aspect: config.maintain_aspect_ratio,
            interpolation: config.interpolation,
            tx_job: Some(tx_job),
            rx_recycle,
            worker: Some(worker),
        })
    }

    /// 重建坐标映射 (预览尺寸或方向变化时)
    pub fn configure(&mut self, width: u32, height: u32, rotation: i32) -> Result<(), SentinelError> {
        self.mapper = CoordinateMapper::new(
            width,
            height,
            self.mapper.crop_size(),
            rotation,
            self.maintain_aspect,
        )?;
        info!("🔄 坐标映射已更新: {}x{} 旋转 {}°", width, height, rotation);
        Ok(())
    }

    pub fn mapper(&self) -> &CoordinateMapper {
        &self.mapper
    }

    /// 提交一帧
    ///
    /// 空闲: 预处理后交给检测线程; 忙: 立即丢弃。都不会阻塞调用方。
    pub fn submit(&mut self, frame: &CapturedFrame) -> Admission {
        if self.state.is_ended() || self.tx_job.is_none() {
            return Admission::Closed;
        }

        let frame_id = self.state.next_frame();
        self.presenter.request_redraw();

        if (frame.width(), frame.height()) != self.mapper.frame_size() {
            let rotation = self.mapper.rotation();
            if let Err(e) = self.configure(frame.width(), frame.height(), rotation) {
                warn!("⚠️  帧#{} 尺寸无法映射: {}", frame_id, e);
                return Admission::Dropped(frame_id);
            }
        }

        if self.worker_stopped() {
            return Admission::Closed;
        }

        if !self.state.try_acquire() {
            debug!("帧#{} 丢弃 (检测中)", frame_id);
            return Admission::Dropped(frame_id);
        }

        let size = self.mapper.crop_size() as usize;
        let mut pixels = self
            .rx_recycle
            .try_recv()
            .unwrap_or_else(|_| vec![0.0; size * size * 3]);
        pixels.resize(size * size * 3, 0.0);
        self.mapper
            .warp_into_model_input(frame.as_bytes(), &mut pixels, self.interpolation);

        let job = FrameJob {
            frame_id,
            pixels,
            mapper: self.mapper,
            admitted_at: Instant::now(),
        };

        let sent = match self.tx_job.as_ref() {
            Some(tx) => tx.try_send(job),
            None => Err(TrySendError::Disconnected(job)),
        };
        match sent {
            Ok(()) => Admission::Admitted(frame_id),
            Err(TrySendError::Full(_)) => {
                self.state.release();
                Admission::Dropped(frame_id)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.state.release();
                self.close_after_worker_exit();
                Admission::Closed
            }
        }
    }

    /// 检测线程意外退出 (如推理 panic) 时结束会话
    fn worker_stopped(&mut self) -> bool {
        let finished = self.worker.as_ref().map_or(true, |w| w.is_finished());
        if finished {
            self.close_after_worker_exit();
        }
        finished
    }

    fn close_after_worker_exit(&mut self) {
        if self.tx_job.take().is_none() {
            return;
        }
        warn!("❌ 检测线程已退出, 会话结束");
        self.state.end();
        self.presenter
            .report_fatal(&anyhow!("detector thread stopped unexpectedly"));
    }

    /// 关闭任务槽并等待检测线程退出 (可重复调用)
    pub fn shutdown(&mut self) -> Result<()> {
        self.tx_job.take();
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow!("detector thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captured_frame_checks_size() {
        assert!(CapturedFrame::new(vec![0; 4 * 4 * 4], 4, 4).is_ok());
        assert!(matches!(
            CapturedFrame::new(vec![0; 10], 4, 4),
            Err(SentinelError::FrameSize {
                expected: 64,
                got: 10,
                ..
            })
        ));
        assert!(CapturedFrame::new(Vec::new(), 0, 0).is_err());
    }

    #[test]
    fn test_captured_frame_from_image() {
        let img = DynamicImage::new_rgb8(8, 6);
        let frame = CapturedFrame::from_image(&img).unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 6));
        assert_eq!(frame.as_bytes().len(), 8 * 6 * 4);
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 人员检测哨兵 (Sentinel)
///
/// 把一个图片目录当作摄像头回放:
/// 1. 主线程:   按目标帧率取帧并提交 (从不阻塞)
/// 2. 检测线程: YOLOv4 检测 + NMS + 坐标映射
/// 3. 告警线程: 首次发现人员后延时弹出物资预估, 回车确认后结束
use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use yolov4_sentinel::models::load_labels;
use yolov4_sentinel::{
    Accelerator, Admission, CapturedFrame, DetectorConfig, FrameSource, InferenceEngine,
    LogPresenter, Session, SyntheticEngine,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// 哨兵参数 (未指定的使用配置文件)
#[derive(Parser, Debug)]
#[command(author, version, about = "人员检测哨兵 - 图片目录回放", long_about = None)]
struct Args {
    /// 帧目录 (png/jpg, 按文件名排序)
    #[arg(short, long)]
    frames: PathBuf,

    /// 配置文件
    #[arg(short, long, default_value = "sentinel.json")]
    config: PathBuf,

    /// 回放帧率
    #[arg(long, default_value_t = 15.0)]
    fps: f64,

    /// 循环回放
    #[arg(long = "loop")]
    repeat: bool,

    /// 模型文件
    #[arg(short, long)]
    model: Option<String>,

    /// 标签文件
    #[arg(short, long)]
    labels: Option<String>,

    /// 置信度阈值
    #[arg(long)]
    conf: Option<f32>,

    /// NMS IOU阈值
    #[arg(long)]
    iou: Option<f32>,

    /// 传感器旋转角度 (90的倍数)
    #[arg(long)]
    rotation: Option<i32>,

    /// 告警延迟 (毫秒)
    #[arg(long)]
    delay_ms: Option<u64>,

    /// 使用 TensorRT (不可用时回退 CUDA/CPU)
    #[arg(long)]
    trt: bool,

    /// 使用 CUDA
    #[arg(long)]
    cuda: bool,

    /// GPU 设备号
    #[arg(long)]
    device_id: Option<i32>,

    /// 推理线程数
    #[arg(long)]
    threads: Option<usize>,

    /// 使用合成推理引擎 (不加载模型)
    #[arg(long)]
    synthetic: bool,

    /// 合成引擎随机种子
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// 合成引擎每帧耗时 (毫秒)
    #[arg(long, default_value_t = 80)]
    latency_ms: u64,

    /// 告警自动确认 (不等待回车)
    #[arg(long)]
    auto_ack: bool,
}

impl Args {
    /// 命令行参数覆盖配置文件
    fn apply(&self, config: &mut DetectorConfig) {
        if let Some(model) = &self.model {
            config.model_path = model.clone();
            config.model_variant = yolov4_sentinel::ModelVariant::from_path(model);
        }
        if let Some(labels) = &self.labels {
            config.labels_path = labels.clone();
        }
        if let Some(conf) = self.conf {
            config.conf_threshold = conf;
        }
        if let Some(iou) = self.iou {
            config.iou_threshold = iou;
        }
        if let Some(rotation) = self.rotation {
            config.sensor_rotation = rotation;
        }
        if let Some(delay) = self.delay_ms {
            config.alert_delay_ms = delay;
        }
        if self.trt {
            config.accelerator = Accelerator::TensorRt;
        } else if self.cuda {
            config.accelerator = Accelerator::Cuda;
        }
        if let Some(device_id) = self.device_id {
            config.device_id = device_id;
        }
        if let Some(threads) = self.threads {
            config.num_threads = threads;
        }
    }
}

/// 图片目录帧源
struct DirectorySource {
    files: Vec<PathBuf>,
    paused: AtomicBool,
}

impl DirectorySource {
    fn open(dir: &Path) -> Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("cannot read frame directory {}", dir.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg" | "bmp"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            bail!("no images found in {}", dir.display());
        }
        info!("📹 帧目录: {} ({} 张)", dir.display(), files.len());

        Ok(Self {
            files,
            paused: AtomicBool::new(false),
        })
    }

    fn len(&self) -> usize {
        self.files.len()
    }

    fn read(&self, index: usize) -> Result<CapturedFrame> {
        let path = &self.files[index % self.files.len()];
        let img = image::open(path).with_context(|| format!("cannot decode {}", path.display()))?;
        Ok(CapturedFrame::from_image(&img)?)
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}

impl FrameSource for DirectorySource {
    fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        info!("⏸️  帧源已暂停");
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        info!("▶️  帧源已恢复");
    }
}

#[cfg(feature = "onnx")]
fn load_model_engine(config: &DetectorConfig) -> Result<Option<Box<dyn InferenceEngine>>> {
    let engine: Box<dyn InferenceEngine> = Box::new(yolov4_sentinel::OnnxEngine::load(
        &config.model_path,
        config.input_size,
        config.engine_options(),
    )?);
    Ok(Some(engine))
}

#[cfg(not(feature = "onnx"))]
fn load_model_engine(_config: &DetectorConfig) -> Result<Option<Box<dyn InferenceEngine>>> {
    warn!("⚠️  未启用 onnx 特性, 使用合成推理引擎");
    Ok(None)
}

fn load_engine(config: &DetectorConfig, args: &Args) -> Result<Box<dyn InferenceEngine>> {
    if !args.synthetic {
        if let Some(engine) = load_model_engine(config)? {
            return Ok(engine);
        }
    }

    let num_classes = load_labels(&config.labels_path)?.len();
    let engine = SyntheticEngine::new(config.input_size, num_classes, args.seed)
        .with_latency(Duration::from_millis(args.latency_ms));
    Ok(Box::new(engine))
}

fn wait_for_enter() {
    info!("⌨️  按回车确认...");
    let mut line = String::new();
    let _ = std::io::stdin().lock().read_line(&mut line);
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.fps <= 0.0 {
        bail!("fps must be positive");
    }

    let mut config = DetectorConfig::load(&args.config);
    args.apply(&mut config);
    config.print_summary();

    let source = Arc::new(DirectorySource::open(&args.frames)?);
    let (presenter, rx_estimates) = LogPresenter::new();
    let presenter = Arc::new(presenter);

    info!("🚀 哨兵启动");
    let mut session = Session::start(
        config,
        |config| load_engine(config, &args),
        source.clone(),
        presenter.clone(),
    )?;

    let interval = Duration::from_secs_f64(1.0 / args.fps);
    let mut index = 0usize;
    let (mut admitted, mut dropped) = (0u64, 0u64);

    while !session.is_ended() {
        let tick = Instant::now();

        if let Ok((_estimate, ack)) = rx_estimates.try_recv() {
            if !args.auto_ack {
                wait_for_enter();
            }
            ack.acknowledge();
            continue;
        }

        if source.is_paused() {
            std::thread::sleep(interval);
            continue;
        }

        if index >= source.len() && !args.repeat {
            info!("📁 帧目录回放完毕");
            break;
        }

        match source.read(index) {
            Ok(frame) => match session.submit(&frame) {
                Admission::Admitted(_) => admitted += 1,
                Admission::Dropped(_) => dropped += 1,
                Admission::Closed => break,
            },
            Err(e) => warn!("⚠️  跳过第 {} 帧: {:#}", index, e),
        }
        index += 1;

        // 渲染端在这里消费重绘请求
        presenter.redraw().take();

        if let Some(rest) = interval.checked_sub(tick.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    let state = session.state();
    session.end();

    info!(
        "✅ 哨兵退出: 共{}帧 | 检测{}帧 | 丢弃{}帧 | 最大人数 {} | 告警 {}",
        state.frame_counter,
        admitted,
        dropped,
        state.max_observed_count,
        if state.alert_fired { "已触发" } else { "未触发" }
    );
    info!("📝 检测结果 {} 份", presenter.reports());
    Ok(())
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测器配置 - 通过JSON文件调整参数

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::alert::ResourceCoefficients;
use crate::error::SentinelError;
use crate::models::{Accelerator, EngineOptions, ModelVariant};
use crate::utils::InterpolationMethod;

/// 检测会话参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    // === 模型 ===
    pub model_path: String,  // 模型文件
    pub labels_path: String, // 标签文件 (每行一个, 顺序即类别索引)
    pub model_variant: ModelVariant,
    pub input_size: u32, // 模型输入边长

    // === 推理后端 ===
    pub accelerator: Accelerator,
    pub device_id: i32,
    pub num_threads: usize,

    // === 检测参数 ===
    pub conf_threshold: f32, // 置信度阈值
    pub iou_threshold: f32,  // NMS IOU阈值
    pub target_label: String,
    pub publish_target_only: bool, // 只输出目标类别给叠加层/跟踪器

    // === 画面 ===
    pub preview_width: u32,
    pub preview_height: u32,
    pub sensor_rotation: i32, // 传感器相对屏幕的旋转 (90的倍数)
    pub maintain_aspect_ratio: bool,
    pub interpolation: InterpolationMethod,

    // === 告警 ===
    pub alert_delay_ms: u64,
    pub resources: ResourceCoefficients,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: "models/yolov4-tiny-416.onnx".to_string(),
            labels_path: "models/coco.labels".to_string(),
            model_variant: ModelVariant::Tiny,
            input_size: 416,

            accelerator: Accelerator::Cpu,
            device_id: 0,
            num_threads: 4,

            conf_threshold: 0.5,
            iou_threshold: 0.6,
            target_label: "person".to_string(),
            publish_target_only: true,

            preview_width: 640,
            preview_height: 480,
            sensor_rotation: 0,
            maintain_aspect_ratio: false,
            interpolation: InterpolationMethod::Nearest,

            alert_delay_ms: 2000,
            resources: ResourceCoefficients::default(),
        }
    }
}

impl DetectorConfig {
    /// 从JSON文件加载配置; 文件不存在时写出默认配置
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                config.save(path);
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save<P: AsRef<Path>>(&self, path: P) {
        let path = path.as_ref();
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    error!("❌ 保存配置失败: {}", e);
                } else {
                    info!("💾 配置已保存到 {}", path.display());
                }
            }
            Err(e) => error!("❌ 序列化配置失败: {}", e),
        }
    }

    /// 参数合法性检查
    pub fn validate(&self) -> Result<(), SentinelError> {
        let invalid = |msg: String| Err(SentinelError::InvalidConfig(msg));

        if !(0.0..=1.0).contains(&self.conf_threshold) {
            return invalid(format!("conf_threshold {} not in [0, 1]", self.conf_threshold));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return invalid(format!("iou_threshold {} not in [0, 1]", self.iou_threshold));
        }
        if self.input_size == 0 {
            return invalid("input_size must be positive".to_string());
        }
        if self.num_threads == 0 {
            return invalid("num_threads must be positive".to_string());
        }
        if self.device_id < 0 {
            return invalid(format!("device_id {} must not be negative", self.device_id));
        }
        if self.preview_width == 0 || self.preview_height == 0 {
            return invalid(format!(
                "preview size {}x{} must be positive",
                self.preview_width, self.preview_height
            ));
        }
        if self.sensor_rotation % 90 != 0 {
            return Err(SentinelError::InvalidRotation(self.sensor_rotation));
        }
        if self.target_label.trim().is_empty() {
            return invalid("target_label must not be empty".to_string());
        }
        if self.resources.persons_per_medical_kit == 0 {
            return invalid("persons_per_medical_kit must be positive".to_string());
        }
        Ok(())
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            accelerator: self.accelerator,
            device_id: self.device_id,
            num_threads: self.num_threads,
        }
    }

    pub fn alert_delay(&self) -> Duration {
        Duration::from_millis(self.alert_delay_ms)
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️  当前检测配置:");
        info!(
            "  模型: {} ({:?}, {}x{})",
            self.model_path, self.model_variant, self.input_size, self.input_size
        );
        info!("  标签: {}", self.labels_path);
        info!(
            "  推理后端: {:?} (设备 {}) | 线程: {}",
            self.accelerator, self.device_id, self.num_threads
        );
        info!(
            "  置信度: {:.2} | IOU: {:.2} | 目标: {}",
            self.conf_threshold, self.iou_threshold, self.target_label
        );
        info!(
            "  预览: {}x{} 旋转 {}° 保持比例 {}",
            self.preview_width, self.preview_height, self.sensor_rotation, self.maintain_aspect_ratio
        );
        info!("  告警延迟: {}ms", self.alert_delay_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DetectorConfig::default();
        assert_eq!(config.conf_threshold, 0.5);
        assert_eq!(config.iou_threshold, 0.6);
        assert_eq!(config.target_label, "person");
        assert_eq!(config.alert_delay(), Duration::from_millis(2000));
        assert_eq!(config.input_size, 416);
        assert!(!config.maintain_aspect_ratio);
        assert_eq!(config.engine_options(), EngineOptions::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: DetectorConfig =
            serde_json::from_str(r#"{ "conf_threshold": 0.3, "model_variant": "full" }"#).unwrap();
        assert_eq!(config.conf_threshold, 0.3);
        assert_eq!(config.model_variant, ModelVariant::Full);
        assert_eq!(config.iou_threshold, 0.6);
    }

    #[test]
    fn test_load_missing_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        let config = DetectorConfig::load(&path);
        assert_eq!(config, DetectorConfig::default());
        assert!(path.exists());
        assert_eq!(DetectorConfig::load(&path), config);
    }

    #[test]
    fn test_load_corrupt_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(DetectorConfig::load(&path), DetectorConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = DetectorConfig {
            sensor_rotation: 45,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SentinelError::InvalidRotation(45))
        ));

        config.sensor_rotation = 270;
        config.iou_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(SentinelError::InvalidConfig(_))
        ));

        config.iou_threshold = 0.6;
        config.num_threads = 0;
        assert!(matches!(
            config.validate(),
            Err(SentinelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_accelerator_from_json() {
        let config: DetectorConfig = serde_json::from_str(
            r#"{ "accelerator": "tensorrt", "device_id": 1, "num_threads": 2 }"#,
        )
        .unwrap();
        let options = config.engine_options();
        assert_eq!(options.accelerator, Accelerator::TensorRt);
        assert_eq!(options.device_id, 1);
        assert_eq!(options.num_threads, 2);
        assert!(config.validate().is_ok());

        assert!(serde_json::from_str::<DetectorConfig>(r#"{ "accelerator": "npu" }"#).is_err());
    }
}

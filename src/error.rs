// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 错误类型 (Error types)
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SentinelError {
    #[error("failed to read label file {path:?}")]
    LabelFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("label file {0:?} contains no labels")]
    EmptyLabels(PathBuf),

    #[error("model reports {model} classes but {labels} labels were loaded")]
    ClassCountMismatch { model: usize, labels: usize },

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("rotation must be a multiple of 90 degrees, got {0}")]
    InvalidRotation(i32),

    #[error("transform for {width}x{height} frame is not invertible")]
    DegenerateTransform { width: u32, height: u32 },

    #[error("frame buffer holds {got} bytes, {width}x{height} RGBA needs {expected}")]
    FrameSize {
        width: u32,
        height: u32,
        expected: usize,
        got: usize,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

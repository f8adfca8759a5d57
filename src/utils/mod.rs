// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 工具模块
/// Utility modules
pub mod affine_transform;

pub use affine_transform::{
    transformation_matrix, AffineMatrix, CoordinateMapper, InterpolationMethod,
};

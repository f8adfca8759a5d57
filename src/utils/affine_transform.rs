// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 仿射变换工具模块
///
/// 模型输入空间 ⇄ 原始帧空间 ⇄ 显示空间 的坐标映射,
/// 以及把原始帧采样进模型输入缓冲区 (类似 cv2::warpAffine)
use serde::{Deserialize, Serialize};

use crate::detection::Rect;
use crate::error::SentinelError;

/// 仿射变换矩阵 (2x3)
/// | a11 a12 b1 |
/// | a21 a22 b2 |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMatrix {
    pub a11: f32,
    pub a12: f32,
    pub b1: f32,
    pub a21: f32,
    pub a22: f32,
    pub b2: f32,
}

impl Default for AffineMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineMatrix {
    /// 创建单位仿射矩阵
    pub fn identity() -> Self {
        Self {
            a11: 1.0,
            a12: 0.0,
            b1: 0.0,
            a21: 0.0,
            a22: 1.0,
            b2: 0.0,
        }
    }

    /// 应用仿射变换到点 (x, y)
    pub fn transform_point(&self, x: f32, y: f32) -> (f32, f32) {
        let new_x = self.a11 * x + self.a12 * y + self.b1;
        let new_y = self.a21 * x + self.a22 * y + self.b2;
        (new_x, new_y)
    }

    /// 映射矩形: 四个角点变换后的外接矩形
    pub fn map_rect(&self, r: &Rect) -> Rect {
        let corners = [
            self.transform_point(r.left, r.top),
            self.transform_point(r.right, r.top),
            self.transform_point(r.left, r.bottom),
            self.transform_point(r.right, r.bottom),
        ];
        let mut out = Rect::new(f32::MAX, f32::MAX, f32::MIN, f32::MIN);
        for (x, y) in corners {
            out.left = out.left.min(x);
            out.top = out.top.min(y);
            out.right = out.right.max(x);
            out.bottom = out.bottom.max(y);
        }
        out
    }

    /// 计算逆矩阵 (用于反向映射)
    pub fn inverse(&self) -> Option<Self> {
        let det = self.a11 * self.a22 - self.a12 * self.a21;
        if det.abs() < 1e-10 {
            return None; // 矩阵不可逆
        }

        let inv_det = 1.0 / det;
        Some(Self {
            a11: self.a22 * inv_det,
            a12: -self.a12 * inv_det,
            b1: (self.a12 * self.b2 - self.a22 * self.b1) * inv_det,
            a21: -self.a21 * inv_det,
            a22: self.a11 * inv_det,
            b2: (self.a21 * self.b1 - self.a11 * self.b2) * inv_det,
        })
    }

    /// 创建平移矩阵
    pub fn translation(dx: f32, dy: f32) -> Self {
        Self {
            b1: dx,
            b2: dy,
            ..Self::identity()
        }
    }

    /// 创建缩放矩阵
    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a11: sx,
            a22: sy,
            ..Self::identity()
        }
    }

    /// 创建旋转矩阵 (角度制, y轴向下)
    ///
    /// 90° 的整数倍使用精确系数, 避免 cos/sin 的舍入误差
    pub fn rotation(angle_degrees: f32) -> Self {
        let (cos_a, sin_a) = if angle_degrees % 90.0 == 0.0 {
            match (angle_degrees / 90.0) as i32 % 4 {
                0 => (1.0, 0.0),
                1 | -3 => (0.0, 1.0),
                2 | -2 => (-1.0, 0.0),
                _ => (0.0, -1.0),
            }
        } else {
            let angle_rad = angle_degrees.to_radians();
            (angle_rad.cos(), angle_rad.sin())
        };
        Self {
            a11: cos_a,
            a12: -sin_a,
            b1: 0.0,
            a21: sin_a,
            a22: cos_a,
            b2: 0.0,
        }
    }

    /// 矩阵组合 (self * other): 先应用 other, 再应用 self
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            a11: self.a11 * other.a11 + self.a12 * other.a21,
            a12: self.a11 * other.a12 + self.a12 * other.a22,
            b1: self.a11 * other.b1 + self.a12 * other.b2 + self.b1,
            a21: self.a21 * other.a11 + self.a22 * other.a21,
            a22: self.a21 * other.a12 + self.a22 * other.a22,
            b2: self.a21 * other.b1 + self.a22 * other.b2 + self.b2,
        }
    }

    /// 追加变换: 先应用 self, 再应用 next
    pub fn then(&self, next: &Self) -> Self {
        next.compose(self)
    }
}

/// 构建 src → dst 的变换矩阵
///
/// 1. 有旋转时: 平移使源图中心位于原点, 再旋转
/// 2. 缩放到目标尺寸 (旋转 90/270 时宽高互换); `maintain_aspect` 时取较大的统一缩放
/// 3. 有旋转时: 平移到目标中心
pub fn transformation_matrix(
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
    rotation_degrees: i32,
    maintain_aspect: bool,
) -> Result<AffineMatrix, SentinelError> {
    if rotation_degrees % 90 != 0 {
        return Err(SentinelError::InvalidRotation(rotation_degrees));
    }

    let mut matrix = AffineMatrix::identity();

    if rotation_degrees != 0 {
        matrix = matrix
            .then(&AffineMatrix::translation(
                -(src_width as f32) / 2.0,
                -(src_height as f32) / 2.0,
            ))
            .then(&AffineMatrix::rotation(rotation_degrees as f32));
    }

    let transpose = (rotation_degrees.abs() + 90) % 180 == 0;
    let (in_width, in_height) = if transpose {
        (src_height, src_width)
    } else {
        (src_width, src_height)
    };

    if in_width != dst_width || in_height != dst_height {
        let scale_x = dst_width as f32 / in_width as f32;
        let scale_y = dst_height as f32 / in_height as f32;
        if maintain_aspect {
            let s = scale_x.max(scale_y);
            matrix = matrix.then(&AffineMatrix::scale(s, s));
        } else {
            matrix = matrix.then(&AffineMatrix::scale(scale_x, scale_y));
        }
    }

    if rotation_degrees != 0 {
        matrix = matrix.then(&AffineMatrix::translation(
            dst_width as f32 / 2.0,
            dst_height as f32 / 2.0,
        ));
    }

    Ok(matrix)
}

/// 插值方法
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    #[default]
    Nearest, // 最近邻插值
    Bilinear, // 双线性插值
}

/// 帧 ⇄ 模型输入 坐标映射
///
/// 只在预览尺寸或方向变化时重建, 不随帧重建
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    frame_width: u32,
    frame_height: u32,
    crop_size: u32,
    rotation: i32,
    maintain_aspect: bool,
    frame_to_crop: AffineMatrix,
    crop_to_frame: AffineMatrix,
}

impl CoordinateMapper {
    pub fn new(
        frame_width: u32,
        frame_height: u32,
        crop_size: u32,
        rotation: i32,
        maintain_aspect: bool,
    ) -> Result<Self, SentinelError> {
        let frame_to_crop = transformation_matrix(
            frame_width,
            frame_height,
            crop_size,
            crop_size,
            rotation,
            maintain_aspect,
        )?;
        let crop_to_frame = frame_to_crop
            .inverse()
            .ok_or(SentinelError::DegenerateTransform {
                width: frame_width,
                height: frame_height,
            })?;

        Ok(Self {
            frame_width,
            frame_height,
            crop_size,
            rotation,
            maintain_aspect,
            frame_to_crop,
            crop_to_frame,
        })
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    pub fn crop_size(&self) -> u32 {
        self.crop_size
    }

    pub fn rotation(&self) -> i32 {
        self.rotation
    }

    pub fn maintain_aspect(&self) -> bool {
        self.maintain_aspect
    }

    pub fn frame_to_crop(&self) -> &AffineMatrix {
        &self.frame_to_crop
    }

    pub fn crop_to_frame(&self) -> &AffineMatrix {
        &self.crop_to_frame
    }

    /// 模型输入坐标 → 原始帧坐标
    pub fn to_frame(&self, r: &Rect) -> Rect {
        self.crop_to_frame.map_rect(r)
    }

    /// 原始帧坐标 → 模型输入坐标
    pub fn to_model(&self, r: &Rect) -> Rect {
        self.frame_to_crop.map_rect(r)
    }

    /// 原始帧 → 画布 (叠加层) 的变换
    ///
    /// 旋转后的帧按最大统一缩放放入画布, 再非等比变换到该区域
    pub fn frame_to_display(
        &self,
        canvas_width: u32,
        canvas_height: u32,
    ) -> Result<AffineMatrix, SentinelError> {
        let rotated = self.rotation.rem_euclid(180) == 90;
        let (fw, fh) = if rotated {
            (self.frame_height, self.frame_width)
        } else {
            (self.frame_width, self.frame_height)
        };
        let multiplier =
            (canvas_height as f32 / fh as f32).min(canvas_width as f32 / fw as f32);

        transformation_matrix(
            self.frame_width,
            self.frame_height,
            (multiplier * fw as f32) as u32,
            (multiplier * fh as f32) as u32,
            self.rotation,
            false,
        )
    }

    /// 把 RGBA 帧采样进模型输入缓冲区
    ///
    /// 输出: crop x crop x 3, 行优先, RGB 交错, 归一化到 [0,1]。
    /// 超出原始帧的像素填 0。调用方保证 `rgba.len() >= w * h * 4`,
    /// `out.len() == crop * crop * 3`。
    pub fn warp_into_model_input(
        &self,
        rgba: &[u8],
        out: &mut [f32],
        interpolation: InterpolationMethod,
    ) {
        let size = self.crop_size as usize;
        let (src_width, src_height) = (self.frame_width as usize, self.frame_height as usize);

        for dst_y in 0..size {
            for dst_x in 0..size {
                // 像素中心反向映射到源图像坐标
                let (src_x, src_y) = self
                    .crop_to_frame
                    .transform_point(dst_x as f32 + 0.5, dst_y as f32 + 0.5);

                let dst_idx = (dst_y * size + dst_x) * 3;
                for c in 0..3 {
                    let value = match interpolation {
                        InterpolationMethod::Nearest => get_pixel_nearest_rgba(
                            rgba,
                            src_x - 0.5,
                            src_y - 0.5,
                            src_width,
                            src_height,
                            c,
                        ),
                        InterpolationMethod::Bilinear => get_pixel_bilinear_rgba(
                            rgba,
                            src_x - 0.5,
                            src_y - 0.5,
                            src_width,
                            src_height,
                            c,
                        ),
                    };
                    out[dst_idx + c] = value / 255.0;
                }
            }
        }
    }
}

/// 最近邻插值 (RGBA)
fn get_pixel_nearest_rgba(
    src: &[u8],
    x: f32,
    y: f32,
    width: usize,
    height: usize,
    channel: usize,
) -> f32 {
    get_border_pixel_rgba(src, x.round() as i32, y.round() as i32, width, height, channel)
}

/// 双线性插值 (RGBA)
fn get_pixel_bilinear_rgba(
    src: &[u8],
    x: f32,
    y: f32,
    width: usize,
    height: usize,
    channel: usize,
) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let x1 = x0 + 1;
    let y1 = y0 + 1;

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_border_pixel_rgba(src, x0, y0, width, height, channel);
    let p01 = get_border_pixel_rgba(src, x0, y1, width, height, channel);
    let p10 = get_border_pixel_rgba(src, x1, y0, width, height, channel);
    let p11 = get_border_pixel_rgba(src, x1, y1, width, height, channel);

    let v0 = p00 * (1.0 - fx) + p10 * fx;
    let v1 = p01 * (1.0 - fx) + p11 * fx;
    (v0 * (1.0 - fy) + v1 * fy).clamp(0.0, 255.0)
}

/// 边界外填 0
fn get_border_pixel_rgba(
    src: &[u8],
    x: i32,
    y: i32,
    width: usize,
    height: usize,
    channel: usize,
) -> f32 {
    if x >= 0 && x < width as i32 && y >= 0 && y < height as i32 {
        let idx = (y as usize * width + x as usize) * 4 + channel;
        src[idx] as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: (f32, f32), b: (f32, f32), tol: f32) -> bool {
        (a.0 - b.0).abs() < tol && (a.1 - b.1).abs() < tol
    }

    #[test]
    fn test_identity_transform() {
        let matrix = AffineMatrix::identity();
        let (x, y) = matrix.transform_point(10.0, 20.0);
        assert_eq!(x, 10.0);
        assert_eq!(y, 20.0);
    }

    #[test]
    fn test_rotation_90() {
        let matrix = AffineMatrix::rotation(90.0);
        assert_eq!(matrix.transform_point(1.0, 0.0), (0.0, 1.0));
        let matrix = AffineMatrix::rotation(-90.0);
        assert_eq!(matrix.transform_point(1.0, 0.0), (0.0, -1.0));
    }

    #[test]
    fn test_compose_is_associative() {
        let a = AffineMatrix::translation(3.0, -2.0);
        let b = AffineMatrix::rotation(90.0);
        let c = AffineMatrix::scale(2.0, 0.5);
        let left = a.compose(&b).compose(&c);
        let right = a.compose(&b.compose(&c));
        for p in [(0.0, 0.0), (10.0, 4.0), (-7.5, 3.25)] {
            assert!(approx(left.transform_point(p.0, p.1), right.transform_point(p.0, p.1), 1e-4));
        }
    }

    #[test]
    fn test_invalid_rotation() {
        assert!(matches!(
            transformation_matrix(640, 480, 416, 416, 45, false),
            Err(SentinelError::InvalidRotation(45))
        ));
    }

    #[test]
    fn test_no_rotation_stretches_each_axis() {
        let m = transformation_matrix(640, 480, 416, 416, 0, false).unwrap();
        assert!(approx(m.transform_point(640.0, 480.0), (416.0, 416.0), 1e-3));
        assert!(approx(m.transform_point(320.0, 0.0), (208.0, 0.0), 1e-3));
    }

    #[test]
    fn test_rotation_90_fills_rotated_preview() {
        // 640x480 旋转 90°: 源图左上角落到目标右上角
        let m = transformation_matrix(640, 480, 416, 416, 90, false).unwrap();
        assert!(approx(m.transform_point(0.0, 0.0), (416.0, 0.0), 1e-3));
        assert!(approx(m.transform_point(640.0, 480.0), (0.0, 416.0), 1e-3));
        assert!(approx(m.transform_point(320.0, 240.0), (208.0, 208.0), 1e-3));
    }

    #[test]
    fn test_maintain_aspect_uses_larger_scale() {
        let m = transformation_matrix(640, 480, 416, 416, 0, true).unwrap();
        let s = 416.0 / 480.0;
        assert!(approx(m.transform_point(100.0, 100.0), (100.0 * s, 100.0 * s), 1e-3));
    }

    #[test]
    fn test_mapper_roundtrip_all_rotations() {
        let sizes = [(640, 480, 416), (480, 640, 416), (1280, 720, 320), (300, 500, 608)];
        for (w, h, crop) in sizes {
            for rotation in [0, 90, 180, 270, -90] {
                for maintain in [false, true] {
                    let mapper = CoordinateMapper::new(w, h, crop, rotation, maintain).unwrap();
                    let fwd = mapper.frame_to_crop();
                    let inv = mapper.crop_to_frame();
                    for p in [(0.0, 0.0), (12.5, 99.0), (w as f32, h as f32), (w as f32 / 3.0, 7.0)] {
                        let (cx, cy) = fwd.transform_point(p.0, p.1);
                        let back = inv.transform_point(cx, cy);
                        assert!(
                            approx(back, p, 1e-2),
                            "{}x{} crop {} rot {}: {:?} -> {:?}",
                            w,
                            h,
                            crop,
                            rotation,
                            p,
                            back
                        );
                    }
                    let r = Rect::new(10.0, 20.0, 200.0, 100.0);
                    let back = mapper.to_frame(&mapper.to_model(&r));
                    assert!((back.left - r.left).abs() < 1e-2);
                    assert!((back.bottom - r.bottom).abs() < 1e-2);
                }
            }
        }
    }

    #[test]
    fn test_to_frame_scales_box() {
        let mapper = CoordinateMapper::new(640, 480, 416, 0, false).unwrap();
        let r = mapper.to_frame(&Rect::new(0.0, 0.0, 208.0, 104.0));
        assert!((r.right - 320.0).abs() < 1e-3);
        assert!((r.bottom - 120.0).abs() < 1e-3);
    }

    #[test]
    fn test_frame_to_display_fits_canvas() {
        let mapper = CoordinateMapper::new(640, 480, 416, 90, false).unwrap();
        // 旋转后 480x640, 放进 1080x1920 画布: 缩放 2.25
        let m = mapper.frame_to_display(1080, 1920).unwrap();
        let r = m.map_rect(&Rect::new(0.0, 0.0, 640.0, 480.0));
        assert!(r.left.abs() < 1e-2 && r.top.abs() < 1e-2);
        assert!((r.right - 1080.0).abs() < 1e-2);
        assert!((r.bottom - 1440.0).abs() < 1e-2);
    }

    #[test]
    fn test_warp_copies_pixels() {
        // 2x2 帧 → 2x2 模型输入, 无缩放
        let rgba = vec![
            255, 0, 0, 255, 0, 255, 0, 255, //
            0, 0, 255, 255, 255, 255, 255, 255,
        ];
        let mapper = CoordinateMapper::new(2, 2, 2, 0, false).unwrap();
        let mut out = vec![0.0f32; 2 * 2 * 3];
        mapper.warp_into_model_input(&rgba, &mut out, InterpolationMethod::Nearest);
        assert_eq!(&out[0..3], &[1.0, 0.0, 0.0]);
        assert_eq!(&out[3..6], &[0.0, 1.0, 0.0]);
        assert_eq!(&out[6..9], &[0.0, 0.0, 1.0]);
        assert_eq!(&out[9..12], &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_warp_rotated_180() {
        let rgba = vec![
            255, 0, 0, 255, 0, 255, 0, 255, //
            0, 0, 255, 255, 255, 255, 255, 255,
        ];
        let mapper = CoordinateMapper::new(2, 2, 2, 180, false).unwrap();
        let mut out = vec![0.0f32; 12];
        mapper.warp_into_model_input(&rgba, &mut out, InterpolationMethod::Bilinear);
        // 左上 ← 原右下 (白)
        assert!((out[0] - 1.0).abs() < 1e-6 && (out[2] - 1.0).abs() < 1e-6);
        // 右下 ← 原左上 (红)
        assert!((out[9] - 1.0).abs() < 1e-6 && out[10].abs() < 1e-6);
    }
}

/// 单应变换工具模块
/// 相机像素平面 → 参考 (事件相机) 平面
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{PipelineError, Result};

pub const HOMOGRAPHY_YAML: &str = "homography_matrix.yaml";

/// 单应矩阵 (3x3)
/// | h11 h12 h13 |
/// | h21 h22 h23 |
/// | h31 h32 h33 |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    pub m: [[f64; 3]; 3],
}

/// 轴对齐矩形 (左上角 + 宽高, 浮点)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectF {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl RectF {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// 四个角点: 左上, 右上, 右下, 左下
    pub fn corners(&self) -> [(f64, f64); 4] {
        let (x_max, y_max) = (self.x + self.w, self.y + self.h);
        [
            (self.x, self.y),
            (x_max, self.y),
            (x_max, y_max),
            (self.x, y_max),
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.w.is_finite() && self.h.is_finite()
    }
}

impl Homography {
    /// 创建单位矩阵
    pub fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// 从3x3数组创建
    pub fn from_array(m: [[f64; 3]; 3]) -> Self {
        Self { m }
    }

    /// 应用单应变换到点 (x, y); 齐次坐标除以尺度分量
    pub fn transform_point(&self, x: f64, y: f64) -> (f64, f64) {
        let m = &self.m;
        let u = m[0][0] * x + m[0][1] * y + m[0][2];
        let v = m[1][0] * x + m[1][1] * y + m[1][2];
        let s = m[2][0] * x + m[2][1] * y + m[2][2];
        (u / s, v / s)
    }

    /// 计算逆矩阵 (伴随矩阵 / 行列式)
    pub fn inverse(&self) -> Option<Self> {
        let m = &self.m;
        let c00 = m[1][1] * m[2][2] - m[1][2] * m[2][1];
        let c01 = m[1][2] * m[2][0] - m[1][0] * m[2][2];
        let c02 = m[1][0] * m[2][1] - m[1][1] * m[2][0];
        let det = m[0][0] * c00 + m[0][1] * c01 + m[0][2] * c02;
        if det.abs() < 1e-12 {
            return None; // 矩阵不可逆
        }
        let inv_det = 1.0 / det;

        Some(Self {
            m: [
                [
                    c00 * inv_det,
                    (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
                    (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
                ],
                [
                    c01 * inv_det,
                    (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
                    (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
                ],
                [
                    c02 * inv_det,
                    (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
                    (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
                ],
            ],
        })
    }

    /// 变换轴对齐矩形
    ///
    /// 透视变换下矩形变为一般四边形, 因此四个角点都要变换,
    /// 再取其外接轴对齐矩形。任一坐标非有限值时返回错误。
    pub fn project_rect(&self, rect: &RectF) -> Result<RectF> {
        let mut x_min = f64::INFINITY;
        let mut y_min = f64::INFINITY;
        let mut x_max = f64::NEG_INFINITY;
        let mut y_max = f64::NEG_INFINITY;

        for (x, y) in rect.corners() {
            let (u, v) = self.transform_point(x, y);
            if !u.is_finite() || !v.is_finite() {
                return Err(PipelineError::InvalidProjection);
            }
            x_min = x_min.min(u);
            y_min = y_min.min(v);
            x_max = x_max.max(u);
            y_max = y_max.max(v);
        }

        let projected = RectF::new(x_min, y_min, x_max - x_min, y_max - y_min);
        if !projected.is_finite() {
            return Err(PipelineError::InvalidProjection);
        }
        Ok(projected)
    }
}

/// 变换整数框 (x, y, w, h), 结果向零截断为整数
pub fn project_box(h: &Homography, bbox: (i32, i32, i32, i32)) -> Result<(i32, i32, i32, i32)> {
    let (x, y, w, hh) = bbox;
    let r = h.project_rect(&RectF::new(x as f64, y as f64, w as f64, hh as f64))?;
    Ok((r.x as i32, r.y as i32, r.w as i32, r.h as i32))
}

// ========== 配置文件 ==========

#[derive(Debug, Deserialize)]
struct HomographyDoc {
    homography_matrix: BTreeMap<String, [[f64; 3]; 3]>,
}

/// 相机ID → 单应矩阵
#[derive(Debug, Clone, Default)]
pub struct HomographyConfig {
    matrices: BTreeMap<String, Homography>,
}

impl HomographyConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let doc: HomographyDoc = serde_yaml::from_str(&text).map_err(|source| PipelineError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            matrices: doc
                .homography_matrix
                .into_iter()
                .map(|(camera, m)| (camera, Homography::from_array(m)))
                .collect(),
        })
    }

    pub fn insert(&mut self, camera: impl Into<String>, h: Homography) {
        self.matrices.insert(camera.into(), h);
    }

    pub fn get(&self, camera: &str) -> Result<&Homography> {
        self.matrices
            .get(camera)
            .ok_or_else(|| PipelineError::UnknownCamera {
                camera: camera.to_string(),
            })
    }

    pub fn cameras(&self) -> impl Iterator<Item = &str> {
        self.matrices.keys().map(String::as_str)
    }
}

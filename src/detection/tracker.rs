//! 多目标跟踪公共组件
//! Common components for multi-object tracking

use std::path::Path;

use image::DynamicImage;

use super::types::{BBox, Detection};
use crate::error::Result;

// ========== 帧 ==========

/// 送入跟踪器的单帧 (按相机内顺序编号)
pub struct Frame<'a> {
    /// 帧序号 (相机内, 从0开始)
    pub index: usize,
    /// 图像文件路径
    pub path: &'a Path,
    /// 解码后的图像
    pub image: &'a DynamicImage,
}

// ========== 跟踪器统一接口 ==========

/// 多目标跟踪器 Trait
///
/// 每个相机使用独立实例; 帧必须按顺序送入, 关联状态跨帧保留,
/// 这样同一目标在整段序列中保持同一 `track_id`。
pub trait ObjectTracker {
    /// 跟踪一帧, 返回带跟踪ID的检测框
    fn track(&mut self, frame: &Frame<'_>) -> Result<Vec<Detection>>;

    /// 重置跟踪器 (清除所有跟踪)
    fn reset(&mut self);
}

impl<T: ObjectTracker + ?Sized> ObjectTracker for Box<T> {
    fn track(&mut self, frame: &Frame<'_>) -> Result<Vec<Detection>> {
        (**self).track(frame)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

// ========== 卡尔曼滤波器 ==========

/// 简化卡尔曼滤波器 (用于单个边界框的位置和尺寸平滑)
/// 状态向量: [x_center, y_center, width, height, vx, vy, vw, vh]
#[derive(Clone, Debug)]
pub struct KalmanBoxFilter {
    /// 状态估计: [cx, cy, w, h, vx, vy, vw, vh]
    state: [f32; 8],

    /// 估计误差协方差 (简化为对角阵)
    p: [f32; 8],

    /// 过程噪声 (运动不确定性)
    q: f32,

    /// 观测噪声 (测量不确定性)
    r: f32,
}

impl KalmanBoxFilter {
    /// 创建新的卡尔曼滤波器
    ///
    /// # 参数
    /// - `bbox`: 初始边界框
    /// - `q`: 过程噪声 (0.1-1.0, 越小越平滑)
    /// - `r`: 观测噪声 (越大越平滑)
    pub fn new(bbox: &BBox, q: f32, r: f32) -> Self {
        let (cx, cy) = bbox.center();
        let w = bbox.x2 - bbox.x1;
        let h = bbox.y2 - bbox.y1;

        Self {
            state: [cx, cy, w, h, 0.0, 0.0, 0.0, 0.0], // 初始速度为0
            p: [10.0; 8],
            q,
            r,
        }
    }

    /// 预测下一帧状态 (匀速运动模型)
    pub fn predict(&mut self) {
        for i in 0..4 {
            self.state[i] += self.state[i + 4];
        }
        for p in self.p.iter_mut() {
            *p += self.q;
        }
    }

    /// 更新 (融合观测值)
    pub fn update(&mut self, bbox: &BBox) {
        let (cx, cy) = bbox.center();
        let w = bbox.x2 - bbox.x1;
        let h = bbox.y2 - bbox.y1;

        // 观测残差
        let y = [
            cx - self.state[0],
            cy - self.state[1],
            w - self.state[2],
            h - self.state[3],
        ];

        // 卡尔曼增益: K = P / (P + R), 速度分量观测更弱
        let mut k = [0.0f32; 8];
        for i in 0..8 {
            let r = if i < 4 { self.r } else { self.r * 10.0 };
            k[i] = self.p[i] / (self.p[i] + r);
        }

        for i in 0..4 {
            self.state[i] += k[i] * y[i];
            self.state[i + 4] += k[i + 4] * y[i];
        }

        // 协方差更新: P = (I - K) * P
        for i in 0..8 {
            self.p[i] *= 1.0 - k[i];
        }
    }

    /// 获取预测的边界框 (用于匹配)
    pub fn predicted_bbox(&self) -> BBox {
        let cx = self.state[0] + self.state[4];
        let cy = self.state[1] + self.state[5];
        let w = (self.state[2] + self.state[6]).max(1.0);
        let h = (self.state[3] + self.state[7]).max(1.0);

        BBox {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
            confidence: 1.0,
            class_id: 0,
        }
    }
}

// ========== 工具函数 ==========

/// 计算两个边界框的IOU (Intersection over Union)
pub fn compute_iou(bbox1: &BBox, bbox2: &BBox) -> f32 {
    let x1 = bbox1.x1.max(bbox2.x1);
    let y1 = bbox1.y1.max(bbox2.y1);
    let x2 = bbox1.x2.min(bbox2.x2);
    let y2 = bbox1.y2.min(bbox2.y2);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let area1 = (bbox1.x2 - bbox1.x1) * (bbox1.y2 - bbox1.y1);
    let area2 = (bbox2.x2 - bbox2.x1) * (bbox2.y2 - bbox2.y1);
    let union = area1 + area2 - intersection;

    if union <= 0.0 {
        return 0.0;
    }

    intersection / union
}

/// 根据ID生成不同颜色
pub fn id_to_color(id: i32) -> (u8, u8, u8) {
    if id < 0 {
        return (0, 255, 0);
    }
    let hue = (id as f32 * 137.508) % 360.0; // 黄金角度采样
    hsv_to_rgb(hue, 0.8, 0.9)
}

/// HSV转RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32) -> BBox {
        BBox {
            x1,
            y1,
            x2,
            y2,
            confidence: 0.9,
            class_id: 0,
        }
    }

    #[test]
    fn test_iou() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        assert!((compute_iou(&a, &a) - 1.0).abs() < 1e-6);
        let b = bbox(5.0, 0.0, 15.0, 10.0);
        assert!((compute_iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        let c = bbox(20.0, 20.0, 30.0, 30.0);
        assert_eq!(compute_iou(&a, &c), 0.0);
    }

    #[test]
    fn test_kalman_follows_constant_motion() {
        let mut kf = KalmanBoxFilter::new(&bbox(0.0, 0.0, 10.0, 10.0), 0.1, 0.5);
        for step in 1..20 {
            kf.predict();
            let dx = step as f32 * 2.0;
            kf.update(&bbox(dx, 0.0, dx + 10.0, 10.0));
        }
        let predicted = kf.predicted_bbox();
        // 下一帧中心应接近 x = 40 + 5
        assert!((predicted.center().0 - 45.0).abs() < 2.0);
    }

    #[test]
    fn test_untracked_color_is_green() {
        assert_eq!(id_to_color(-1), (0, 255, 0));
        assert_ne!(id_to_color(1), id_to_color(2));
    }
}

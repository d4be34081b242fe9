/// 检测与跟踪数据结构定义
/// Data structures for detection and tracking
use serde::{Deserialize, Serialize};

// ========== 公共常量 ==========

/// 未跟踪标记 (当前帧没有分配ID)
pub const UNTRACKED: i32 = -1;

// ========== 数据结构 ==========

/// 检测框 (检测器原始输出, 浮点像素坐标)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: i32,
}

impl BBox {
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// 整数像素框 (x1,y1)-(x2,y2)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl PixelBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 浮点框截断为整数 (向零取整)
    pub fn from_bbox(bbox: &BBox) -> Self {
        Self {
            x1: bbox.x1 as i32,
            y1: bbox.y1 as i32,
            x2: bbox.x2 as i32,
            y2: bbox.y2 as i32,
        }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// 面积 (i64 避免大坐标溢出; 退化框可为负)
    pub fn area(&self) -> i64 {
        (self.x2 as i64 - self.x1 as i64) * (self.y2 as i64 - self.y1 as i64)
    }
}

/// 单帧检测结果 (跟踪器 → 适配器)
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: PixelBox,
    pub class_id: i32,
    pub confidence: f32,
    /// 跟踪ID, `UNTRACKED` 表示本帧未关联
    pub track_id: i32,
}

impl Detection {
    pub fn new(bbox: PixelBox, class_id: i32, confidence: f32, track_id: i32) -> Self {
        Self {
            bbox,
            class_id,
            confidence,
            track_id,
        }
    }
}

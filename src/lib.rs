// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 多相机标注融合与事件格式转换
//! Multi-camera label fusion and event-format conversion

pub mod classes; // 类别表与类别过滤策略
pub mod config; // 流水线参数配置
pub mod detection; // 检测与跟踪
pub mod error; // 错误类型
pub mod events; // 事件格式转换
pub mod exclusion; // 排除区域
pub mod frames; // 事件帧渲染
pub mod fusion; // 多相机标注融合
pub mod labels; // 标注记录 (.npy)
pub mod offsets; // 帧时间戳表
pub mod pipeline; // 批处理编排
pub mod render; // 渲染与复核
pub mod rotate; // 图像旋转
pub mod track; // 每相机跟踪适配器
pub mod utils; // 单应变换

pub use crate::classes::ClassPolicy;
pub use crate::config::PipelineConfig;
pub use crate::detection::{Detection, Frame, ObjectTracker, PixelBox};
pub use crate::error::{PipelineError, Result};
pub use crate::exclusion::{should_exclude, ExclusionRegion, RegionFormat, RegionSession};
pub use crate::frames::render_frames;
pub use crate::fusion::{fuse, fuse_and_save, FusedLabelRecord};
pub use crate::labels::TrackRecord;
pub use crate::pipeline::{annotate, prepare, TrackerKind};
pub use crate::track::{track_sequence, TrackOutcome};
pub use crate::utils::{project_box, Homography, HomographyConfig};

use tracing_subscriber::EnvFilter;

/// 初始化日志 (`RUST_LOG` 覆盖, 默认 info)
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

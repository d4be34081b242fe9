/// 检测与跟踪 (Detection & Tracking)
///
/// 外部检测器的结果在这里变成带持久ID的检测框
/// - Detector:  每帧检测框来源
/// - Tracker:   跟踪器统一接口 + 卡尔曼滤波
/// - ByteTrack: 高低分两阶段关联
pub mod bytetrack;
pub mod detector;
pub mod tracker;
pub mod types;

pub use bytetrack::{ByteTrackParams, ByteTrackTracker, ByteTracker};
pub use detector::{FrameDetector, SidecarDetection, SidecarDetector, SidecarTracker};
pub use tracker::{Frame, ObjectTracker};
pub use types::{BBox, Detection, PixelBox, UNTRACKED};

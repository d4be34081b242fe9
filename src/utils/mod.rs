/// 工具模块
/// Utility modules
pub mod homography;

pub use homography::{project_box, Homography, HomographyConfig, RectF, HOMOGRAPHY_YAML};

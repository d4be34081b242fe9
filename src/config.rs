//! 流水线配置 - 通过JSON文件调整参数

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::ByteTrackParams;
use crate::exclusion::DEFAULT_THRESHOLD;

/// 默认检测类别 (类名白名单)
pub const DEFAULT_CLASSES: [&str; 5] = ["car", "bicycle", "person", "motorcycle", "bus"];

/// 流水线参数配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // === 过滤参数 ===
    pub overlap_threshold: f64,       // 排除区域重叠阈值 (百分比)
    pub camera_marker: String,        // 相机目录/文件名中的标识子串
    pub image_extensions: Vec<String>, // 参与跟踪的图像扩展名
    pub default_classes: Vec<String>, // 类名白名单 (空 = 全部)

    // === ByteTrack参数 ===
    pub bytetrack_max_lost_frames: u32,      // 最大丢失帧数
    pub bytetrack_high_score_threshold: f32, // 高分阈值
    pub bytetrack_low_score_threshold: f32,  // 低分阈值
    pub bytetrack_high_iou_threshold: f32,   // 高分IOU阈值
    pub bytetrack_low_iou_threshold: f32,    // 低分IOU阈值

    // === 卡尔曼滤波参数 ===
    pub kalman_process_noise: f32, // 过程噪声 q
    pub kalman_obs_noise: f32,     // 观测噪声 r

    // === 事件相机参数 ===
    pub event_width: u16,
    pub event_height: u16,

    // === 其他 ===
    pub rotate_workers: usize,        // 图像旋转线程数 (0 = CPU核数)
    pub font_path: Option<PathBuf>,   // 渲染模式字体 (无字体则不画文字)
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: DEFAULT_THRESHOLD,
            camera_marker: "cam".to_string(),
            image_extensions: vec!["png".into(), "jpg".into(), "jpeg".into()],
            default_classes: DEFAULT_CLASSES.iter().map(|s| s.to_string()).collect(),

            // ByteTrack
            bytetrack_max_lost_frames: 30,
            bytetrack_high_score_threshold: 0.5,
            bytetrack_low_score_threshold: 0.1,
            bytetrack_high_iou_threshold: 0.3,
            bytetrack_low_iou_threshold: 0.2,

            // 卡尔曼滤波
            kalman_process_noise: 0.1,
            kalman_obs_noise: 0.5,

            event_width: 640,
            event_height: 480,

            rotate_workers: 0,
            font_path: None,
        }
    }
}

impl PipelineConfig {
    /// 从JSON文件加载配置
    ///
    /// 文件不存在时写出默认配置; 解析失败时使用默认值
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ config loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️ failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 {} not found, writing defaults", path.display());
                let config = Self::default();
                config.save(path);
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) {
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    warn!("❌ failed to save config {}: {}", path.display(), e);
                } else {
                    info!("💾 config saved to {}", path.display());
                }
            }
            Err(e) => warn!("❌ failed to serialize config: {}", e),
        }
    }

    pub fn bytetrack_params(&self) -> ByteTrackParams {
        ByteTrackParams {
            max_lost_frames: self.bytetrack_max_lost_frames,
            high_score_threshold: self.bytetrack_high_score_threshold,
            low_score_threshold: self.bytetrack_low_score_threshold,
            high_iou_threshold: self.bytetrack_high_iou_threshold,
            low_iou_threshold: self.bytetrack_low_iou_threshold,
            process_noise: self.kalman_process_noise,
            obs_noise: self.kalman_obs_noise,
        }
    }

    /// 扩展名是否参与跟踪 (忽略大小写)
    pub fn is_image(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                self.image_extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(e))
            })
            .unwrap_or(false)
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️ overlap threshold: {:.1}%", self.overlap_threshold);
        info!("🎛️ camera marker: {:?}", self.camera_marker);
        info!(
            "🎛️ ByteTrack: high {:.2} / low {:.2}, max lost {}",
            self.bytetrack_high_score_threshold,
            self.bytetrack_low_score_threshold,
            self.bytetrack_max_lost_frames
        );
        info!("🎛️ event sensor: {}x{}", self.event_width, self.event_height);
    }
}

//! 检测器 (Detector)
//! 职责: 帧 → 检测框
//!
//! 检测模型本身在流水线之外运行, 其结果以每帧一个 JSON 文件的形式
//! 放在 `detections/<camera>/<image_stem>.json`:
//!
//! ```json
//! [{"bbox": [x1, y1, x2, y2], "class_id": 2, "confidence": 0.91, "track_id": 7}]
//! ```
//!
//! `track_id` 可省略或为 null (外部跟踪器未关联)。

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tracker::{Frame, ObjectTracker};
use super::types::{BBox, Detection, PixelBox, UNTRACKED};
use crate::error::{PipelineError, Result};

/// 单帧检测器 Trait (无跟踪状态)
pub trait FrameDetector {
    fn detect(&mut self, frame: &Frame<'_>) -> Result<Vec<BBox>>;
}

/// 外部检测结果中的一条记录
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SidecarDetection {
    pub bbox: [f32; 4],
    pub class_id: i32,
    pub confidence: f32,
    #[serde(default)]
    pub track_id: Option<i32>,
}

impl SidecarDetection {
    pub fn to_bbox(&self) -> BBox {
        BBox {
            x1: self.bbox[0],
            y1: self.bbox[1],
            x2: self.bbox[2],
            y2: self.bbox[3],
            confidence: self.confidence,
            class_id: self.class_id,
        }
    }
}

/// 读取某一帧的外部检测结果; 文件不存在视为该帧无检测
pub fn read_sidecar(dir: &Path, frame: &Frame<'_>) -> Result<Vec<SidecarDetection>> {
    let path = sidecar_path(dir, frame.path);
    if !path.exists() {
        debug!("no sidecar for frame {} ({})", frame.index, path.display());
        return Ok(Vec::new());
    }
    let json = fs::read_to_string(&path).map_err(|e| PipelineError::io(&path, e))?;
    serde_json::from_str(&json).map_err(|source| PipelineError::Json { path, source })
}

/// `<dir>/<image_stem>.json`
pub fn sidecar_path(dir: &Path, image: &Path) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join(format!("{}.json", stem))
}

/// 从 JSON 文件读取检测框的检测器
pub struct SidecarDetector {
    dir: PathBuf,
}

impl SidecarDetector {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl FrameDetector for SidecarDetector {
    fn detect(&mut self, frame: &Frame<'_>) -> Result<Vec<BBox>> {
        Ok(read_sidecar(&self.dir, frame)?
            .iter()
            .map(SidecarDetection::to_bbox)
            .collect())
    }
}

/// 直接使用外部跟踪器写入的 `track_id`
pub struct SidecarTracker {
    dir: PathBuf,
}

impl SidecarTracker {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ObjectTracker for SidecarTracker {
    fn track(&mut self, frame: &Frame<'_>) -> Result<Vec<Detection>> {
        Ok(read_sidecar(&self.dir, frame)?
            .iter()
            .map(|d| {
                Detection::new(
                    PixelBox::from_bbox(&d.to_bbox()),
                    d.class_id,
                    d.confidence,
                    d.track_id.unwrap_or(UNTRACKED),
                )
            })
            .collect())
    }

    // 状态由外部跟踪器维护
    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;

    #[test]
    fn test_sidecar_tracker_reads_ids() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("000001.json"),
            r#"[{"bbox":[10.7,20.0,30.0,40.9],"class_id":2,"confidence":0.9,"track_id":7},
                {"bbox":[0,0,5,5],"class_id":0,"confidence":0.4}]"#,
        )
        .unwrap();

        let image = DynamicImage::new_rgb8(8, 8);
        let path = PathBuf::from("images/camera1/000001.jpg");
        let frame = Frame {
            index: 0,
            path: &path,
            image: &image,
        };

        let mut tracker = SidecarTracker::new(dir.path());
        let dets = tracker.track(&frame).unwrap();
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].bbox, PixelBox::new(10, 20, 30, 40));
        assert_eq!(dets[0].track_id, 7);
        assert_eq!(dets[1].track_id, UNTRACKED);
    }

    #[test]
    fn test_missing_sidecar_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let image = DynamicImage::new_rgb8(8, 8);
        let path = PathBuf::from("000002.png");
        let frame = Frame {
            index: 1,
            path: &path,
            image: &image,
        };
        let mut detector = SidecarDetector::new(dir.path());
        assert!(detector.detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_sidecar_is_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.json"), "[{").unwrap();
        let image = DynamicImage::new_rgb8(1, 1);
        let path = PathBuf::from("x.jpg");
        let frame = Frame {
            index: 0,
            path: &path,
            image: &image,
        };
        let mut detector = SidecarDetector::new(dir.path());
        assert!(matches!(
            detector.detect(&frame),
            Err(PipelineError::Json { .. })
        ));
    }
}

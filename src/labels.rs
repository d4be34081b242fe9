//! 标注记录与 `.npy` 文件读写
//!
//! 每相机跟踪结果与融合结果使用同一个 8 字段结构化 dtype:
//! `t:i8, x:i4, y:i4, w:i4, h:i4, class_id:i4, class_confidence:f4, track_id:i4`

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use npyz::WriterBuilder;

use crate::detection::Detection;
use crate::error::{PipelineError, Result};

/// 每相机标注文件后缀
pub const CAMERA_LABELS_SUFFIX: &str = "_labels_events.npy";
/// 融合标注文件名
pub const FUSED_LABELS: &str = "labels_events.npy";

/// 标注记录 (一帧中的一个目标)
#[derive(
    Clone, Copy, Debug, PartialEq, npyz::Serialize, npyz::Deserialize, npyz::AutoSerialize,
)]
pub struct TrackRecord {
    pub t: i64,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub class_id: i32,
    pub class_confidence: f32,
    pub track_id: i32,
}

impl TrackRecord {
    /// 检测框 (x1,y1,x2,y2) → 左上角 + 宽高
    pub fn from_detection(t: i64, det: &Detection) -> Self {
        Self {
            t,
            x: det.bbox.x1,
            y: det.bbox.y1,
            w: det.bbox.width(),
            h: det.bbox.height(),
            class_id: det.class_id,
            class_confidence: det.confidence,
            track_id: det.track_id,
        }
    }
}

/// `<labels_dir>/<camera>_labels_events.npy`
pub fn camera_labels_path(labels_dir: &Path, camera: &str) -> PathBuf {
    labels_dir.join(format!("{}{}", camera, CAMERA_LABELS_SUFFIX))
}

/// 从每相机标注文件名解析相机ID; 文件名需包含 `marker`
pub fn camera_from_labels_file(file_name: &str, marker: &str) -> Option<String> {
    if !file_name.contains(marker) {
        return None;
    }
    file_name
        .strip_suffix(CAMERA_LABELS_SUFFIX)
        .filter(|camera| !camera.is_empty())
        .map(str::to_string)
}

/// 写出结构化数组 (空数组也会写出文件)
pub fn write_records(path: &Path, records: &[TrackRecord]) -> Result<()> {
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut writer = npyz::WriteOptions::new()
        .default_dtype()
        .shape(&[records.len() as u64])
        .writer(BufWriter::new(file))
        .begin_nd()
        .map_err(|e| PipelineError::npy(path, e))?;
    for record in records {
        writer.push(record).map_err(|e| PipelineError::npy(path, e))?;
    }
    writer.finish().map_err(|e| PipelineError::npy(path, e))?;
    Ok(())
}

pub fn read_records(path: &Path) -> Result<Vec<TrackRecord>> {
    let bytes = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    let npy = npyz::NpyFile::new(&bytes[..]).map_err(|e| PipelineError::npy(path, e))?;
    npy.into_vec::<TrackRecord>()
        .map_err(|e| PipelineError::npy(path, e))
}

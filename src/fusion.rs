//! 多相机标注融合 (Multi-Camera Label Fuser)
//!
//! 把 `labels/` 下各相机的跟踪结果经单应矩阵投影到参考平面,
//! 按相机名顺序拼接后写出 `labels/labels_events.npy`。
//! 输出顺序为 (相机, 文件内顺序), 不按时间排序。

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::labels::{camera_from_labels_file, read_records, write_records, TrackRecord, FUSED_LABELS};
use crate::track::LABELS_DIR;
use crate::utils::{project_box, Homography, HomographyConfig};

/// 融合记录与跟踪记录字段相同, 只是坐标位于参考平面
pub type FusedLabelRecord = TrackRecord;

/// 投影单条记录; 非有限结果返回 `InvalidProjection`
pub fn project_record(h: &Homography, record: &TrackRecord) -> Result<FusedLabelRecord> {
    let (x, y, w, hh) = project_box(h, (record.x, record.y, record.w, record.h))?;
    Ok(FusedLabelRecord {
        x,
        y,
        w,
        h: hh,
        ..*record
    })
}

/// 列出每相机标注文件 (按文件名排序)
pub fn list_track_files(labels_dir: &Path, marker: &str) -> Result<Vec<(String, PathBuf)>> {
    let entries = fs::read_dir(labels_dir).map_err(|e| PipelineError::io(labels_dir, e))?;
    // 相机ID = 文件名去掉固定后缀, 按相机ID排序即按文件名排序
    let mut files: Vec<(String, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            camera_from_labels_file(&name, marker).map(|camera| (camera, e.path()))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// 融合一个序列的所有相机标注 (不写文件)
pub fn fuse(
    sequence_dir: &Path,
    homographies: &HomographyConfig,
    marker: &str,
) -> Result<Vec<FusedLabelRecord>> {
    let labels_dir = sequence_dir.join(LABELS_DIR);
    if !labels_dir.is_dir() {
        return Err(PipelineError::LabelsDirMissing(labels_dir));
    }

    let files = list_track_files(&labels_dir, marker)?;
    if files.is_empty() {
        return Err(PipelineError::NoTrackFiles(labels_dir));
    }

    let mut fused = Vec::new();
    for (camera, path) in &files {
        let h = match homographies.get(camera) {
            Ok(h) => h,
            Err(e) => {
                warn!("⚠️ {}, skipping {}", e, path.display());
                continue;
            }
        };

        let records = match read_records(path) {
            Ok(records) => records,
            Err(e) => {
                warn!("⚠️ [{}] unreadable, skipping: {}", camera, e);
                continue;
            }
        };
        if records.is_empty() {
            warn!("⚠️ {} has no records, skipping", path.display());
            continue;
        }

        let mut invalid = 0usize;
        for record in &records {
            match project_record(h, record) {
                Ok(projected) => fused.push(projected),
                Err(e) => {
                    debug!("[{}] dropped record t={} track={}: {}", camera, record.t, record.track_id, e);
                    invalid += 1;
                }
            }
        }
        if invalid > 0 {
            warn!("⚠️ [{}] dropped {} records with invalid projection", camera, invalid);
        }
        info!("🎯 [{}] fused {} of {} records", camera, records.len() - invalid, records.len());
    }

    if fused.is_empty() {
        return Err(PipelineError::NoFusedRecords(sequence_dir.to_path_buf()));
    }
    Ok(fused)
}

/// 融合并写出 `labels/labels_events.npy`; 结果为空时不写任何文件
pub fn fuse_and_save(
    sequence_dir: &Path,
    homographies: &HomographyConfig,
    marker: &str,
) -> Result<PathBuf> {
    let fused = fuse(sequence_dir, homographies, marker)?;
    let output = sequence_dir.join(LABELS_DIR).join(FUSED_LABELS);
    write_records(&output, &fused)?;
    info!("💾 saved fused labels to {} ({} records)", output.display(), fused.len());
    Ok(output)
}

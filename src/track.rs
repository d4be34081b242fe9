//! 每相机跟踪适配器 (Per-Camera Tracker Adapter)
//!
//! 序列目录结构:
//! ```text
//! <sequence>/image_offsets.txt
//! <sequence>/images/<camera>/*.{png,jpg,jpeg}
//! <sequence>/labels/<camera>_labels_events.npy   (输出)
//! ```
//! 每个相机独立创建跟踪器, 帧按文件名顺序逐帧处理。

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::classes::ClassPolicy;
use crate::config::PipelineConfig;
use crate::detection::{Detection, Frame, ObjectTracker};
use crate::error::{PipelineError, Result};
use crate::exclusion::{load_exclusion_regions, should_exclude, ExclusionRegion};
use crate::labels::{camera_labels_path, write_records, TrackRecord};
use crate::offsets::{OffsetTable, OFFSETS_FILE};
use crate::render::{Overlay, ReviewAction, ReviewSink};

pub const IMAGES_DIR: &str = "images";
pub const LABELS_DIR: &str = "labels";

/// 单帧检测过滤: 类别 → 排除区域
pub struct FrameFilter<'a> {
    pub policy: &'a ClassPolicy,
    pub regions: &'a [ExclusionRegion],
    pub threshold_percent: f64,
}

impl FrameFilter<'_> {
    pub fn accept(&self, det: &Detection) -> bool {
        if !self.policy.allows(det.class_id) {
            return false;
        }
        !should_exclude(&det.bbox, self.regions, self.threshold_percent)
    }
}

/// 渲染复核 (可选)
pub struct Review<'a> {
    pub overlay: &'a Overlay,
    pub sink: &'a mut dyn ReviewSink,
}

/// 单相机处理结果
#[derive(Debug, Clone, PartialEq)]
pub struct CameraSummary {
    pub camera: String,
    pub frames: usize,
    pub skipped_frames: usize,
    pub records: usize,
    pub output: PathBuf,
}

/// 整个序列的跟踪结果
#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    /// 所有相机处理完毕
    Completed(Vec<CameraSummary>),
    /// 复核端终止; 已完成的相机文件保持不变
    Interrupted(Vec<CameraSummary>),
}

impl TrackOutcome {
    pub fn cameras(&self) -> &[CameraSummary] {
        match self {
            Self::Completed(c) | Self::Interrupted(c) => c,
        }
    }
}

/// 列出相机下的图像 (按文件名排序)
pub fn list_images(camera_dir: &Path, config: &PipelineConfig) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(camera_dir).map_err(|e| PipelineError::io(camera_dir, e))?;
    let mut images: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && config.is_image(p))
        .collect();
    images.sort();
    Ok(images)
}

/// 列出名称包含 `marker` 的子目录 (按名称排序)
pub fn list_camera_dirs(dir: &Path, marker: &str) -> Result<Vec<(String, PathBuf)>> {
    let entries = fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;
    let mut cameras: Vec<(String, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.contains(marker).then(|| (name, e.path()))
        })
        .collect();
    cameras.sort();
    Ok(cameras)
}

/// 跟踪单个相机
///
/// 返回 `None` 表示复核端要求终止 (此时不写任何文件)
pub fn track_camera<T: ObjectTracker + ?Sized>(
    camera: &str,
    images: &[PathBuf],
    offsets: &OffsetTable,
    tracker: &mut T,
    filter: &FrameFilter<'_>,
    mut review: Option<&mut Review<'_>>,
) -> Result<Option<(Vec<TrackRecord>, usize)>> {
    let mut records = Vec::new();
    let mut skipped = 0;

    for (index, path) in images.iter().enumerate() {
        let image = match image::open(path) {
            Ok(image) => image,
            Err(e) => {
                warn!("⚠️ [{}] failed to load {}: {}", camera, path.display(), e);
                skipped += 1;
                continue;
            }
        };

        let frame = Frame {
            index,
            path,
            image: &image,
        };
        let detections = tracker.track(&frame)?;
        let timestamp = offsets.timestamp(index);

        let accepted: Vec<Detection> = detections
            .into_iter()
            .filter(|det| filter.accept(det))
            .collect();
        records.extend(accepted.iter().map(|det| TrackRecord::from_detection(timestamp, det)));

        if let Some(review) = review.as_deref_mut() {
            let labels: Vec<String> = accepted
                .iter()
                .map(|d| format!("{} {}", filter.policy.class_name(d.class_id), d.track_id))
                .collect();
            let canvas = review
                .overlay
                .draw(&image, filter.regions, &accepted, &labels);
            if review.sink.review(camera, index, &canvas)? == ReviewAction::Quit {
                return Ok(None);
            }
        }
    }

    Ok(Some((records, skipped)))
}

/// 跟踪整个序列
///
/// - `regions_dir`: 排除区域文件所在目录 (通常为序列的上一级目录)
/// - `make_tracker`: 为每个相机新建跟踪器 (相机名, 相机图像目录)
///
/// 时间戳表与相机目录缺失时整个序列失败; 单个相机的列表、跟踪器或逐帧
/// 跟踪错误只跳过该相机 (不写该相机的文件)。
pub fn track_sequence<T, F>(
    sequence_dir: &Path,
    regions_dir: &Path,
    config: &PipelineConfig,
    policy: &ClassPolicy,
    mut make_tracker: F,
    mut review: Option<Review<'_>>,
) -> Result<TrackOutcome>
where
    T: ObjectTracker,
    F: FnMut(&str, &Path) -> Result<T>,
{
    let images_dir = sequence_dir.join(IMAGES_DIR);
    let labels_dir = sequence_dir.join(LABELS_DIR);
    fs::create_dir_all(&labels_dir).map_err(|e| PipelineError::io(&labels_dir, e))?;

    let regions = load_exclusion_regions(regions_dir);
    info!("✅ loaded {} exclusion regions: {:?}", regions.len(), regions);

    // 时间戳表缺失时整个序列无法分配时间, 直接终止
    let offsets = OffsetTable::load(&sequence_dir.join(OFFSETS_FILE))?;

    if !images_dir.is_dir() {
        return Err(PipelineError::NoCameraDirs(images_dir));
    }
    let cameras = list_camera_dirs(&images_dir, &config.camera_marker)?;
    if cameras.is_empty() {
        return Err(PipelineError::NoCameraDirs(images_dir));
    }

    let filter = FrameFilter {
        policy,
        regions: &regions,
        threshold_percent: config.overlap_threshold,
    };

    let mut summaries = Vec::new();
    for (camera, camera_dir) in &cameras {
        // 单个相机出错时跳过该相机, 其余相机继续
        let images = match list_images(camera_dir, config) {
            Ok(images) => images,
            Err(e) => {
                warn!("⚠️ [{}] skipping camera: {}", camera, e);
                continue;
            }
        };
        if images.is_empty() {
            warn!("⚠️ no image files found in {}, skipping", camera_dir.display());
            continue;
        }
        if images.len() > offsets.len() {
            warn!(
                "⚠️ [{}] {} images but only {} timestamps, extra frames get t = -1",
                camera,
                images.len(),
                offsets.len()
            );
        }

        info!("📷 processing {} ({} frames)", camera, images.len());
        let mut tracker = match make_tracker(camera, camera_dir) {
            Ok(tracker) => tracker,
            Err(e) => {
                warn!("⚠️ [{}] skipping camera, tracker unavailable: {}", camera, e);
                continue;
            }
        };
        tracker.reset();

        let result = match track_camera(
            camera,
            &images,
            &offsets,
            &mut tracker,
            &filter,
            review.as_mut(),
        ) {
            Ok(result) => result,
            Err(e) => {
                warn!("⚠️ [{}] skipping camera, no file written: {}", camera, e);
                continue;
            }
        };

        let Some((records, skipped)) = result else {
            if let Some(review) = review.as_mut() {
                review.sink.close();
            }
            warn!("🛑 [{}] interrupted, no file written for this camera", camera);
            return Ok(TrackOutcome::Interrupted(summaries));
        };

        let output = camera_labels_path(&labels_dir, camera);
        write_records(&output, &records)?;
        info!("💾 saved {} ({} records)", output.display(), records.len());

        summaries.push(CameraSummary {
            camera: camera.clone(),
            frames: images.len(),
            skipped_frames: skipped,
            records: records.len(),
            output,
        });
    }

    if let Some(review) = review.as_mut() {
        review.sink.close();
    }
    Ok(TrackOutcome::Completed(summaries))
}

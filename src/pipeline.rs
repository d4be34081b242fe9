//! 批处理编排 (Batch orchestration)
//!
//! - `annotate`: 每个序列 跟踪 → 融合
//! - `prepare`: 每个序列 事件转换 (可选翻转) → 图像旋转

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use tracing::{error, info, warn};

use crate::classes::{ClassPolicy, CLASSES_YAML};
use crate::config::PipelineConfig;
use crate::detection::{ByteTrackTracker, ObjectTracker, SidecarDetector, SidecarTracker};
use crate::error::PipelineError;
use crate::events;
use crate::fusion::fuse_and_save;
use crate::rotate::{list_sequences, rotate_sequence};
use crate::track::{track_sequence, Review, TrackOutcome, IMAGES_DIR};
use crate::utils::{HomographyConfig, HOMOGRAPHY_YAML};

/// 外部检测结果目录: `<sequence>/detections/<camera>/<image_stem>.json`
pub const DETECTIONS_DIR: &str = "detections";

/// 跟踪器实现
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TrackerKind {
    /// 读取检测框, 用 ByteTrack 分配跟踪ID
    #[default]
    Bytetrack,
    /// 直接使用检测文件中的跟踪ID
    Sidecar,
}

/// 为一个相机新建跟踪器
pub fn make_tracker(
    kind: TrackerKind,
    config: &PipelineConfig,
    sequence_dir: &Path,
    camera: &str,
) -> Box<dyn ObjectTracker> {
    let dir = sequence_dir.join(DETECTIONS_DIR).join(camera);
    match kind {
        TrackerKind::Bytetrack => Box::new(ByteTrackTracker::new(
            SidecarDetector::new(dir),
            config.bytetrack_params(),
        )),
        TrackerKind::Sidecar => Box::new(SidecarTracker::new(dir)),
    }
}

/// 类别策略: 指定了类别配置文件则按ID过滤, 否则按默认类名过滤
pub fn class_policy(config: &PipelineConfig, classes: Option<&Path>) -> Result<ClassPolicy> {
    match classes {
        Some(path) => ClassPolicy::from_config(path)
            .with_context(|| format!("loading class config {}", path.display())),
        None => Ok(ClassPolicy::from_names(&config.default_classes)),
    }
}

/// 跟踪一个序列 (排除区域从序列的上级目录加载)
pub fn run_track(
    sequence_dir: &Path,
    config: &PipelineConfig,
    policy: &ClassPolicy,
    kind: TrackerKind,
    review: Option<Review<'_>>,
) -> Result<TrackOutcome> {
    let regions_dir = sequence_dir.parent().unwrap_or(sequence_dir);
    let outcome = track_sequence(
        sequence_dir,
        regions_dir,
        config,
        policy,
        |camera, _| Ok(make_tracker(kind, config, sequence_dir, camera)),
        review,
    )
    .with_context(|| format!("tracking {}", sequence_dir.display()))?;
    Ok(outcome)
}

/// 批处理结果
///
/// 终止错误与必需输入格式错误记入 `failed`, 使命令非零退出;
/// 其余失败 (如缺少事件文件) 记入 `skipped`, 只报告不中断。
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<PathBuf>,
    pub skipped: Vec<(PathBuf, String)>,
    pub failed: Vec<(PathBuf, String)>,
}

/// 错误链中是否含有致命的流水线错误
fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<PipelineError>())
        .any(PipelineError::is_fatal)
}

impl BatchReport {
    fn record(&mut self, sequence: &Path, result: Result<()>) {
        match result {
            Ok(()) => self.succeeded.push(sequence.to_path_buf()),
            Err(e) if is_fatal(&e) => {
                error!("❌ {}: {:#}", sequence.display(), e);
                self.failed.push((sequence.to_path_buf(), format!("{:#}", e)));
            }
            Err(e) => {
                warn!("⚠️ skipping {}: {:#}", sequence.display(), e);
                self.skipped.push((sequence.to_path_buf(), format!("{:#}", e)));
            }
        }
    }

    fn finish(self, what: &str) -> Result<Self> {
        info!(
            "✅ {}: {} sequences done, {} skipped, {} failed",
            what,
            self.succeeded.len(),
            self.skipped.len(),
            self.failed.len()
        );
        if !self.failed.is_empty() {
            bail!("{} failed for {} sequence(s)", what, self.failed.len());
        }
        Ok(self)
    }
}

/// 含 `images/` 子目录的序列
fn image_sequences(root: &Path) -> Result<Vec<PathBuf>> {
    let sequences = list_sequences(root)?
        .into_iter()
        .filter(|seq| seq.join(IMAGES_DIR).is_dir())
        .collect();
    Ok(sequences)
}

/// 对根目录下每个序列执行 跟踪 → 融合
///
/// 单应矩阵与类别配置位于根目录; 出现致命错误的序列使整体返回错误。
pub fn annotate(root: &Path, config: &PipelineConfig, kind: TrackerKind) -> Result<BatchReport> {
    let homography_path = root.join(HOMOGRAPHY_YAML);
    let homographies = HomographyConfig::load(&homography_path)
        .with_context(|| format!("loading {}", homography_path.display()))?;

    let classes = root.join(CLASSES_YAML);
    let policy = class_policy(config, classes.exists().then_some(classes.as_path()))?;

    let mut report = BatchReport::default();
    for sequence in image_sequences(root)? {
        info!("📂 annotating {}", sequence.display());
        let result = run_track(&sequence, config, &policy, kind, None).and_then(|_| {
            fuse_and_save(&sequence, &homographies, &config.camera_marker)?;
            Ok(())
        });
        report.record(&sequence, result);
    }
    report.finish("annotate")
}

/// 对根目录下每个序列转换事件; 翻转时同时旋转该序列的图像
pub fn prepare(root: &Path, config: &PipelineConfig, flip: bool) -> Result<BatchReport> {
    let mut report = BatchReport::default();
    for sequence in list_sequences(root)? {
        if !sequence.join(events::EVENTS_DIR).is_dir() {
            continue;
        }
        info!("📂 preparing {}", sequence.display());
        let result = events::convert(
            &sequence,
            config.event_width,
            config.event_height,
            flip,
            None,
        )
        .map_err(anyhow::Error::from)
        .and_then(|_| {
            if flip && sequence.join(IMAGES_DIR).is_dir() {
                rotate_sequence(&sequence, &config.camera_marker, config.rotate_workers)?;
            }
            Ok(())
        });
        report.record(&sequence, result);
    }
    report.finish("prepare")
}

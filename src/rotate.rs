//! 图像 180 度旋转 (原地覆盖, JPEG 重编码)
//!
//! 单线程投递 → 有界通道 → N 个工作线程; 全部完成后返回。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::bounded;
use image::ImageFormat;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::track::{list_camera_dirs, IMAGES_DIR};

const QUEUE_DEPTH: usize = 64;

/// 旋转统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotateStats {
    pub rotated: usize,
    pub failed: usize,
}

impl std::ops::AddAssign for RotateStats {
    fn add_assign(&mut self, rhs: Self) {
        self.rotated += rhs.rotated;
        self.failed += rhs.failed;
    }
}

/// 0 表示使用 CPU 核数
pub fn worker_count(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jpg"))
}

/// 旋转单张图像并覆盖保存
pub fn rotate_image(path: &Path) -> Result<()> {
    let img = image::open(path).map_err(|source| PipelineError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    let rotated = image::imageops::rotate180(&img.to_rgb8());
    rotated
        .save_with_format(path, ImageFormat::Jpeg)
        .map_err(|source| PipelineError::Image {
            path: path.to_path_buf(),
            source,
        })
}

/// 旋转目录下全部 `.jpg` (不区分大小写); 单张失败只记录不中断
pub fn rotate_camera_dir(dir: &Path, workers: usize) -> Result<RotateStats> {
    let entries = fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;
    let mut images: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_jpeg(p))
        .collect();
    images.sort();

    if images.is_empty() {
        warn!("⚠️ no .jpg files in {}", dir.display());
        return Ok(RotateStats::default());
    }

    let workers = worker_count(workers).min(images.len());
    let rotated = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let (tx, rx) = bounded::<PathBuf>(QUEUE_DEPTH);

    std::thread::scope(|s| {
        for _ in 0..workers {
            let rx = rx.clone();
            let (rotated, failed) = (&rotated, &failed);
            s.spawn(move || {
                for path in rx.iter() {
                    match rotate_image(&path) {
                        Ok(()) => {
                            debug!("processed: {}", path.display());
                            rotated.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            warn!("❌ {}", e);
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }

        for path in images {
            // 接收端只在所有工作线程退出后关闭
            if tx.send(path).is_err() {
                break;
            }
        }
        drop(tx);
    });

    let stats = RotateStats {
        rotated: rotated.into_inner(),
        failed: failed.into_inner(),
    };
    info!(
        "🔄 {}: rotated {} images ({} failed)",
        dir.display(),
        stats.rotated,
        stats.failed
    );
    Ok(stats)
}

/// 旋转一个序列 `images/` 下所有相机目录
pub fn rotate_sequence(sequence_dir: &Path, marker: &str, workers: usize) -> Result<RotateStats> {
    let images_dir = sequence_dir.join(IMAGES_DIR);
    if !images_dir.is_dir() {
        return Err(PipelineError::NoCameraDirs(images_dir));
    }
    let mut stats = RotateStats::default();
    for (_, camera_dir) in list_camera_dirs(&images_dir, marker)? {
        stats += rotate_camera_dir(&camera_dir, workers)?;
    }
    Ok(stats)
}

/// 旋转根目录下每个序列; 缺少 `images/` 的序列跳过
pub fn rotate_sequences(root: &Path, marker: &str, workers: usize) -> Result<RotateStats> {
    let mut stats = RotateStats::default();
    for sequence_dir in list_sequences(root)? {
        match rotate_sequence(&sequence_dir, marker, workers) {
            Ok(s) => stats += s,
            Err(e) => warn!("⚠️ skipping {}: {}", sequence_dir.display(), e),
        }
    }
    Ok(stats)
}

/// 根目录下的序列子目录 (按名称排序)
pub fn list_sequences(root: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(root).map_err(|e| PipelineError::io(root, e))?;
    let mut sequences: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    sequences.sort();
    Ok(sequences)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// 左半白右半黑 (与 8x8 JPEG 块对齐)
    fn half_white(path: &Path) {
        let img = RgbImage::from_fn(16, 8, |x, _| {
            if x < 8 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        img.save_with_format(path, ImageFormat::Jpeg).unwrap();
    }

    #[test]
    fn test_rotate_camera_dir() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            half_white(&dir.path().join(format!("{:03}.jpg", i)));
        }
        half_white(&dir.path().join("upper.JPG"));
        RgbImage::new(4, 4).save(dir.path().join("keep.png")).unwrap();
        fs::write(dir.path().join("broken.jpg"), b"nope").unwrap();

        let stats = rotate_camera_dir(dir.path(), 3).unwrap();
        assert_eq!(stats, RotateStats { rotated: 6, failed: 1 });

        // 白色半边移到右侧
        let img = image::open(dir.path().join("000.jpg")).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (16, 8));
        assert!(img.get_pixel(15, 7)[0] > 128);
        assert!(img.get_pixel(0, 0)[0] < 128);
    }

    #[test]
    fn test_rotate_sequences() {
        let root = tempfile::tempdir().unwrap();
        for seq in ["seq_a", "seq_b"] {
            let dir = root.path().join(seq).join(IMAGES_DIR).join("camera1");
            fs::create_dir_all(&dir).unwrap();
            half_white(&dir.join("0.jpg"));
        }
        // 非相机目录不处理
        let other = root.path().join("seq_a").join(IMAGES_DIR).join("thumbs");
        fs::create_dir_all(&other).unwrap();
        half_white(&other.join("0.jpg"));
        // 没有 images/ 的序列被跳过
        fs::create_dir_all(root.path().join("notes")).unwrap();

        let stats = rotate_sequences(root.path(), "cam", 0).unwrap();
        assert_eq!(stats.rotated, 2);
        let thumb = image::open(other.join("0.jpg")).unwrap().to_rgb8();
        assert!(thumb.get_pixel(0, 0)[0] > 128);
    }

    #[test]
    fn test_worker_count() {
        assert_eq!(worker_count(3), 3);
        assert!(worker_count(0) >= 1);
    }
}

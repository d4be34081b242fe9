//! 渲染与人工复核 (Render & Review)
//!
//! 在帧上绘制排除区域 (红) 与保留的检测框 (按跟踪ID着色),
//! 交给复核端展示; 复核端可以随时终止整个运行。

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use ab_glyph::FontArc;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::info;

use crate::detection::tracker::id_to_color;
use crate::detection::Detection;
use crate::error::{PipelineError, Result};
use crate::exclusion::ExclusionRegion;

const REGION_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_SCALE: f32 = 16.0;

/// 复核端的决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Continue,
    Quit,
}

/// 复核端 Trait: 每帧调用一次
pub trait ReviewSink {
    fn review(&mut self, camera: &str, index: usize, canvas: &RgbImage) -> Result<ReviewAction>;

    /// 关闭展示 (终止或正常结束时调用)
    fn close(&mut self) {}
}

/// 叠加层绘制器
pub struct Overlay {
    font: Option<FontArc>,
}

impl Overlay {
    /// 无字体时只画框不画文字
    pub fn new(font_path: Option<&Path>) -> Result<Self> {
        let font = match font_path {
            Some(path) => {
                let bytes = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
                let font = FontArc::try_from_vec(bytes).map_err(|e| PipelineError::Config {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
                Some(font)
            }
            None => None,
        };
        Ok(Self { font })
    }

    /// 绘制一帧; `labels` 与 `detections` 一一对应
    pub fn draw(
        &self,
        frame: &DynamicImage,
        regions: &[ExclusionRegion],
        detections: &[Detection],
        labels: &[String],
    ) -> RgbImage {
        let mut canvas = frame.to_rgb8();

        for region in regions {
            draw_hollow_rect_mut(&mut canvas, region.to_rect(), REGION_COLOR);
        }

        for (det, label) in detections.iter().zip(labels) {
            let (r, g, b) = id_to_color(det.track_id);
            let color = Rgb([r, g, b]);
            let rect = Rect::at(det.bbox.x1, det.bbox.y1)
                .of_size(det.bbox.width().max(1) as u32, det.bbox.height().max(1) as u32);
            draw_hollow_rect_mut(&mut canvas, rect, color);

            if let Some(font) = &self.font {
                let y = det.bbox.y1 - LABEL_SCALE as i32 - 2;
                draw_text_mut(&mut canvas, color, det.bbox.x1, y, LABEL_SCALE, font, label);
            }
        }

        canvas
    }
}

/// 把渲染帧写入目录, 从不终止
pub struct DirectoryReview {
    dir: PathBuf,
}

impl DirectoryReview {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn save_frame(dir: &Path, camera: &str, index: usize, canvas: &RgbImage) -> Result<PathBuf> {
    let camera_dir = dir.join(camera);
    fs::create_dir_all(&camera_dir).map_err(|e| PipelineError::io(&camera_dir, e))?;
    let path = camera_dir.join(format!("{:06}.jpg", index));
    canvas.save(&path).map_err(|source| PipelineError::Image {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

impl ReviewSink for DirectoryReview {
    fn review(&mut self, camera: &str, index: usize, canvas: &RgbImage) -> Result<ReviewAction> {
        save_frame(&self.dir, camera, index, canvas)?;
        Ok(ReviewAction::Continue)
    }
}

/// 终端逐帧复核: 回车继续, 输入 `q` 终止
pub struct ConsoleReview<R> {
    dir: PathBuf,
    input: R,
}

impl<R: BufRead> ConsoleReview<R> {
    pub fn new(dir: impl Into<PathBuf>, input: R) -> Self {
        Self {
            dir: dir.into(),
            input,
        }
    }
}

impl<R: BufRead> ReviewSink for ConsoleReview<R> {
    fn review(&mut self, camera: &str, index: usize, canvas: &RgbImage) -> Result<ReviewAction> {
        let path = save_frame(&self.dir, camera, index, canvas)?;
        print!("🖼️ {} [Enter = next, q = quit] ", path.display());
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        let n = self
            .input
            .read_line(&mut line)
            .map_err(|e| PipelineError::io(&path, e))?;
        // 输入流结束视为终止
        if n == 0 || line.trim().eq_ignore_ascii_case("q") {
            info!("🛑 process interrupted by user");
            return Ok(ReviewAction::Quit);
        }
        Ok(ReviewAction::Continue)
    }

    fn close(&mut self) {
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::PixelBox;

    #[test]
    fn test_overlay_draws_regions_and_boxes() {
        let overlay = Overlay::new(None).unwrap();
        let frame = DynamicImage::new_rgb8(64, 64);
        let regions = [ExclusionRegion::new(0, 0, 10, 10)];
        let dets = [Detection::new(PixelBox::new(20, 20, 40, 40), 2, 0.9, 3)];
        let canvas = overlay.draw(&frame, &regions, &dets, &["car 3".to_string()]);

        assert_eq!(canvas.get_pixel(0, 0), &REGION_COLOR);
        let (r, g, b) = id_to_color(3);
        assert_eq!(canvas.get_pixel(20, 20), &Rgb([r, g, b]));
        assert_eq!(canvas.get_pixel(30, 30), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_console_review_quit() {
        let dir = tempfile::tempdir().unwrap();
        let input = std::io::Cursor::new(b"\nq\n".to_vec());
        let mut review = ConsoleReview::new(dir.path(), input);
        let canvas = RgbImage::new(4, 4);
        assert_eq!(review.review("camera1", 0, &canvas).unwrap(), ReviewAction::Continue);
        assert_eq!(review.review("camera1", 1, &canvas).unwrap(), ReviewAction::Quit);
        assert!(dir.path().join("camera1").join("000001.jpg").exists());
    }

    #[test]
    fn test_missing_font_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Overlay::new(Some(&dir.path().join("none.ttf"))).is_err());
    }
}

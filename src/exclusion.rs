//! 排除区域 (Exclusion Zones)
//!
//! 静态矩形区域, 与之重叠超过阈值的检测框被丢弃。
//! 区域文件放在序列目录的上一级, 文本格式优先于 YAML:
//! - `exclusion_regions.txt`:  每行 `x_min,y_min,x_max,y_max`
//! - `exclusion_regions.yaml`: `exclusion_regions: [[x_min, y_min, x_max, y_max], ...]`

use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::PixelBox;
use crate::error::{PipelineError, Result};

pub const REGIONS_TXT: &str = "exclusion_regions.txt";
pub const REGIONS_YAML: &str = "exclusion_regions.yaml";

/// 默认重叠阈值 (百分比)
pub const DEFAULT_THRESHOLD: f64 = 30.0;

/// 排除区域 (相机像素坐标)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct ExclusionRegion {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

impl ExclusionRegion {
    pub fn new(x_min: i32, y_min: i32, x_max: i32, y_max: i32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// 由任意两个对角点构造 (自动排序)
    pub fn from_corners(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    /// 与检测框的交集面积
    pub fn intersection_area(&self, bbox: &PixelBox) -> i64 {
        let ix1 = bbox.x1.max(self.x_min) as i64;
        let iy1 = bbox.y1.max(self.y_min) as i64;
        let ix2 = bbox.x2.min(self.x_max) as i64;
        let iy2 = bbox.y2.min(self.y_max) as i64;
        (ix2 - ix1).max(0) * (iy2 - iy1).max(0)
    }

    /// imageproc 矩形 (宽高至少1像素)
    pub fn to_rect(&self) -> Rect {
        Rect::at(self.x_min, self.y_min).of_size(
            (self.x_max - self.x_min).max(1) as u32,
            (self.y_max - self.y_min).max(1) as u32,
        )
    }
}

impl From<[i32; 4]> for ExclusionRegion {
    fn from(v: [i32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<ExclusionRegion> for [i32; 4] {
    fn from(r: ExclusionRegion) -> Self {
        [r.x_min, r.y_min, r.x_max, r.y_max]
    }
}

/// 检测框是否应被排除
///
/// 宽或高 ≤ 0 的框 (退化或反向) 永不排除; 任一区域覆盖框面积的比例
/// (百分比) 达到 `threshold_percent` 即排除。
pub fn should_exclude(bbox: &PixelBox, regions: &[ExclusionRegion], threshold_percent: f64) -> bool {
    if bbox.width() <= 0 || bbox.height() <= 0 {
        return false;
    }
    let bbox_area = bbox.area();

    regions.iter().any(|region| {
        let overlap_ratio = region.intersection_area(bbox) as f64 / bbox_area as f64 * 100.0;
        overlap_ratio >= threshold_percent
    })
}

// ========== 区域文件 ==========

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegionsDoc {
    #[serde(default)]
    exclusion_regions: Vec<ExclusionRegion>,
}

/// 从目录加载排除区域; 文件缺失或损坏时返回空列表 (不过滤)
pub fn load_exclusion_regions(dir: &Path) -> Vec<ExclusionRegion> {
    let txt_path = dir.join(REGIONS_TXT);
    let yaml_path = dir.join(REGIONS_YAML);

    let loaded = if txt_path.exists() {
        read_regions_txt(&txt_path)
    } else if yaml_path.exists() {
        read_regions_yaml(&yaml_path)
    } else {
        return Vec::new();
    };

    match loaded {
        Ok(regions) => regions,
        Err(e) => {
            warn!("⚠️ ignoring exclusion regions: {}", e);
            Vec::new()
        }
    }
}

/// 文本格式: 不是4个整数的行被跳过
pub fn read_regions_txt(path: &Path) -> Result<Vec<ExclusionRegion>> {
    let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    let mut regions = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let values: Vec<&str> = line.split(',').map(str::trim).collect();
        if values.len() != 4 {
            warn!("⚠️ {}:{}: expected 4 values, skipping", path.display(), line_no + 1);
            continue;
        }
        let parsed: std::result::Result<Vec<i32>, _> =
            values.iter().map(|v| v.parse::<i32>()).collect();
        match parsed {
            Ok(v) => regions.push(ExclusionRegion::new(v[0], v[1], v[2], v[3])),
            Err(e) => warn!("⚠️ {}:{}: {}, skipping", path.display(), line_no + 1, e),
        }
    }
    Ok(regions)
}

pub fn read_regions_yaml(path: &Path) -> Result<Vec<ExclusionRegion>> {
    let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    let doc: Option<RegionsDoc> = serde_yaml::from_str(&text).map_err(|source| PipelineError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(doc.unwrap_or_default().exclusion_regions)
}

// ========== 区域绘制会话 ==========

/// 区域文件格式
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum RegionFormat {
    Txt,
    Yaml,
}

/// 交互式区域选择会话
///
/// 持有画布、进行中的拖拽起点与已选区域, 由外部事件循环驱动
pub struct RegionSession {
    original: RgbImage,
    canvas: RgbImage,
    drag_start: Option<(i32, i32)>,
    regions: Vec<ExclusionRegion>,
}

const SESSION_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

impl RegionSession {
    pub fn new(image: RgbImage) -> Self {
        Self {
            canvas: image.clone(),
            original: image,
            drag_start: None,
            regions: Vec::new(),
        }
    }

    /// 鼠标按下: 开始拖拽
    pub fn press(&mut self, x: i32, y: i32) {
        self.drag_start = Some((x, y));
    }

    /// 鼠标移动: 返回带预览矩形的临时画布
    pub fn drag(&self, x: i32, y: i32) -> Option<RgbImage> {
        let (sx, sy) = self.drag_start?;
        let mut preview = self.canvas.clone();
        let region = ExclusionRegion::from_corners(sx, sy, x, y);
        draw_hollow_rect_mut(&mut preview, region.to_rect(), SESSION_COLOR);
        Some(preview)
    }

    /// 鼠标抬起: 完成一个区域
    pub fn release(&mut self, x: i32, y: i32) -> Option<ExclusionRegion> {
        let (sx, sy) = self.drag_start.take()?;
        let region = ExclusionRegion::from_corners(sx, sy, x, y);
        draw_hollow_rect_mut(&mut self.canvas, region.to_rect(), SESSION_COLOR);
        self.regions.push(region);
        Some(region)
    }

    /// 清除所有区域并恢复原图
    pub fn reset(&mut self) {
        self.regions.clear();
        self.drag_start = None;
        self.canvas = self.original.clone();
    }

    pub fn regions(&self) -> &[ExclusionRegion] {
        &self.regions
    }

    pub fn canvas(&self) -> &RgbImage {
        &self.canvas
    }

    /// 保存到 `dir` 下对应格式的文件
    pub fn save(&self, dir: &Path, format: RegionFormat) -> Result<PathBuf> {
        let path = match format {
            RegionFormat::Txt => {
                let path = dir.join(REGIONS_TXT);
                let mut text = String::new();
                for r in &self.regions {
                    text.push_str(&format!("{},{},{},{}\n", r.x_min, r.y_min, r.x_max, r.y_max));
                }
                fs::write(&path, text).map_err(|e| PipelineError::io(&path, e))?;
                path
            }
            RegionFormat::Yaml => {
                let path = dir.join(REGIONS_YAML);
                let doc = RegionsDoc {
                    exclusion_regions: self.regions.clone(),
                };
                let text = serde_yaml::to_string(&doc).map_err(|source| PipelineError::Yaml {
                    path: path.clone(),
                    source,
                })?;
                fs::write(&path, text).map_err(|e| PipelineError::io(&path, e))?;
                path
            }
        };
        info!("💾 saved {} regions to {}", self.regions.len(), path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_full_containment_excluded() {
        let regions = [ExclusionRegion::new(0, 0, 100, 100)];
        let bbox = PixelBox::new(10, 10, 60, 60);
        assert_eq!(bbox.area(), 2500);
        assert!(should_exclude(&bbox, &regions, DEFAULT_THRESHOLD));
    }

    #[test]
    fn test_partial_overlap_threshold() {
        let regions = [ExclusionRegion::new(0, 0, 10, 100)];
        // 框 0..40 x 0..10, 与区域重叠 10/40 = 25%
        let bbox = PixelBox::new(0, 0, 40, 10);
        assert!(!should_exclude(&bbox, &regions, 30.0));
        assert!(should_exclude(&bbox, &regions, 25.0));
    }

    #[test]
    fn test_any_region_matches() {
        let regions = [
            ExclusionRegion::new(500, 500, 600, 600),
            ExclusionRegion::new(0, 0, 100, 100),
        ];
        assert!(should_exclude(&PixelBox::new(10, 10, 20, 20), &regions, 30.0));
    }

    #[test]
    fn test_degenerate_box_never_excluded() {
        let regions = [ExclusionRegion::new(0, 0, 100, 100)];
        assert!(!should_exclude(&PixelBox::new(10, 10, 10, 50), &regions, 0.0));
        // 反向框面积为正 (负×负), 也不能排除
        assert!(!should_exclude(&PixelBox::new(50, 50, 10, 10), &regions, 0.0));
        assert!(!should_exclude(&PixelBox::new(50, 10, 10, 50), &regions, 0.0));
    }

    #[test]
    fn test_txt_takes_precedence_over_yaml() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(REGIONS_TXT), "1,2,3,4\nbad line\n5, 6, 7, 8\n").unwrap();
        fs::write(
            dir.path().join(REGIONS_YAML),
            "exclusion_regions:\n  - [9, 9, 9, 9]\n",
        )
        .unwrap();
        let regions = load_exclusion_regions(dir.path());
        assert_eq!(
            regions,
            vec![ExclusionRegion::new(1, 2, 3, 4), ExclusionRegion::new(5, 6, 7, 8)]
        );
    }

    #[test]
    fn test_yaml_regions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(REGIONS_YAML),
            "exclusion_regions:\n  - [0, 0, 100, 50]\n  - [200, 200, 300, 300]\n",
        )
        .unwrap();
        let regions = load_exclusion_regions(dir.path());
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0], ExclusionRegion::new(0, 0, 100, 50));
    }

    #[test]
    fn test_missing_or_broken_files_mean_no_regions() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_exclusion_regions(dir.path()).is_empty());

        fs::write(dir.path().join(REGIONS_YAML), "exclusion_regions: [[1, 2]").unwrap();
        assert!(load_exclusion_regions(dir.path()).is_empty());
    }

    #[test]
    fn test_session_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = RegionSession::new(RgbImage::new(64, 64));
        session.press(40, 30);
        assert!(session.drag(10, 10).is_some());
        // 反向拖拽也得到规范化的区域
        assert_eq!(session.release(10, 5), Some(ExclusionRegion::new(10, 5, 40, 30)));
        assert_eq!(session.release(0, 0), None);

        session.save(dir.path(), RegionFormat::Yaml).unwrap();
        assert_eq!(load_exclusion_regions(dir.path()), session.regions());

        session.save(dir.path(), RegionFormat::Txt).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join(REGIONS_TXT)).unwrap(),
            "10,5,40,30\n"
        );

        session.reset();
        assert!(session.regions().is_empty());
        assert_eq!(session.canvas(), &RgbImage::new(64, 64));
    }

    proptest! {
        #[test]
        fn prop_empty_regions_never_exclude(
            x1 in -1000i32..1000, y1 in -1000i32..1000,
            w in -50i32..500, h in -50i32..500,
            t in 0.0f64..100.0,
        ) {
            let bbox = PixelBox::new(x1, y1, x1 + w, y1 + h);
            prop_assert!(!should_exclude(&bbox, &[], t));
        }

        #[test]
        fn prop_containing_region_excludes(
            x1 in -1000i32..1000, y1 in -1000i32..1000,
            w in 1i32..500, h in 1i32..500,
            margin in 0i32..100,
            t in 0.0f64..=100.0,
        ) {
            let bbox = PixelBox::new(x1, y1, x1 + w, y1 + h);
            let region = ExclusionRegion::new(x1 - margin, y1 - margin, x1 + w + margin, y1 + h + margin);
            prop_assert!(should_exclude(&bbox, &[region], t));
        }

        #[test]
        fn prop_degenerate_never_excluded(
            x1 in -1000i32..1000, y1 in -1000i32..1000,
            w in -500i32..=0, h in -500i32..500,
        ) {
            let bbox = PixelBox::new(x1, y1, x1 + w, y1 + h);
            let region = ExclusionRegion::new(-5000, -5000, 5000, 5000);
            prop_assert!(!should_exclude(&bbox, &[region], 0.0));
        }
    }
}

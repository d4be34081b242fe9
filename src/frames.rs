//! 事件帧渲染 (Event Frame Renderer)
//!
//! 按 `image_offsets.txt` 把标准事件容器切成时间窗, 每个窗渲染一帧:
//! 第 i 帧覆盖 `[t_{i-1}, t_i)`, 第 0 帧从 0 开始。
//! 灰色底图上 p=1 画黑点, p=0 画白点, 坐标截断到画面内。
//! 输出 `<sequence>/images/events/frame_<i:016>.jpg`。

use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use ndarray::Array1;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::events::{read_events, EventColumns, EVENTS_DIR, OUTPUT_FILE};
use crate::offsets::{OffsetTable, OFFSETS_FILE};
use crate::track::IMAGES_DIR;

/// 帧输出目录 (位于 `images/` 下; 名称不含相机标记, 不会被当作相机)
pub const FRAMES_DIR: &str = "events";

const BACKGROUND: Rgb<u8> = Rgb([127, 127, 127]);
const POSITIVE: Rgb<u8> = Rgb([0, 0, 0]);
const NEGATIVE: Rgb<u8> = Rgb([255, 255, 255]);

/// 第 `index` 个时间窗的 `[start, end)`
pub fn window_bounds(triggers: &[i64], index: usize) -> (i64, i64) {
    let start = if index == 0 { 0 } else { triggers[index - 1] };
    (start, triggers[index])
}

fn event_time(t: u64) -> i64 {
    i64::try_from(t).unwrap_or(i64::MAX)
}

/// 把事件分配到时间窗, 返回每个窗内的事件下标 (保持文件顺序)
///
/// 时间戳非递增时逐窗扫描, 同一事件可能落入多个窗。
pub fn bucket_events(t: &Array1<u64>, triggers: &[i64]) -> Vec<Vec<usize>> {
    let mut buckets = vec![Vec::new(); triggers.len()];

    if triggers.windows(2).all(|w| w[0] <= w[1]) {
        for (i, &ts) in t.iter().enumerate() {
            let ts = event_time(ts);
            // 第一个 end > ts 的窗; 恰好等于 t_i 的事件进入下一窗
            let window = triggers.partition_point(|&end| end <= ts);
            if let Some(bucket) = buckets.get_mut(window) {
                bucket.push(i);
            }
        }
    } else {
        warn!("⚠️ trigger timestamps are not ascending, scanning every window");
        for (index, bucket) in buckets.iter_mut().enumerate() {
            let (start, end) = window_bounds(triggers, index);
            bucket.extend(
                t.iter()
                    .enumerate()
                    .filter(|&(_, &ts)| (start..end).contains(&event_time(ts)))
                    .map(|(i, _)| i),
            );
        }
    }
    buckets
}

/// 渲染一个时间窗; 其他极性值不着色, 后出现的事件覆盖先前的
pub fn render_window(columns: &EventColumns, indices: &[usize], width: u32, height: u32) -> RgbImage {
    let mut frame = RgbImage::from_pixel(width, height, BACKGROUND);
    for &i in indices {
        let x = u32::from(columns.x[i]).min(width - 1);
        let y = u32::from(columns.y[i]).min(height - 1);
        match columns.p[i] {
            1 => frame.put_pixel(x, y, POSITIVE),
            0 => frame.put_pixel(x, y, NEGATIVE),
            _ => {}
        }
    }
    frame
}

pub fn frame_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("frame_{:016}.jpg", index))
}

/// 渲染一个序列的全部事件帧, 返回写出的帧数
///
/// 读取 `<sequence>/events/events.h5` 与 `<sequence>/image_offsets.txt`;
/// 单帧写出失败只记录警告。
pub fn render_frames(sequence_dir: &Path, width: u16, height: u16) -> Result<usize> {
    if width == 0 || height == 0 {
        return Err(PipelineError::Config {
            path: sequence_dir.to_path_buf(),
            reason: format!("invalid frame size {}x{}", width, height),
        });
    }

    let input = sequence_dir.join(EVENTS_DIR).join(OUTPUT_FILE);
    if !input.is_file() {
        return Err(PipelineError::NoEventFile(sequence_dir.join(EVENTS_DIR)));
    }
    let offsets = OffsetTable::load(&sequence_dir.join(OFFSETS_FILE))?;
    let columns = read_events(&input)?;
    info!(
        "✅ loaded {} events and {} triggers from {}",
        columns.len(),
        offsets.len(),
        sequence_dir.display()
    );

    let output_dir = sequence_dir.join(IMAGES_DIR).join(FRAMES_DIR);
    fs::create_dir_all(&output_dir).map_err(|e| PipelineError::io(&output_dir, e))?;

    let buckets = bucket_events(&columns.t, offsets.as_slice());
    let mut written = 0;
    for (index, indices) in buckets.iter().enumerate() {
        let frame = render_window(&columns, indices, u32::from(width), u32::from(height));
        let path = frame_path(&output_dir, index);
        match frame.save(&path) {
            Ok(()) => written += 1,
            Err(e) => warn!("⚠️ failed to save {}: {}", path.display(), e),
        }
    }
    info!("💾 saved {} event frames to {}", written, output_dir.display());
    Ok(written)
}

//! ByteTrack 算法实现
//! ByteTrack: Simple and effective multi-object tracking
//!
//! 核心思想:
//! 1. 高低分检测框分开处理
//! 2. 高分框优先匹配 (IOU)
//! 3. 低分框救援丢失的轨迹
//! 4. 纯运动模型,无需外观特征

use tracing::debug;

use super::detector::FrameDetector;
use super::tracker::{compute_iou, Frame, KalmanBoxFilter, ObjectTracker};
use super::types::{BBox, Detection, PixelBox, UNTRACKED};
use crate::error::Result;

/// ByteTrack 参数
#[derive(Clone, Debug)]
pub struct ByteTrackParams {
    /// 最大允许丢失帧数
    pub max_lost_frames: u32,
    /// 高分检测阈值
    pub high_score_threshold: f32,
    /// 低分检测阈值 (用于救援, 更低的框直接丢弃)
    pub low_score_threshold: f32,
    /// 高分匹配 IOU 阈值
    pub high_iou_threshold: f32,
    /// 低分匹配 IOU 阈值
    pub low_iou_threshold: f32,
    /// 卡尔曼过程噪声
    pub process_noise: f32,
    /// 卡尔曼观测噪声
    pub obs_noise: f32,
}

impl Default for ByteTrackParams {
    fn default() -> Self {
        Self {
            max_lost_frames: 30,
            high_score_threshold: 0.5,
            low_score_threshold: 0.1,
            high_iou_threshold: 0.3,
            low_iou_threshold: 0.2,
            process_noise: 0.1,
            obs_noise: 0.5,
        }
    }
}

/// ByteTrack 跟踪对象
#[derive(Clone, Debug)]
struct ByteTrack {
    /// 唯一跟踪ID
    id: i32,

    /// 类别 (轨迹只与同类检测关联)
    class_id: i32,

    /// 卡尔曼滤波器
    kalman: KalmanBoxFilter,

    /// 连续丢失帧数
    frames_lost: u32,
}

impl ByteTrack {
    fn new(id: i32, bbox: &BBox, params: &ByteTrackParams) -> Self {
        Self {
            id,
            class_id: bbox.class_id,
            kalman: KalmanBoxFilter::new(bbox, params.process_noise, params.obs_noise),
            frames_lost: 0,
        }
    }

    fn update(&mut self, bbox: &BBox) {
        self.kalman.predict();
        self.kalman.update(bbox);
        self.frames_lost = 0;
    }

    fn mark_lost(&mut self) {
        self.frames_lost += 1;
        self.kalman.predict();
    }
}

/// ByteTrack 追踪器 (纯关联逻辑, 不含检测)
pub struct ByteTracker {
    tracks: Vec<ByteTrack>,

    /// 下一个分配的ID
    next_id: i32,

    params: ByteTrackParams,
}

impl ByteTracker {
    pub fn new(params: ByteTrackParams) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            params,
        }
    }

    /// 更新跟踪 (ByteTrack 三步匹配)
    ///
    /// 返回与 `detections` 一一对应的跟踪ID, 未关联的为 `UNTRACKED`
    pub fn update(&mut self, detections: &[BBox]) -> Vec<i32> {
        let mut ids = vec![UNTRACKED; detections.len()];

        // 1. 分离高低分检测框
        let mut high_dets: Vec<usize> = Vec::new();
        let mut low_dets: Vec<usize> = Vec::new();

        for (idx, det) in detections.iter().enumerate() {
            if det.confidence >= self.params.high_score_threshold {
                high_dets.push(idx);
            } else if det.confidence >= self.params.low_score_threshold {
                low_dets.push(idx);
            }
        }

        // 2. 第一轮匹配: 高分检测 + 所有轨迹
        let mut matched_track = vec![false; self.tracks.len()];
        let all_tracks: Vec<usize> = (0..self.tracks.len()).collect();

        let assignments = self.match_detections_to_tracks(
            detections,
            &high_dets,
            &all_tracks,
            self.params.high_iou_threshold,
        );

        for (det_idx, track_idx) in assignments {
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(&detections[det_idx]);
            ids[det_idx] = self.tracks[track_idx].id;
        }

        // 3. 第二轮匹配: 低分检测 + 未匹配的轨迹 (救援)
        let unmatched_tracks: Vec<usize> = (0..self.tracks.len())
            .filter(|&idx| !matched_track[idx])
            .collect();

        let low_assignments = self.match_detections_to_tracks(
            detections,
            &low_dets,
            &unmatched_tracks,
            self.params.low_iou_threshold,
        );

        for (det_idx, track_idx) in low_assignments {
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(&detections[det_idx]);
            ids[det_idx] = self.tracks[track_idx].id;
        }

        // 4. 未匹配的轨迹 → 标记丢失
        for (track_idx, &matched) in matched_track.iter().enumerate() {
            if !matched {
                self.tracks[track_idx].mark_lost();
            }
        }

        // 5. 未匹配的高分检测 → 新建轨迹
        for &det_idx in &high_dets {
            if ids[det_idx] == UNTRACKED {
                let track = ByteTrack::new(self.next_id, &detections[det_idx], &self.params);
                ids[det_idx] = track.id;
                self.tracks.push(track);
                self.next_id += 1;
            }
        }

        // 6. 删除丢失太久的轨迹
        let max_lost = self.params.max_lost_frames;
        self.tracks.retain(|t| t.frames_lost <= max_lost);

        ids
    }

    /// IOU 贪心匹配
    fn match_detections_to_tracks(
        &self,
        detections: &[BBox],
        det_indices: &[usize],
        track_indices: &[usize],
        iou_threshold: f32,
    ) -> Vec<(usize, usize)> {
        if det_indices.is_empty() || track_indices.is_empty() {
            return Vec::new();
        }

        // 计算 IOU 代价
        let mut candidates = Vec::new();
        for &det_idx in det_indices {
            let detection = &detections[det_idx];
            for &track_idx in track_indices {
                let track = &self.tracks[track_idx];
                if track.class_id != detection.class_id {
                    continue;
                }
                let iou = compute_iou(detection, &track.kalman.predicted_bbox());
                if iou >= iou_threshold {
                    candidates.push((1.0 - iou, det_idx, track_idx));
                }
            }
        }

        // 按代价排序; 代价相同按索引保证确定性
        candidates.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut assignments = Vec::new();
        let mut used_det = vec![false; detections.len()];
        let mut used_track = vec![false; self.tracks.len()];

        for (_, det_idx, track_idx) in candidates {
            if !used_det[det_idx] && !used_track[track_idx] {
                assignments.push((det_idx, track_idx));
                used_det[det_idx] = true;
                used_track[track_idx] = true;
            }
        }

        assignments
    }

    /// 清除所有轨迹并重置ID计数
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
    }

    /// 获取当前跟踪数量
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

impl Default for ByteTracker {
    fn default() -> Self {
        Self::new(ByteTrackParams::default())
    }
}

/// 检测器 + ByteTrack 组合跟踪器
pub struct ByteTrackTracker<D> {
    detector: D,
    tracker: ByteTracker,
}

impl<D: FrameDetector> ByteTrackTracker<D> {
    pub fn new(detector: D, params: ByteTrackParams) -> Self {
        Self {
            detector,
            tracker: ByteTracker::new(params),
        }
    }
}

impl<D: FrameDetector> ObjectTracker for ByteTrackTracker<D> {
    fn track(&mut self, frame: &Frame<'_>) -> Result<Vec<Detection>> {
        let bboxes = self.detector.detect(frame)?;
        let ids = self.tracker.update(&bboxes);
        debug!(
            "🎯 frame {}: {} detections, {} active tracks",
            frame.index,
            bboxes.len(),
            self.tracker.track_count()
        );

        Ok(bboxes
            .iter()
            .zip(ids)
            .map(|(bbox, id)| {
                Detection::new(PixelBox::from_bbox(bbox), bbox.class_id, bbox.confidence, id)
            })
            .collect())
    }

    fn reset(&mut self) {
        self.tracker.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, conf: f32, class_id: i32) -> BBox {
        BBox {
            x1: x,
            y1: y,
            x2: x + 20.0,
            y2: y + 40.0,
            confidence: conf,
            class_id,
        }
    }

    #[test]
    fn test_ids_persist_across_frames() {
        let mut tracker = ByteTracker::default();
        let first = tracker.update(&[det(0.0, 0.0, 0.9, 0), det(100.0, 0.0, 0.9, 0)]);
        assert_eq!(first, vec![1, 2]);

        // 两个目标各移动2像素, 顺序颠倒
        let second = tracker.update(&[det(102.0, 0.0, 0.9, 0), det(2.0, 0.0, 0.9, 0)]);
        assert_eq!(second, vec![2, 1]);
    }

    #[test]
    fn test_low_score_rescues_existing_track() {
        let mut tracker = ByteTracker::default();
        assert_eq!(tracker.update(&[det(0.0, 0.0, 0.9, 0)]), vec![1]);
        // 低分框不新建轨迹, 但可以延续已有轨迹
        assert_eq!(tracker.update(&[det(1.0, 0.0, 0.2, 0)]), vec![1]);
        assert_eq!(tracker.update(&[det(300.0, 0.0, 0.2, 0)]), vec![UNTRACKED]);
    }

    #[test]
    fn test_class_mismatch_not_associated() {
        let mut tracker = ByteTracker::default();
        assert_eq!(tracker.update(&[det(0.0, 0.0, 0.9, 0)]), vec![1]);
        assert_eq!(tracker.update(&[det(0.0, 0.0, 0.9, 2)]), vec![2]);
    }

    #[test]
    fn test_lost_tracks_expire_and_reset() {
        let params = ByteTrackParams {
            max_lost_frames: 1,
            ..Default::default()
        };
        let mut tracker = ByteTracker::new(params);
        tracker.update(&[det(0.0, 0.0, 0.9, 0)]);
        tracker.update(&[]);
        assert_eq!(tracker.track_count(), 1);
        tracker.update(&[]);
        assert_eq!(tracker.track_count(), 0);

        tracker.update(&[det(0.0, 0.0, 0.9, 0)]);
        tracker.reset();
        assert_eq!(tracker.track_count(), 0);
        assert_eq!(tracker.update(&[det(0.0, 0.0, 0.9, 0)]), vec![1]);
    }
}

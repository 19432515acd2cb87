//! Video aggregation: collapse per-frame detections of the same physical
//! object into one logical violation.
//!
//! Track state is confined to one `VideoAggregator` value, owned by one video
//! analysis. Dropping the aggregator mid-analysis discards all open tracks;
//! nothing reaches storage until the caller hands the harvested
//! representatives to the run aggregator.

use log::debug;

use crate::detect::{BoundingBox, RawDetection};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug)]
pub struct TrackerConfig {
    /// Minimum IoU between a detection and a track's last box to associate.
    pub association_iou: f32,
    /// Consecutive matched frames required to promote NEW -> CONFIRMED.
    pub confirm_hits: u32,
    /// A track with no match for more than this many frames closes.
    pub max_gap_frames: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            association_iou: 0.5,
            confirm_hits: 3,
            max_gap_frames: 2,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.association_iou) {
            return Err(Error::Config(format!(
                "association_iou must be within [0, 1], got {}",
                self.association_iou
            )));
        }
        if self.confirm_hits == 0 {
            return Err(Error::Config(
                "confirm_hits must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    New,
    Confirmed,
    Closed,
}

/// Provisional identity for one physical violation candidate.
#[derive(Clone, Debug)]
pub struct Track {
    pub id: u64,
    pub state: TrackState,
    pub class_id: i64,
    /// Box of the most recent matched detection, used for association.
    pub last_bbox: BoundingBox,
    /// Highest-confidence observation so far; becomes the representative
    /// record if the track confirms. Earlier frame wins exact ties.
    pub best: RawDetection,
    pub consecutive_hits: u32,
    pub frames_since_hit: u32,
    pub opened_at_frame: u64,
}

impl Track {
    fn new(id: u64, det: &RawDetection, frame: u64) -> Self {
        Self {
            id,
            state: TrackState::New,
            class_id: det.class_id,
            last_bbox: det.bbox,
            best: *det,
            consecutive_hits: 1,
            frames_since_hit: 0,
            opened_at_frame: frame,
        }
    }

    fn update_with_detection(&mut self, det: &RawDetection, confirm_hits: u32) {
        self.last_bbox = det.bbox;
        self.consecutive_hits += 1;
        self.frames_since_hit = 0;
        if det.confidence > self.best.confidence {
            self.best = *det;
        }
        if self.state == TrackState::New && self.consecutive_hits >= confirm_hits {
            self.state = TrackState::Confirmed;
            debug!("track {} confirmed after {} hits", self.id, self.consecutive_hits);
        }
    }

    fn mark_missed(&mut self) {
        self.frames_since_hit += 1;
        self.consecutive_hits = 0;
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }
}

/// IoU tracker over a frame sequence.
///
/// Association is greedy per frame: same class, IoU against the track's last
/// box at or above the association threshold, highest IoU first. On equal IoU
/// the earlier-opened track wins, keeping output deterministic for
/// deterministic input.
pub struct VideoAggregator {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_track_id: u64,
    frame_index: u64,
    completed: Vec<RawDetection>,
}

impl VideoAggregator {
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            tracks: Vec::new(),
            next_track_id: 1,
            frame_index: 0,
            completed: Vec::new(),
        })
    }

    /// Feed one frame of already-filtered detections.
    pub fn observe_frame(&mut self, detections: &[RawDetection]) -> Result<()> {
        for det in detections {
            det.validate()?;
        }

        let mut track_matched = vec![false; self.tracks.len()];
        let mut det_matched = vec![false; detections.len()];

        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                if track.class_id != det.class_id {
                    continue;
                }
                let score = track.last_bbox.iou(&det.bbox);
                if score >= self.config.association_iou {
                    pairs.push((ti, di, score));
                }
            }
        }
        pairs.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
                .then(a.1.cmp(&b.1))
        });

        for (ti, di, _score) in pairs {
            if track_matched[ti] || det_matched[di] {
                continue;
            }
            track_matched[ti] = true;
            det_matched[di] = true;
            self.tracks[ti].update_with_detection(&detections[di], self.config.confirm_hits);
        }

        for (ti, matched) in track_matched.iter().enumerate() {
            if !matched {
                self.tracks[ti].mark_missed();
            }
        }

        for (di, matched) in det_matched.iter().enumerate() {
            if !matched {
                let track = Track::new(self.next_track_id, &detections[di], self.frame_index);
                debug!(
                    "track {} opened at frame {} for class {}",
                    track.id, self.frame_index, track.class_id
                );
                self.next_track_id += 1;
                self.tracks.push(track);
            }
        }

        self.close_stale_tracks();
        self.frame_index += 1;
        Ok(())
    }

    fn close_stale_tracks(&mut self) {
        let max_gap = self.config.max_gap_frames;
        let completed = &mut self.completed;
        self.tracks.retain_mut(|track| {
            if track.frames_since_hit <= max_gap {
                return true;
            }
            let was_confirmed = track.is_confirmed();
            track.state = TrackState::Closed;
            if was_confirmed {
                debug!("track {} closed, emitting representative", track.id);
                completed.push(track.best);
            } else {
                // Never confirmed: noise, yields nothing.
                debug!("track {} closed without confirmation", track.id);
            }
            false
        });
    }

    /// End of stream: force-close every open track and return the
    /// representatives of all confirmed tracks, in track-open order of
    /// closing. The aggregator is empty afterwards.
    pub fn finish(&mut self) -> Vec<RawDetection> {
        for track in &mut self.tracks {
            let was_confirmed = track.is_confirmed();
            track.state = TrackState::Closed;
            if was_confirmed {
                self.completed.push(track.best);
            }
        }
        self.tracks.clear();
        self.frame_index = 0;
        self.next_track_id = 1;
        std::mem::take(&mut self.completed)
    }

    /// Tracks still open in the current analysis.
    pub fn active_tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn frames_seen(&self) -> u64 {
        self.frame_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn det(class_id: i64, confidence: f32, x: f32, y: f32) -> RawDetection {
        RawDetection {
            class_id,
            confidence,
            bbox: BoundingBox::new(x, y, 100.0, 100.0),
        }
    }

    fn aggregator() -> VideoAggregator {
        VideoAggregator::new(TrackerConfig::default()).unwrap()
    }

    #[test]
    fn stable_object_yields_one_violation_not_n() {
        let mut agg = aggregator();
        for _ in 0..5 {
            agg.observe_frame(&[det(0, 0.9, 50.0, 50.0)]).unwrap();
        }
        let out = agg.finish();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_id, 0);
        assert_eq!(out[0].confidence, 0.9);
    }

    #[test]
    fn single_frame_appearance_yields_nothing() {
        let mut agg = aggregator();
        agg.observe_frame(&[det(0, 0.9, 50.0, 50.0)]).unwrap();
        for _ in 0..4 {
            agg.observe_frame(&[]).unwrap();
        }
        assert!(agg.finish().is_empty());
    }

    #[test]
    fn track_survives_frame_gap_within_budget() {
        let mut agg = aggregator();
        agg.observe_frame(&[det(0, 0.8, 50.0, 50.0)]).unwrap();
        agg.observe_frame(&[det(0, 0.8, 52.0, 50.0)]).unwrap();
        // Dropped frame: within max_gap_frames, track stays open.
        agg.observe_frame(&[]).unwrap();
        agg.observe_frame(&[det(0, 0.8, 54.0, 50.0)]).unwrap();
        agg.observe_frame(&[det(0, 0.8, 56.0, 50.0)]).unwrap();
        agg.observe_frame(&[det(0, 0.95, 58.0, 50.0)]).unwrap();
        let out = agg.finish();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, 0.95);
    }

    #[test]
    fn confirmation_requires_consecutive_hits() {
        let mut agg = aggregator();
        // Two hits, a miss resets the consecutive counter, two more hits:
        // never reaches three consecutive, so no violation.
        agg.observe_frame(&[det(0, 0.9, 50.0, 50.0)]).unwrap();
        agg.observe_frame(&[det(0, 0.9, 50.0, 50.0)]).unwrap();
        agg.observe_frame(&[]).unwrap();
        agg.observe_frame(&[det(0, 0.9, 50.0, 50.0)]).unwrap();
        agg.observe_frame(&[det(0, 0.9, 50.0, 50.0)]).unwrap();
        assert!(agg.finish().is_empty());
    }

    #[test]
    fn same_position_different_class_opens_two_tracks() {
        let mut agg = aggregator();
        for _ in 0..3 {
            agg.observe_frame(&[det(0, 0.9, 50.0, 50.0), det(1, 0.8, 50.0, 50.0)])
                .unwrap();
        }
        let out = agg.finish();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn representative_is_highest_confidence_frame() {
        let mut agg = aggregator();
        agg.observe_frame(&[det(0, 0.7, 50.0, 50.0)]).unwrap();
        agg.observe_frame(&[det(0, 0.92, 51.0, 50.0)]).unwrap();
        agg.observe_frame(&[det(0, 0.8, 52.0, 50.0)]).unwrap();
        let out = agg.finish();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, 0.92);
        assert_eq!(out[0].bbox.x, 51.0);
    }

    #[test]
    fn unconfirmed_track_closes_silently_after_gap() {
        let mut agg = aggregator();
        agg.observe_frame(&[det(0, 0.9, 50.0, 50.0)]).unwrap();
        for _ in 0..3 {
            agg.observe_frame(&[]).unwrap();
        }
        // Track closed mid-stream, before finish.
        assert!(agg.active_tracks().is_empty());
        assert!(agg.finish().is_empty());
    }

    #[test]
    fn finish_leaves_no_state_behind() {
        let mut agg = aggregator();
        for _ in 0..5 {
            agg.observe_frame(&[det(0, 0.9, 50.0, 50.0)]).unwrap();
        }
        assert_eq!(agg.finish().len(), 1);
        assert!(agg.active_tracks().is_empty());
        assert_eq!(agg.frames_seen(), 0);
        // A second analysis on the same value starts from scratch.
        agg.observe_frame(&[det(0, 0.9, 50.0, 50.0)]).unwrap();
        assert!(agg.finish().is_empty());
    }

    #[test]
    fn malformed_frame_is_rejected() {
        let mut agg = aggregator();
        let bad = RawDetection {
            class_id: 0,
            confidence: 0.9,
            bbox: BoundingBox::new(0.0, 0.0, -5.0, 10.0),
        };
        assert!(matches!(
            agg.observe_frame(&[bad]),
            Err(Error::Validation(_))
        ));
    }
}

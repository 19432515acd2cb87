//! Threshold filter: confidence cutoff plus same-class non-max suppression.
//!
//! This is a pure stage with no side effects. Given identical input ordering
//! it produces identical output, and re-running it on its own output with the
//! same thresholds is a no-op.

use crate::detect::RawDetection;
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug)]
pub struct FilterConfig {
    /// Minimum confidence for a detection to survive.
    pub confidence_threshold: f32,
    /// Same-class boxes overlapping above this IoU collapse to one.
    pub iou_threshold: f32,
}

impl FilterConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::Config(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(Error::Config(format!(
                "iou_threshold must be within [0, 1], got {}",
                self.iou_threshold
            )));
        }
        Ok(())
    }
}

/// Apply confidence filtering and NMS to one frame of raw detections.
///
/// Malformed detections (non-positive box dimensions, confidence outside
/// [0, 1]) fail the whole call with `Validation` so the caller can tell "no
/// detection" apart from "bad input". Cross-class boxes never suppress each
/// other. Ties in confidence keep the earlier-seen detection. Output order
/// follows input order.
pub fn apply(raw: &[RawDetection], config: &FilterConfig) -> Result<Vec<RawDetection>> {
    config.validate()?;
    for det in raw {
        det.validate()?;
    }

    let candidates: Vec<usize> = (0..raw.len())
        .filter(|&i| raw[i].confidence >= config.confidence_threshold)
        .collect();

    // Visit by descending confidence, earlier index first on exact ties, so
    // suppression is deterministic and order-stable.
    let mut order = candidates.clone();
    order.sort_by(|&a, &b| {
        raw[b]
            .confidence
            .partial_cmp(&raw[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut kept: Vec<usize> = Vec::with_capacity(order.len());
    for idx in order {
        let det = &raw[idx];
        let suppressed = kept.iter().any(|&k| {
            raw[k].class_id == det.class_id && raw[k].bbox.iou(&det.bbox) > config.iou_threshold
        });
        if !suppressed {
            kept.push(idx);
        }
    }

    kept.sort_unstable();
    Ok(kept.into_iter().map(|i| raw[i]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn det(class_id: i64, confidence: f32, x: f32, y: f32, w: f32, h: f32) -> RawDetection {
        RawDetection {
            class_id,
            confidence,
            bbox: BoundingBox::new(x, y, w, h),
        }
    }

    fn config(conf: f32, iou: f32) -> FilterConfig {
        FilterConfig {
            confidence_threshold: conf,
            iou_threshold: iou,
        }
    }

    #[test]
    fn drops_below_confidence_threshold() {
        let raw = vec![det(0, 0.3, 0.0, 0.0, 10.0, 10.0)];
        let out = apply(&raw, &config(0.5, 0.45)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn collapses_overlapping_same_class_to_highest_confidence() {
        let raw = vec![
            det(0, 0.7, 0.0, 0.0, 100.0, 100.0),
            det(0, 0.9, 5.0, 5.0, 100.0, 100.0),
            det(0, 0.6, 300.0, 300.0, 50.0, 50.0),
        ];
        let out = apply(&raw, &config(0.5, 0.45)).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].confidence, 0.9);
        assert_eq!(out[1].bbox.x, 300.0);
    }

    #[test]
    fn cross_class_boxes_never_suppress() {
        let raw = vec![
            det(0, 0.9, 0.0, 0.0, 100.0, 100.0),
            det(1, 0.8, 0.0, 0.0, 100.0, 100.0),
        ];
        let out = apply(&raw, &config(0.5, 0.45)).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn equal_confidence_keeps_earlier_seen() {
        let raw = vec![
            det(0, 0.8, 0.0, 0.0, 100.0, 100.0),
            det(0, 0.8, 2.0, 2.0, 100.0, 100.0),
        ];
        let out = apply(&raw, &config(0.5, 0.45)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox.x, 0.0);
    }

    #[test]
    fn nms_is_idempotent() {
        let raw = vec![
            det(0, 0.7, 0.0, 0.0, 100.0, 100.0),
            det(0, 0.9, 10.0, 10.0, 100.0, 100.0),
            det(1, 0.6, 20.0, 20.0, 80.0, 80.0),
            det(0, 0.55, 400.0, 0.0, 60.0, 60.0),
        ];
        let cfg = config(0.5, 0.45);
        let once = apply(&raw, &cfg).unwrap();
        let twice = apply(&once, &cfg).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn zero_area_box_is_rejected_not_dropped() {
        let raw = vec![det(0, 0.9, 0.0, 0.0, 0.0, 10.0)];
        let err = apply(&raw, &config(0.5, 0.45)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let raw = vec![det(0, 1.2, 0.0, 0.0, 10.0, 10.0)];
        let err = apply(&raw, &config(0.5, 0.45)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}

use serde::{Deserialize, Serialize};

use crate::classes::Severity;
use crate::error::{Error, Result};

/// Axis-aligned box in image pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Derived area. Never stored independently of its source box.
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// A zero-area or negative box is a validation error, not a degenerate
    /// record.
    pub fn validate(&self) -> Result<()> {
        if !self.x.is_finite() || !self.y.is_finite() || self.x < 0.0 || self.y < 0.0 {
            return Err(Error::Validation(format!(
                "bbox origin must be non-negative, got ({}, {})",
                self.x, self.y
            )));
        }
        if !(self.width > 0.0) || !(self.height > 0.0) || !self.width.is_finite() || !self.height.is_finite() {
            return Err(Error::Validation(format!(
                "bbox dimensions must be strictly positive, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Intersection over union of two boxes. Zero when disjoint.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        if inter <= 0.0 {
            return 0.0;
        }

        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// One raw model output: the only shape the core depends on from the
/// inference provider.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub class_id: i64,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl RawDetection {
    pub fn validate(&self) -> Result<()> {
        self.bbox.validate()?;
        if !(0.0..=1.0).contains(&self.confidence) || !self.confidence.is_finite() {
            return Err(Error::Validation(format!(
                "confidence must be within [0, 1], got {}",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// One localized finding as persisted under a detection run.
///
/// `class_name` and `severity` are derived from the class registry and `area`
/// from the box; none of the three is independently writable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: i64,
    pub class_name: String,
    pub severity: Severity,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub area: f32,
}

/// One completed detection invocation over one image or video segment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionRun {
    pub id: i64,
    pub source_reference: String,
    pub total_violations: i64,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub created_at: i64,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub detections: Vec<Detection>,
}

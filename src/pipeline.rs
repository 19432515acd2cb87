//! Run aggregation: turn filtered detections into persisted detection runs.
//!
//! Thresholds and the class table are explicit per-pipeline configuration, so
//! concurrent analyses with different settings never share mutable state.
//! Only the store is shared, and it serializes each run's commit as one
//! transaction.

use std::time::{Duration, Instant};

use log::info;

use crate::classes::ClassRegistry;
use crate::detect::{Detection, DetectionRun, RawDetection};
use crate::error::{Error, Result};
use crate::filter::{self, FilterConfig};
use crate::storage::{NewRun, RunStore};
use crate::track::{TrackerConfig, VideoAggregator};

/// Caller-supplied time budget, checked at stage boundaries.
///
/// A commit that has already started is never interrupted; the transaction
/// either commits or rolls back whole.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    started: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    pub fn none() -> Self {
        Self {
            started: Instant::now(),
            budget: None,
        }
    }

    pub fn within(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget: Some(budget),
        }
    }

    pub fn check(&self, stage: &'static str) -> Result<()> {
        let Some(budget) = self.budget else {
            return Ok(());
        };
        let elapsed = self.started.elapsed();
        if elapsed > budget {
            return Err(Error::Timeout {
                stage,
                elapsed_ms: elapsed.as_millis() as u64,
                budget_ms: budget.as_millis() as u64,
            });
        }
        Ok(())
    }
}

pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// One configured detection pipeline.
pub struct Pipeline {
    classes: ClassRegistry,
    filter: FilterConfig,
    tracker: TrackerConfig,
}

impl Pipeline {
    pub fn new(classes: ClassRegistry, filter: FilterConfig, tracker: TrackerConfig) -> Result<Self> {
        filter.validate()?;
        tracker.validate()?;
        Ok(Self {
            classes,
            filter,
            tracker,
        })
    }

    pub fn filter_config(&self) -> &FilterConfig {
        &self.filter
    }

    pub fn tracker_config(&self) -> &TrackerConfig {
        &self.tracker
    }

    /// Filter one image's raw detections and persist them as a run.
    pub fn process_image(
        &self,
        store: &mut dyn RunStore,
        source_reference: &str,
        raw: &[RawDetection],
        metadata: Metadata,
        deadline: &Deadline,
    ) -> Result<DetectionRun> {
        deadline.check("filter")?;
        let filtered = filter::apply(raw, &self.filter)?;
        let detections = self.enrich(&filtered)?;
        deadline.check("commit")?;
        self.persist(store, source_reference, detections, metadata)
    }

    /// Drive the threshold filter and the video aggregator across a frame
    /// sequence, then persist one run for the whole segment.
    ///
    /// Track state lives inside this call; bailing out at any point (error,
    /// timeout, caller dropping the iterator) discards all open tracks and
    /// persists nothing.
    pub fn process_video<I>(
        &self,
        store: &mut dyn RunStore,
        source_reference: &str,
        frames: I,
        metadata: Metadata,
        deadline: &Deadline,
    ) -> Result<DetectionRun>
    where
        I: IntoIterator<Item = Vec<RawDetection>>,
    {
        let mut aggregator = VideoAggregator::new(self.tracker)?;
        for frame in frames {
            deadline.check("frame")?;
            let filtered = filter::apply(&frame, &self.filter)?;
            aggregator.observe_frame(&filtered)?;
        }
        let frames_seen = aggregator.frames_seen();
        let representatives = aggregator.finish();
        info!(
            "{}: {} frames reduced to {} logical violations",
            source_reference,
            frames_seen,
            representatives.len()
        );

        let detections = self.enrich(&representatives)?;
        deadline.check("commit")?;
        self.persist(store, source_reference, detections, metadata)
    }

    /// Resolve class names and severities and derive areas for a filtered
    /// set. Unknown class ids fail the whole run.
    fn enrich(&self, filtered: &[RawDetection]) -> Result<Vec<Detection>> {
        filtered
            .iter()
            .map(|raw| {
                let class = self.classes.resolve(raw.class_id)?;
                Ok(Detection {
                    class_id: raw.class_id,
                    class_name: class.name.clone(),
                    severity: class.severity,
                    confidence: raw.confidence,
                    bbox: raw.bbox,
                    area: raw.bbox.area(),
                })
            })
            .collect()
    }

    fn persist(
        &self,
        store: &mut dyn RunStore,
        source_reference: &str,
        detections: Vec<Detection>,
        metadata: Metadata,
    ) -> Result<DetectionRun> {
        store.insert_run(NewRun {
            source_reference: source_reference.to_string(),
            confidence_threshold: self.filter.confidence_threshold,
            iou_threshold: self.filter.iou_threshold,
            metadata,
            detections,
        })
    }
}

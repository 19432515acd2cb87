//! CityWatch detection kernel.
//!
//! Core of a municipal violation-detection service: takes raw per-frame model
//! outputs (class, confidence, bounding box) and turns them into consistent,
//! queryable detection runs.
//!
//! # Invariants
//!
//! 1. **Threshold semantics**: every persisted detection's confidence is at
//!    or above its run's confidence threshold; sub-threshold detections are
//!    filtered before persistence, never stored then hidden.
//! 2. **Aggregate consistency**: a run's `total_violations` always equals the
//!    count of its detections; it is recomputed, never hand-set.
//! 3. **Atomic runs**: a run and its detections commit in one transaction;
//!    a failed run leaves no record visible to readers.
//! 4. **Derived fields**: `class_name`, severity and `area` are derived from
//!    the class registry and the box on every write.
//! 5. **Isolated track state**: each video analysis owns its tracks; nothing
//!    leaks across analyses, and cancellation persists nothing.
//!
//! # Module Structure
//!
//! - `detect`: detection shapes, the black-box `DetectorBackend` boundary,
//!   backend registry and the scripted test backend
//! - `filter`: confidence cutoff and same-class non-max suppression
//! - `track`: frame-to-frame deduplication of physical objects
//! - `pipeline`: run aggregation with caller-supplied deadlines
//! - `storage`: atomic run store (SQLite and in-memory) and the query layer
//! - `classes`, `config`, `error`: class table, settings, error taxonomy

use std::time::{SystemTime, UNIX_EPOCH};

pub mod classes;
pub mod config;
pub mod detect;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod storage;
pub mod track;

pub use classes::{ClassRegistry, Severity, ViolationClass};
pub use config::CitywatchConfig;
pub use detect::{
    BackendRegistry, BoundingBox, Detection, DetectionRun, DetectorBackend, RawDetection,
    ScriptedBackend,
};
pub use error::{Error, Result};
pub use filter::FilterConfig;
pub use pipeline::{Deadline, Metadata, Pipeline};
pub use storage::{
    ClassCount, DateRange, InMemoryRunStore, NewRun, RunFilter, RunStore, SqliteRunStore,
};
pub use track::{Track, TrackState, TrackerConfig, VideoAggregator};

/// Current time as epoch seconds.
pub fn now_s() -> Result<i64> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Persistence(format!("system clock before epoch: {}", e)))?;
    i64::try_from(now.as_secs())
        .map_err(|_| Error::Persistence("system clock exceeds i64 range".to_string()))
}

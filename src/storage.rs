//! Run storage and the read-side query layer.
//!
//! A run and its detections are committed in one transaction: either all rows
//! land or none do, so a reader never observes a partially written run or a
//! `total_violations` that disagrees with the child count.

use log::info;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::detect::{BoundingBox, Detection, DetectionRun};
use crate::error::{Error, Result};
use crate::now_s;

/// A run about to be persisted. `total_violations` and `created_at` are
/// computed by the store, never supplied.
#[derive(Clone, Debug)]
pub struct NewRun {
    pub source_reference: String,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub detections: Vec<Detection>,
}

/// Read-side filter for listing runs.
#[derive(Clone, Debug, Default)]
pub struct RunFilter {
    /// Keep runs containing at least one detection of this class.
    pub class_name: Option<String>,
    /// Inclusive lower bound on `created_at`, epoch seconds.
    pub since: Option<i64>,
    /// Inclusive upper bound on `created_at`, epoch seconds.
    pub until: Option<i64>,
    /// Keep runs containing at least one detection at or above this
    /// confidence.
    pub min_confidence: Option<f32>,
    pub limit: Option<usize>,
}

/// Date range for the per-class breakdown, inclusive on both ends.
#[derive(Clone, Copy, Debug, Default)]
pub struct DateRange {
    pub since: Option<i64>,
    pub until: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassCount {
    pub class_name: String,
    pub count: i64,
}

pub trait RunStore {
    /// Atomically persist one run with its children. Returns the
    /// materialized run with generated id and timestamp.
    fn insert_run(&mut self, run: NewRun) -> Result<DetectionRun>;

    /// Fetch a run by identifier. `NotFound` for unknown ids.
    fn get_run(&self, id: i64) -> Result<DetectionRun>;

    /// List runs matching a filter, newest first. Empty vec when nothing
    /// matches.
    fn list_runs(&self, filter: &RunFilter) -> Result<Vec<DetectionRun>>;

    /// Violation counts per class name over a date range.
    fn class_breakdown(&self, range: &DateRange) -> Result<Vec<ClassCount>>;
}

pub struct SqliteRunStore {
    conn: Connection,
}

impl SqliteRunStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn
            .busy_timeout(std::time::Duration::from_secs(5))?;
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS detection_results (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              source_reference TEXT NOT NULL,
              total_violations INTEGER NOT NULL,
              confidence_threshold REAL NOT NULL,
              iou_threshold REAL NOT NULL,
              created_at INTEGER NOT NULL,
              metadata TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS detections (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              result_id INTEGER NOT NULL
                REFERENCES detection_results(id) ON DELETE CASCADE,
              class_id INTEGER NOT NULL,
              class_name TEXT NOT NULL,
              severity TEXT NOT NULL,
              confidence REAL NOT NULL,
              bbox_x REAL NOT NULL,
              bbox_y REAL NOT NULL,
              bbox_width REAL NOT NULL,
              bbox_height REAL NOT NULL,
              area REAL NOT NULL,
              created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_detections_result ON detections(result_id);
            CREATE INDEX IF NOT EXISTS idx_detections_class ON detections(class_name);
            CREATE INDEX IF NOT EXISTS idx_results_created ON detection_results(created_at);
            "#,
        )?;
        Ok(())
    }

    /// Direct access for test fixtures.
    pub fn connection(&mut self) -> &mut Connection {
        &mut self.conn
    }

    fn load_detections(&self, run_id: i64) -> Result<Vec<Detection>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT class_id, class_name, severity, confidence,
                   bbox_x, bbox_y, bbox_width, bbox_height
            FROM detections WHERE result_id = ?1 ORDER BY id ASC
            "#,
        )?;
        let mut rows = stmt.query(params![run_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let severity: String = row.get(2)?;
            let bbox = BoundingBox::new(row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?);
            out.push(Detection {
                class_id: row.get(0)?,
                class_name: row.get(1)?,
                severity: severity.parse()?,
                confidence: row.get(3)?,
                bbox,
                // Revalidated on read: always the bbox product, never the
                // stored column.
                area: bbox.area(),
            });
        }
        Ok(out)
    }

    fn run_from_row(&self, row: &rusqlite::Row<'_>) -> Result<DetectionRun> {
        let id: i64 = row.get(0)?;
        let metadata_json: String = row.get(5)?;
        let metadata = serde_json::from_str(&metadata_json)
            .map_err(|e| Error::Persistence(format!("corrupt metadata for run {}: {}", id, e)))?;
        Ok(DetectionRun {
            id,
            source_reference: row.get(1)?,
            total_violations: row.get(2)?,
            confidence_threshold: row.get(3)?,
            iou_threshold: row.get(4)?,
            metadata,
            created_at: row.get(6)?,
            detections: self.load_detections(id)?,
        })
    }
}

const RUN_COLUMNS: &str = "id, source_reference, total_violations, confidence_threshold, \
                           iou_threshold, metadata, created_at";

impl RunStore for SqliteRunStore {
    fn insert_run(&mut self, run: NewRun) -> Result<DetectionRun> {
        let created_at = now_s()?;
        let total_violations = run.detections.len() as i64;
        let metadata_json = serde_json::to_string(&run.metadata)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO detection_results
              (source_reference, total_violations, confidence_threshold,
               iou_threshold, created_at, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                run.source_reference,
                total_violations,
                run.confidence_threshold,
                run.iou_threshold,
                created_at,
                metadata_json
            ],
        )?;
        let run_id = tx.last_insert_rowid();

        for det in &run.detections {
            tx.execute(
                r#"
                INSERT INTO detections
                  (result_id, class_id, class_name, severity, confidence,
                   bbox_x, bbox_y, bbox_width, bbox_height, area, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
                params![
                    run_id,
                    det.class_id,
                    det.class_name,
                    det.severity.as_str(),
                    det.confidence,
                    det.bbox.x,
                    det.bbox.y,
                    det.bbox.width,
                    det.bbox.height,
                    det.bbox.area(),
                    created_at
                ],
            )?;
        }
        tx.commit()?;

        info!(
            "persisted run {} ({}, {} violations)",
            run_id, run.source_reference, total_violations
        );

        Ok(DetectionRun {
            id: run_id,
            source_reference: run.source_reference,
            total_violations,
            confidence_threshold: run.confidence_threshold,
            iou_threshold: run.iou_threshold,
            created_at,
            metadata: run.metadata,
            detections: run.detections,
        })
    }

    fn get_run(&self, id: i64) -> Result<DetectionRun> {
        let sql = format!("SELECT {} FROM detection_results WHERE id = ?1", RUN_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let header: Option<(i64, String, i64, f64, f64, String, i64)> = stmt
            .query_row(params![id], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })
            .optional()?;
        let Some((id, source_reference, total_violations, conf, iou, metadata_json, created_at)) =
            header
        else {
            return Err(Error::NotFound(format!("detection run {}", id)));
        };
        let metadata = serde_json::from_str(&metadata_json)
            .map_err(|e| Error::Persistence(format!("corrupt metadata for run {}: {}", id, e)))?;
        Ok(DetectionRun {
            id,
            source_reference,
            total_violations,
            confidence_threshold: conf as f32,
            iou_threshold: iou as f32,
            created_at,
            metadata,
            detections: self.load_detections(id)?,
        })
    }

    fn list_runs(&self, filter: &RunFilter) -> Result<Vec<DetectionRun>> {
        let mut sql = format!("SELECT {} FROM detection_results WHERE 1=1", RUN_COLUMNS);
        let mut args: Vec<Value> = Vec::new();

        if let Some(since) = filter.since {
            sql.push_str(" AND created_at >= ?");
            args.push(Value::Integer(since));
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND created_at <= ?");
            args.push(Value::Integer(until));
        }
        if let Some(ref class_name) = filter.class_name {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM detections d \
                 WHERE d.result_id = detection_results.id AND d.class_name = ?)",
            );
            args.push(Value::Text(class_name.clone()));
        }
        if let Some(min_confidence) = filter.min_confidence {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM detections d \
                 WHERE d.result_id = detection_results.id AND d.confidence >= ?)",
            );
            args.push(Value::Real(min_confidence as f64));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            args.push(Value::Integer(limit as i64));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(args))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(self.run_from_row(row)?);
        }
        Ok(out)
    }

    fn class_breakdown(&self, range: &DateRange) -> Result<Vec<ClassCount>> {
        let mut sql = String::from(
            "SELECT d.class_name, COUNT(*) FROM detections d \
             JOIN detection_results r ON r.id = d.result_id WHERE 1=1",
        );
        let mut args: Vec<Value> = Vec::new();
        if let Some(since) = range.since {
            sql.push_str(" AND r.created_at >= ?");
            args.push(Value::Integer(since));
        }
        if let Some(until) = range.until {
            sql.push_str(" AND r.created_at <= ?");
            args.push(Value::Integer(until));
        }
        sql.push_str(" GROUP BY d.class_name ORDER BY d.class_name ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(args))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(ClassCount {
                class_name: row.get(0)?,
                count: row.get(1)?,
            });
        }
        Ok(out)
    }
}

/// In-memory store for unit tests and ephemeral pipelines.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: Vec<DetectionRun>,
    next_id: i64,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self {
            runs: Vec::new(),
            next_id: 1,
        }
    }
}

impl RunStore for InMemoryRunStore {
    fn insert_run(&mut self, run: NewRun) -> Result<DetectionRun> {
        let created_at = now_s()?;
        let materialized = DetectionRun {
            id: self.next_id,
            source_reference: run.source_reference,
            total_violations: run.detections.len() as i64,
            confidence_threshold: run.confidence_threshold,
            iou_threshold: run.iou_threshold,
            created_at,
            metadata: run.metadata,
            detections: run.detections,
        };
        self.next_id += 1;
        self.runs.push(materialized.clone());
        Ok(materialized)
    }

    fn get_run(&self, id: i64) -> Result<DetectionRun> {
        self.runs
            .iter()
            .find(|run| run.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("detection run {}", id)))
    }

    fn list_runs(&self, filter: &RunFilter) -> Result<Vec<DetectionRun>> {
        let mut out: Vec<DetectionRun> = self
            .runs
            .iter()
            .filter(|run| {
                filter.since.map_or(true, |s| run.created_at >= s)
                    && filter.until.map_or(true, |u| run.created_at <= u)
                    && filter.class_name.as_ref().map_or(true, |name| {
                        run.detections.iter().any(|d| &d.class_name == name)
                    })
                    && filter.min_confidence.map_or(true, |min| {
                        run.detections.iter().any(|d| d.confidence >= min)
                    })
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.id.cmp(&a.id))
        });
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn class_breakdown(&self, range: &DateRange) -> Result<Vec<ClassCount>> {
        let mut counts = std::collections::BTreeMap::new();
        for run in &self.runs {
            if range.since.map_or(false, |s| run.created_at < s)
                || range.until.map_or(false, |u| run.created_at > u)
            {
                continue;
            }
            for det in &run.detections {
                *counts.entry(det.class_name.clone()).or_insert(0i64) += 1;
            }
        }
        Ok(counts
            .into_iter()
            .map(|(class_name, count)| ClassCount { class_name, count })
            .collect())
    }
}

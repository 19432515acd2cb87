use citywatch::{
    BoundingBox, ClassRegistry, Deadline, Error, FilterConfig, Metadata, Pipeline, RawDetection,
    RunFilter, RunStore, SqliteRunStore, TrackerConfig,
};

fn pipeline() -> Pipeline {
    Pipeline::new(
        ClassRegistry::default(),
        FilterConfig {
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
        },
        TrackerConfig::default(),
    )
    .expect("pipeline config")
}

fn det(class_id: i64, confidence: f32, x: f32) -> RawDetection {
    RawDetection {
        class_id,
        confidence,
        bbox: BoundingBox::new(x, 10.0, 50.0, 50.0),
    }
}

#[test]
fn persisted_confidences_respect_run_threshold() {
    let mut store = SqliteRunStore::open_in_memory().expect("store");
    let raw = vec![det(0, 0.51, 0.0), det(1, 0.3, 200.0), det(2, 0.95, 400.0)];
    let run = pipeline()
        .process_image(&mut store, "img:a", &raw, Metadata::new(), &Deadline::none())
        .expect("run");

    assert_eq!(run.total_violations, 2);
    let fetched = store.get_run(run.id).expect("fetch");
    assert_eq!(fetched.total_violations as usize, fetched.detections.len());
    for detection in &fetched.detections {
        assert!(detection.confidence >= fetched.confidence_threshold);
        assert!((detection.area - detection.bbox.area()).abs() < f32::EPSILON);
    }
}

#[test]
fn empty_filtered_set_still_produces_a_run() {
    let mut store = SqliteRunStore::open_in_memory().expect("store");
    let run = pipeline()
        .process_image(
            &mut store,
            "img:empty",
            &[det(0, 0.3, 0.0)],
            Metadata::new(),
            &Deadline::none(),
        )
        .expect("run");
    assert_eq!(run.total_violations, 0);
    let fetched = store.get_run(run.id).expect("fetch");
    assert!(fetched.detections.is_empty());
}

#[test]
fn failed_commit_leaves_zero_rows() {
    let mut store = SqliteRunStore::open_in_memory().expect("store");
    store
        .connection()
        .execute_batch(
            r#"
            CREATE TRIGGER simulated_failure BEFORE INSERT ON detections
            WHEN (SELECT COUNT(*) FROM detections) >= 2
            BEGIN
              SELECT RAISE(ABORT, 'simulated storage failure');
            END;
            "#,
        )
        .expect("trigger");

    let raw = vec![det(0, 0.9, 0.0), det(1, 0.9, 200.0), det(2, 0.9, 400.0)];
    let err = pipeline()
        .process_image(&mut store, "img:b", &raw, Metadata::new(), &Deadline::none())
        .unwrap_err();
    assert!(matches!(err, Error::Persistence(_)));

    let runs: i64 = store
        .connection()
        .query_row("SELECT COUNT(*) FROM detection_results", [], |r| r.get(0))
        .expect("count runs");
    let children: i64 = store
        .connection()
        .query_row("SELECT COUNT(*) FROM detections", [], |r| r.get(0))
        .expect("count detections");
    assert_eq!(runs, 0, "no run header without its detections");
    assert_eq!(children, 0, "no orphaned detections");

    // The failed source reference legitimately looks absent, not corrupted.
    assert!(store.list_runs(&RunFilter::default()).expect("list").is_empty());
}

#[test]
fn cascade_delete_removes_children() {
    let mut store = SqliteRunStore::open_in_memory().expect("store");
    let run = pipeline()
        .process_image(
            &mut store,
            "img:c",
            &[det(0, 0.9, 0.0), det(1, 0.8, 200.0)],
            Metadata::new(),
            &Deadline::none(),
        )
        .expect("run");

    store
        .connection()
        .execute("DELETE FROM detection_results WHERE id = ?1", [run.id])
        .expect("delete");
    let children: i64 = store
        .connection()
        .query_row("SELECT COUNT(*) FROM detections", [], |r| r.get(0))
        .expect("count");
    assert_eq!(children, 0);
}

use std::sync::Mutex;

use tempfile::NamedTempFile;

use citywatch::config::CitywatchConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CITYWATCH_CONFIG",
        "CITYWATCH_DB_PATH",
        "CITYWATCH_CONFIDENCE_THRESHOLD",
        "CITYWATCH_IOU_THRESHOLD",
        "CITYWATCH_CONFIRM_HITS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CitywatchConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "citywatch.db");
    assert_eq!(cfg.confidence_threshold, 0.5);
    assert_eq!(cfg.iou_threshold, 0.45);
    assert_eq!(cfg.tracker.confirm_hits, 3);
    assert!(!cfg.classes.is_empty());

    clear_env();
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "db_path": "citywatch_prod.db",
        "thresholds": { "confidence": 0.6, "iou": 0.4 },
        "tracker": { "association_iou": 0.3, "confirm_hits": 2, "max_gap_frames": 5 },
        "classes": [
            { "id": 0, "name": "illegal_structure", "severity": "high" },
            { "id": 1, "name": "illegal_parking", "severity": "low" }
        ]
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("CITYWATCH_CONFIG", file.path());
    std::env::set_var("CITYWATCH_CONFIDENCE_THRESHOLD", "0.7");
    std::env::set_var("CITYWATCH_CONFIRM_HITS", "4");

    let cfg = CitywatchConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "citywatch_prod.db");
    assert_eq!(cfg.confidence_threshold, 0.7);
    assert_eq!(cfg.iou_threshold, 0.4);
    assert_eq!(cfg.tracker.association_iou, 0.3);
    assert_eq!(cfg.tracker.confirm_hits, 4);
    assert_eq!(cfg.tracker.max_gap_frames, 5);
    assert_eq!(cfg.classes.len(), 2);

    clear_env();
}

#[test]
fn out_of_range_threshold_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CITYWATCH_CONFIDENCE_THRESHOLD", "1.5");
    let err = CitywatchConfig::load().unwrap_err();
    assert!(matches!(err, citywatch::Error::Config(_)));

    clear_env();
}

#[test]
fn duplicate_class_ids_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "classes": [
            { "id": 3, "name": "littering", "severity": "medium" },
            { "id": 3, "name": "traffic_violation", "severity": "medium" }
        ]
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("CITYWATCH_CONFIG", file.path());

    let err = CitywatchConfig::load().unwrap_err();
    assert!(matches!(err, citywatch::Error::Config(_)));

    clear_env();
}

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::Builder;

use roadscan::config::{BlobSettings, RecordSettings};
use roadscan::{CapturePolicy, RoadscanConfig, Rotation};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "ROADSCAN_CONFIG",
        "ROADSCAN_PICTURES_DIR",
        "ROADSCAN_DETECTOR_BACKEND",
        "ROADSCAN_ACCELERATED",
        "ROADSCAN_SOURCE_PATH",
        "ROADSCAN_RECORDS_URL",
        "ROADSCAN_BLOB_URL",
        "ROADSCAN_UPLOAD_WORKERS",
        "ROADSCAN_CAPTURE_COOLDOWN_MS",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, body: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, body.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "pictures_dir": "/var/lib/roadscan/pictures",
            "detector": { "backend": "Stub", "accelerated": true, "confidence_threshold": 0.4 },
            "source": { "path": "/srv/frames", "target_fps": 5, "rotation": 90, "mirrored": true },
            "location": { "interval_ms": 2000, "min_distance_m": 25.0 },
            "blob": { "kind": "firebase", "bucket": "demo.appspot.com" },
            "records": { "kind": "firebase", "url": "https://demo.firebaseio.com" },
            "upload": { "workers": 2, "queue_capacity": 8, "step_timeout_secs": 10 },
            "capture": { "cooldown_ms": 1500 }
        }"#,
    );

    std::env::set_var("ROADSCAN_CONFIG", file.path());
    std::env::set_var("ROADSCAN_UPLOAD_WORKERS", "6");
    std::env::set_var("ROADSCAN_RECORDS_URL", "/tmp/roadscan-records.db");

    let cfg = RoadscanConfig::load().expect("load config");

    assert_eq!(cfg.pictures_dir, PathBuf::from("/var/lib/roadscan/pictures"));
    assert_eq!(cfg.detector.backend, "stub");
    assert!(cfg.detector.accelerated);
    assert_eq!(cfg.detector.confidence_threshold, 0.4);
    assert_eq!(cfg.source.path, Some(PathBuf::from("/srv/frames")));
    assert_eq!(cfg.source.target_fps, 5);
    assert_eq!(cfg.source.rotation, Rotation::Deg90);
    assert!(cfg.source.mirrored);
    assert_eq!(cfg.location.interval, Duration::from_millis(2000));
    assert_eq!(cfg.location.min_distance_m, 25.0);
    assert_eq!(
        cfg.blob,
        BlobSettings::Firebase {
            bucket: "demo.appspot.com".to_string(),
            endpoint: None,
            auth_token: None,
        }
    );
    assert_eq!(
        cfg.records,
        RecordSettings::Sqlite {
            db_path: "/tmp/roadscan-records.db".to_string()
        }
    );
    assert_eq!(cfg.upload.workers, 6);
    assert_eq!(cfg.upload.queue_capacity, 8);
    assert_eq!(cfg.upload.step_timeout, Duration::from_secs(10));
    assert_eq!(
        cfg.capture.policy(),
        CapturePolicy::Cooldown(Duration::from_millis(1500))
    );

    clear_env();
}

#[test]
fn loads_toml_config_from_explicit_path() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
pictures_dir = "shots"

[blob]
kind = "filesystem"
root = "/srv/blobs"

[records]
db_path = "hazards.db"

[location]
nmea_path = "/dev/ttyUSB0"
geocoder_url = "https://nominatim.example.org"
"#,
    );

    let cfg = RoadscanConfig::load_from(Some(file.path())).expect("load toml");
    assert_eq!(cfg.pictures_dir, PathBuf::from("shots"));
    assert_eq!(
        cfg.blob,
        BlobSettings::Filesystem {
            root: PathBuf::from("/srv/blobs")
        }
    );
    assert_eq!(
        cfg.records,
        RecordSettings::Sqlite {
            db_path: "hazards.db".to_string()
        }
    );
    assert_eq!(cfg.location.nmea_path, Some(PathBuf::from("/dev/ttyUSB0")));
    assert_eq!(
        cfg.location.geocoder_url.as_deref(),
        Some("https://nominatim.example.org")
    );
    assert_eq!(cfg.detector.backend, "cpu");
    assert_eq!(cfg.capture.policy(), CapturePolicy::EveryDetection);

    clear_env();
}

#[test]
fn blob_url_env_selects_backend() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("ROADSCAN_BLOB_URL", "gs://hazards.appspot.com");
    let cfg = RoadscanConfig::load().expect("load");
    assert!(matches!(cfg.blob, BlobSettings::Firebase { ref bucket, .. } if bucket == "hazards.appspot.com"));

    std::env::set_var("ROADSCAN_BLOB_URL", "/mnt/blobs");
    let cfg = RoadscanConfig::load().expect("load");
    assert_eq!(
        cfg.blob,
        BlobSettings::Filesystem {
            root: PathBuf::from("/mnt/blobs")
        }
    );

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("ROADSCAN_UPLOAD_WORKERS", "0");
    assert!(RoadscanConfig::load().is_err());
    clear_env();

    std::env::set_var("ROADSCAN_ACCELERATED", "maybe");
    assert!(RoadscanConfig::load().is_err());
    clear_env();

    let bad_rotation = config_file(".json", r#"{ "source": { "rotation": 45 } }"#);
    assert!(RoadscanConfig::load_from(Some(bad_rotation.path())).is_err());

    let bad_threshold = config_file(".json", r#"{ "detector": { "confidence_threshold": 1.5 } }"#);
    assert!(RoadscanConfig::load_from(Some(bad_threshold.path())).is_err());

    let missing_bucket = config_file(".json", r#"{ "blob": { "kind": "firebase" } }"#);
    assert!(RoadscanConfig::load_from(Some(missing_bucket.path())).is_err());

    let unparsable = config_file(".json", "{ not json");
    assert!(RoadscanConfig::load_from(Some(unparsable.path())).is_err());

    clear_env();
}

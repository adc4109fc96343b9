use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::CapturePolicy;
use crate::frame::Rotation;
use crate::geo::UpdateSettings;

const DEFAULT_PICTURES_DIR: &str = "pictures";
const DEFAULT_DETECTOR_BACKEND: &str = "cpu";
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_SOURCE_FPS: u32 = 10;
const DEFAULT_LOCATION_INTERVAL_MS: u64 = 1000;
const DEFAULT_LOCATION_MIN_DISTANCE_M: f64 = 10.0;
const DEFAULT_BLOB_ROOT: &str = "blobs";
const DEFAULT_DB_PATH: &str = "roadscan.db";
const DEFAULT_UPLOAD_WORKERS: usize = 4;
const DEFAULT_QUEUE_CAPACITY: usize = 32;
const DEFAULT_STEP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize, Default)]
struct RoadscanConfigFile {
    pictures_dir: Option<PathBuf>,
    detector: Option<DetectorConfigFile>,
    source: Option<SourceConfigFile>,
    location: Option<LocationConfigFile>,
    blob: Option<BlobConfigFile>,
    records: Option<RecordsConfigFile>,
    upload: Option<UploadConfigFile>,
    capture: Option<CaptureConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    accelerated: Option<bool>,
    model_path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    path: Option<PathBuf>,
    target_fps: Option<u32>,
    rotation: Option<u32>,
    mirrored: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct LocationConfigFile {
    interval_ms: Option<u64>,
    min_distance_m: Option<f64>,
    nmea_path: Option<PathBuf>,
    geocoder_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct BlobConfigFile {
    kind: Option<String>,
    root: Option<PathBuf>,
    bucket: Option<String>,
    endpoint: Option<String>,
    auth_token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RecordsConfigFile {
    kind: Option<String>,
    db_path: Option<String>,
    url: Option<String>,
    auth_token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    step_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    cooldown_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RoadscanConfig {
    /// Local directory for the PNG copy written before upload.
    pub pictures_dir: PathBuf,
    pub detector: DetectorSettings,
    pub source: SourceSettings,
    pub location: LocationSettings,
    pub blob: BlobSettings,
    pub records: RecordSettings,
    pub upload: UploadSettings,
    pub capture: CaptureSettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub accelerated: bool,
    pub model_path: Option<PathBuf>,
    pub confidence_threshold: f32,
    pub input_size: u32,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Directory of still images; `None` runs the synthetic stub source.
    pub path: Option<PathBuf>,
    pub target_fps: u32,
    pub rotation: Rotation,
    pub mirrored: bool,
}

#[derive(Debug, Clone)]
pub struct LocationSettings {
    pub interval: Duration,
    pub min_distance_m: f64,
    pub nmea_path: Option<PathBuf>,
    pub geocoder_url: Option<String>,
}

impl LocationSettings {
    pub fn update_settings(&self) -> UpdateSettings {
        UpdateSettings {
            interval: self.interval,
            min_distance_m: self.min_distance_m,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlobSettings {
    Filesystem {
        root: PathBuf,
    },
    Firebase {
        bucket: String,
        endpoint: Option<String>,
        auth_token: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordSettings {
    Sqlite {
        db_path: String,
    },
    Firebase {
        url: String,
        auth_token: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Timeout applied to each remote step.
    pub step_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub cooldown: Duration,
}

impl CaptureSettings {
    pub fn policy(&self) -> CapturePolicy {
        CapturePolicy::from_cooldown_ms(self.cooldown.as_millis() as u64)
    }
}

impl RoadscanConfig {
    /// Built-in defaults with no file and no environment applied.
    pub fn defaults() -> Result<Self> {
        Self::from_file(RoadscanConfigFile::default())
    }

    /// Load from the file named by `ROADSCAN_CONFIG` (if set), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = env_value("ROADSCAN_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RoadscanConfigFile) -> Result<Self> {
        let detector = file.detector.unwrap_or_default();
        let source = file.source.unwrap_or_default();
        let location = file.location.unwrap_or_default();
        let upload = file.upload.unwrap_or_default();
        let capture = file.capture.unwrap_or_default();

        let rotation = match source.rotation {
            Some(degrees) => Rotation::from_degrees(degrees)?,
            None => Rotation::Deg0,
        };

        Ok(Self {
            pictures_dir: file
                .pictures_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PICTURES_DIR)),
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_DETECTOR_BACKEND.to_string()),
                accelerated: detector.accelerated.unwrap_or(false),
                model_path: detector.model_path,
                confidence_threshold: detector
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            },
            source: SourceSettings {
                path: source.path,
                target_fps: source.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
                rotation,
                mirrored: source.mirrored.unwrap_or(false),
            },
            location: LocationSettings {
                interval: Duration::from_millis(
                    location.interval_ms.unwrap_or(DEFAULT_LOCATION_INTERVAL_MS),
                ),
                min_distance_m: location
                    .min_distance_m
                    .unwrap_or(DEFAULT_LOCATION_MIN_DISTANCE_M),
                nmea_path: location.nmea_path,
                geocoder_url: location.geocoder_url,
            },
            blob: blob_settings(file.blob.unwrap_or_default())?,
            records: record_settings(file.records.unwrap_or_default())?,
            upload: UploadSettings {
                workers: upload.workers.unwrap_or(DEFAULT_UPLOAD_WORKERS),
                queue_capacity: upload.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
                step_timeout: Duration::from_secs(
                    upload.step_timeout_secs.unwrap_or(DEFAULT_STEP_TIMEOUT_SECS),
                ),
            },
            capture: CaptureSettings {
                cooldown: Duration::from_millis(capture.cooldown_ms.unwrap_or(0)),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(dir) = env_value("ROADSCAN_PICTURES_DIR") {
            self.pictures_dir = PathBuf::from(dir);
        }
        if let Some(backend) = env_value("ROADSCAN_DETECTOR_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(accelerated) = env_value("ROADSCAN_ACCELERATED") {
            self.detector.accelerated = parse_bool(&accelerated)
                .ok_or_else(|| anyhow!("ROADSCAN_ACCELERATED must be true or false"))?;
        }
        if let Some(path) = env_value("ROADSCAN_SOURCE_PATH") {
            self.source.path = Some(PathBuf::from(path));
        }
        if let Some(url) = env_value("ROADSCAN_RECORDS_URL") {
            self.records = parse_records_url(&url);
        }
        if let Some(url) = env_value("ROADSCAN_BLOB_URL") {
            self.blob = parse_blob_url(&url)?;
        }
        if let Some(workers) = env_value("ROADSCAN_UPLOAD_WORKERS") {
            self.upload.workers = workers
                .parse()
                .map_err(|_| anyhow!("ROADSCAN_UPLOAD_WORKERS must be a positive integer"))?;
        }
        if let Some(cooldown) = env_value("ROADSCAN_CAPTURE_COOLDOWN_MS") {
            let ms: u64 = cooldown.parse().map_err(|_| {
                anyhow!("ROADSCAN_CAPTURE_COOLDOWN_MS must be an integer number of milliseconds")
            })?;
            self.capture.cooldown = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.detector.backend = self.detector.backend.trim().to_lowercase();
        if self.detector.backend.is_empty() {
            return Err(anyhow!("detector backend must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(anyhow!("detector confidence_threshold must be within 0..1"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source target_fps must be greater than zero"));
        }
        if self.location.interval.is_zero() {
            return Err(anyhow!("location interval must be greater than zero"));
        }
        if self.location.min_distance_m < 0.0 {
            return Err(anyhow!("location min_distance_m must not be negative"));
        }
        if self.upload.workers == 0 {
            return Err(anyhow!("upload workers must be at least 1"));
        }
        if self.upload.queue_capacity == 0 {
            return Err(anyhow!("upload queue_capacity must be at least 1"));
        }
        if self.upload.step_timeout.is_zero() {
            return Err(anyhow!("upload step_timeout_secs must be greater than zero"));
        }
        Ok(())
    }
}

fn blob_settings(file: BlobConfigFile) -> Result<BlobSettings> {
    match file.kind.as_deref().unwrap_or("filesystem") {
        "filesystem" => Ok(BlobSettings::Filesystem {
            root: file.root.unwrap_or_else(|| PathBuf::from(DEFAULT_BLOB_ROOT)),
        }),
        "firebase" => Ok(BlobSettings::Firebase {
            bucket: file
                .bucket
                .ok_or_else(|| anyhow!("blob.bucket is required for kind \"firebase\""))?,
            endpoint: file.endpoint,
            auth_token: file.auth_token,
        }),
        other => Err(anyhow!("unknown blob kind '{}'", other)),
    }
}

fn record_settings(file: RecordsConfigFile) -> Result<RecordSettings> {
    match file.kind.as_deref().unwrap_or("sqlite") {
        "sqlite" => Ok(RecordSettings::Sqlite {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
        }),
        "firebase" => Ok(RecordSettings::Firebase {
            url: file
                .url
                .ok_or_else(|| anyhow!("records.url is required for kind \"firebase\""))?,
            auth_token: file.auth_token,
        }),
        other => Err(anyhow!("unknown records kind '{}'", other)),
    }
}

/// `gs://<bucket>` selects Firebase Storage; anything else is a local root,
/// optionally written as a `file://` URL.
fn parse_blob_url(value: &str) -> Result<BlobSettings> {
    if let Some(bucket) = value.strip_prefix("gs://") {
        let bucket = bucket.trim_end_matches('/');
        if bucket.is_empty() {
            return Err(anyhow!("ROADSCAN_BLOB_URL has an empty bucket"));
        }
        return Ok(BlobSettings::Firebase {
            bucket: bucket.to_string(),
            endpoint: None,
            auth_token: None,
        });
    }
    if value.starts_with("file://") {
        let url = url::Url::parse(value)
            .map_err(|e| anyhow!("invalid ROADSCAN_BLOB_URL {}: {}", value, e))?;
        let root = url
            .to_file_path()
            .map_err(|_| anyhow!("ROADSCAN_BLOB_URL {} is not a local path", value))?;
        return Ok(BlobSettings::Filesystem { root });
    }
    Ok(BlobSettings::Filesystem {
        root: PathBuf::from(value),
    })
}

/// `http(s)://` selects the REST store; anything else is a SQLite path or
/// `file:` URI.
fn parse_records_url(value: &str) -> RecordSettings {
    if value.starts_with("https://") || value.starts_with("http://") {
        RecordSettings::Firebase {
            url: value.to_string(),
            auth_token: None,
        }
    } else {
        RecordSettings::Sqlite {
            db_path: value.to_string(),
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_config_file(path: &Path) -> Result<RoadscanConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() -> Result<()> {
        let cfg = RoadscanConfig::defaults()?;
        assert_eq!(cfg.pictures_dir, PathBuf::from("pictures"));
        assert_eq!(cfg.detector.backend, "cpu");
        assert_eq!(cfg.location.interval, Duration::from_millis(1000));
        assert_eq!(cfg.location.min_distance_m, 10.0);
        assert_eq!(cfg.upload.workers, 4);
        assert_eq!(cfg.upload.queue_capacity, 32);
        assert_eq!(cfg.capture.policy(), CapturePolicy::EveryDetection);
        assert_eq!(
            cfg.records,
            RecordSettings::Sqlite {
                db_path: "roadscan.db".to_string()
            }
        );
        Ok(())
    }

    #[test]
    fn blob_and_record_urls() -> Result<()> {
        assert_eq!(
            parse_blob_url("gs://demo.appspot.com")?,
            BlobSettings::Firebase {
                bucket: "demo.appspot.com".to_string(),
                endpoint: None,
                auth_token: None
            }
        );
        assert_eq!(
            parse_blob_url("file:///var/lib/roadscan/blobs")?,
            BlobSettings::Filesystem {
                root: PathBuf::from("/var/lib/roadscan/blobs")
            }
        );
        assert!(parse_blob_url("gs://").is_err());
        assert!(matches!(
            parse_records_url("https://demo.firebaseio.com"),
            RecordSettings::Firebase { .. }
        ));
        assert!(matches!(
            parse_records_url("file:records?mode=memory"),
            RecordSettings::Sqlite { .. }
        ));
        Ok(())
    }

    #[test]
    fn firebase_kinds_require_targets() {
        let blob = BlobConfigFile {
            kind: Some("firebase".to_string()),
            ..Default::default()
        };
        assert!(blob_settings(blob).is_err());
        let records = RecordsConfigFile {
            kind: Some("mongo".to_string()),
            ..Default::default()
        };
        assert!(record_settings(records).is_err());
    }
}

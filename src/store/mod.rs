//! Detection records and the two persistence collaborators.
//!
//! - `RecordStore`: push-style document store under the `images` collection.
//!   Identity is generated by the store at push time.
//! - `BlobStore`: key-addressed object store holding the PNG snapshots under
//!   `images/<filename>`.

mod blob;
mod firebase;
mod push_id;
mod sqlite;

pub use blob::{blob_key, BlobStore, FilesystemBlobStore, FirebaseBlobStore};
pub use firebase::FirebaseRecordStore;
pub use push_id::PushIdGenerator;
pub use sqlite::{shared_memory_uri, SqliteRecordStore};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::geo::UNKNOWN;

/// Logical collection name in the record store.
pub const COLLECTION: &str = "images";

/// Status assigned to every new record.
pub const DEFAULT_STATUS: &str = "unfixed";

/// Fields an external reviewer may change after creation.
pub const MUTABLE_FIELDS: &[&str] = &["status"];

/// Store-generated record identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A latitude or longitude: a number, or the literal `"unknown"`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Coordinate {
    Known(f64),
    Unknown,
}

impl Coordinate {
    pub fn value(&self) -> Option<f64> {
        match self {
            Coordinate::Known(v) => Some(*v),
            Coordinate::Unknown => None,
        }
    }
}

impl From<Option<f64>> for Coordinate {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Coordinate::Unknown, Coordinate::Known)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coordinate::Known(v) => write!(f, "{}", v),
            Coordinate::Unknown => f.write_str(UNKNOWN),
        }
    }
}

impl Serialize for Coordinate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Coordinate::Known(v) => serializer.serialize_f64(*v),
            Coordinate::Unknown => serializer.serialize_str(UNKNOWN),
        }
    }
}

impl<'de> Deserialize<'de> for Coordinate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(v) => Ok(Coordinate::Known(v)),
            Raw::Text(text) if text == UNKNOWN => Ok(Coordinate::Unknown),
            Raw::Text(text) => text
                .parse::<f64>()
                .map(Coordinate::Known)
                .map_err(|_| serde::de::Error::custom(format!("invalid coordinate '{}'", text))),
        }
    }
}

/// The persisted unit, one per successfully uploaded capture.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRecord {
    pub filename: String,
    pub image_url: String,
    pub latitude: Coordinate,
    pub longitude: Coordinate,
    pub address: String,
    /// Epoch milliseconds at record assembly.
    pub timestamp: u64,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    DEFAULT_STATUS.to_string()
}

impl DetectionRecord {
    pub fn new(
        filename: impl Into<String>,
        image_url: impl Into<String>,
        latitude: Option<f64>,
        longitude: Option<f64>,
        address: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            filename: filename.into(),
            image_url: image_url.into(),
            latitude: latitude.into(),
            longitude: longitude.into(),
            address: address.into(),
            timestamp,
            status: default_status(),
        }
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude.value()?, self.longitude.value()?))
    }

    pub fn is_fixed(&self) -> bool {
        RecordStatus::is_fixed(&self.status)
    }
}

/// Remediation state carried in the free-form `status` field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordStatus {
    Unfixed,
    Fixed,
    Other(String),
}

impl RecordStatus {
    pub fn parse(status: &str) -> Self {
        if status.eq_ignore_ascii_case("fixed") {
            RecordStatus::Fixed
        } else if status.eq_ignore_ascii_case(DEFAULT_STATUS) {
            RecordStatus::Unfixed
        } else {
            RecordStatus::Other(status.to_string())
        }
    }

    pub fn is_fixed(status: &str) -> bool {
        matches!(Self::parse(status), RecordStatus::Fixed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            RecordStatus::Unfixed => DEFAULT_STATUS,
            RecordStatus::Fixed => "fixed",
            RecordStatus::Other(s) => s,
        }
    }
}

pub(crate) fn ensure_mutable(field: &str) -> Result<()> {
    if MUTABLE_FIELDS.contains(&field) {
        Ok(())
    } else {
        Err(anyhow!(
            "field '{}' is immutable (mutable fields: {})",
            field,
            MUTABLE_FIELDS.join(", ")
        ))
    }
}

/// Structured record store.
pub trait RecordStore: Send + Sync {
    /// Create a record; the store assigns and returns its id.
    fn push(&self, record: &DetectionRecord) -> Result<RecordId>;

    /// Read-modify-write of a single mutable field, leaving the rest of the
    /// record untouched.
    fn set_field(&self, id: &RecordId, field: &str, value: &str) -> Result<()>;

    fn get(&self, id: &RecordId) -> Result<Option<DetectionRecord>>;

    /// All records in push order.
    fn list(&self) -> Result<Vec<(RecordId, DetectionRecord)>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_with_wire_field_names() -> Result<()> {
        let record = DetectionRecord::new(
            "1700000000000.png",
            "https://blob/images/1700000000000.png",
            Some(37.7749),
            None,
            UNKNOWN,
            1_700_000_000_123,
        );
        let value = serde_json::to_value(&record)?;
        assert_eq!(value["imageUrl"], "https://blob/images/1700000000000.png");
        assert_eq!(value["latitude"], 37.7749);
        assert_eq!(value["longitude"], "unknown");
        assert_eq!(value["status"], "unfixed");
        assert_eq!(value["timestamp"], 1_700_000_000_123u64);

        let back: DetectionRecord = serde_json::from_value(value)?;
        assert_eq!(back, record);
        Ok(())
    }

    #[test]
    fn missing_status_defaults_to_unfixed() -> Result<()> {
        let record: DetectionRecord = serde_json::from_str(
            r#"{"filename":"a.png","imageUrl":"u","latitude":"unknown",
                "longitude":"unknown","address":"unknown","timestamp":1}"#,
        )?;
        assert_eq!(record.status, DEFAULT_STATUS);
        assert!(record.coordinates().is_none());
        assert!(serde_json::from_str::<Coordinate>(r#""north""#).is_err());
        Ok(())
    }

    #[test]
    fn fixed_status_is_case_insensitive() {
        assert!(RecordStatus::is_fixed("Fixed"));
        assert!(RecordStatus::is_fixed("FIXED"));
        assert!(!RecordStatus::is_fixed("unfixed"));
        assert_eq!(RecordStatus::parse("in progress").as_str(), "in progress");
    }

    #[test]
    fn only_status_is_mutable() {
        assert!(ensure_mutable("status").is_ok());
        assert!(ensure_mutable("imageUrl").is_err());
    }
}

use anyhow::{anyhow, Context, Result};
use image::ImageFormat;
use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::capture::Capture;
use crate::geo::{format_address, ReverseGeocoder, UNKNOWN};
use crate::now_ms;
use crate::store::{blob_key, BlobStore, DetectionRecord, RecordId, RecordStore};

/// Upload step in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UploadStage {
    Encode,
    LocalWrite,
    RemoteUpload,
    UrlFetch,
    RecordPush,
}

impl UploadStage {
    pub const ALL: [UploadStage; 5] = [
        UploadStage::Encode,
        UploadStage::LocalWrite,
        UploadStage::RemoteUpload,
        UploadStage::UrlFetch,
        UploadStage::RecordPush,
    ];

    /// Step number 1-4; encoding belongs to the local write step.
    pub fn step_number(self) -> u8 {
        match self {
            UploadStage::Encode | UploadStage::LocalWrite => 1,
            UploadStage::RemoteUpload => 2,
            UploadStage::UrlFetch => 3,
            UploadStage::RecordPush => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            UploadStage::Encode => "encode",
            UploadStage::LocalWrite => "local write",
            UploadStage::RemoteUpload => "remote upload",
            UploadStage::UrlFetch => "url fetch",
            UploadStage::RecordPush => "record push",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            UploadStage::Encode => 0,
            UploadStage::LocalWrite => 1,
            UploadStage::RemoteUpload => 2,
            UploadStage::UrlFetch => 3,
            UploadStage::RecordPush => 4,
        }
    }
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({})", self.step_number(), self.name())
    }
}

/// A capture whose chain stopped at `stage`. No record was written.
#[derive(Debug)]
pub struct UploadFailure {
    pub filename: String,
    pub stage: UploadStage,
    pub cause: anyhow::Error,
}

impl fmt::Display for UploadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "upload of {} failed at {}: {:#}",
            self.filename, self.stage, self.cause
        )
    }
}

impl std::error::Error for UploadFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

/// Result of a completed chain.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredCapture {
    pub id: RecordId,
    pub record: DetectionRecord,
    pub local_path: PathBuf,
}

pub struct UploadPipeline {
    pictures_dir: PathBuf,
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
    geocoder: Arc<dyn ReverseGeocoder>,
}

impl UploadPipeline {
    pub fn new<P: AsRef<Path>>(
        pictures_dir: P,
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordStore>,
        geocoder: Arc<dyn ReverseGeocoder>,
    ) -> Self {
        Self {
            pictures_dir: pictures_dir.as_ref().to_path_buf(),
            blobs,
            records,
            geocoder,
        }
    }

    pub fn pictures_dir(&self) -> &Path {
        &self.pictures_dir
    }

    /// Run every step for one capture, stopping at the first failure.
    /// Failures are logged here with filename and step; nothing is retried.
    pub fn run(&self, capture: &Capture) -> Result<StoredCapture, UploadFailure> {
        let result = self.steps(capture);
        match &result {
            Ok(stored) => log::info!(
                "record {} pushed for {} ({})",
                stored.id,
                capture.filename,
                stored.record.image_url
            ),
            Err(failure) => log::error!("{}", failure),
        }
        result
    }

    fn steps(&self, capture: &Capture) -> Result<StoredCapture, UploadFailure> {
        let fail = |stage: UploadStage| {
            let filename = capture.filename.clone();
            move |cause: anyhow::Error| UploadFailure {
                filename,
                stage,
                cause,
            }
        };

        let png = encode_png(capture).map_err(fail(UploadStage::Encode))?;
        let local_path = self
            .write_local(&capture.filename, &png)
            .map_err(fail(UploadStage::LocalWrite))?;

        let key = blob_key(&capture.filename);
        self.blobs
            .put(&key, &local_path)
            .map_err(fail(UploadStage::RemoteUpload))?;
        let image_url = self
            .blobs
            .url(&key)
            .map_err(fail(UploadStage::UrlFetch))?;

        let record = self
            .assemble(capture, image_url)
            .map_err(fail(UploadStage::RecordPush))?;
        let id = self
            .records
            .push(&record)
            .map_err(fail(UploadStage::RecordPush))?;
        Ok(StoredCapture {
            id,
            record,
            local_path,
        })
    }

    fn write_local(&self, filename: &str, png: &[u8]) -> Result<PathBuf> {
        if filename.is_empty() || filename.contains(['/', '\\']) {
            return Err(anyhow!("invalid capture filename '{}'", filename));
        }
        fs::create_dir_all(&self.pictures_dir)
            .with_context(|| format!("create {}", self.pictures_dir.display()))?;
        let path = self.pictures_dir.join(filename);
        fs::write(&path, png).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    fn assemble(&self, capture: &Capture, image_url: String) -> Result<DetectionRecord> {
        if image_url.is_empty() {
            return Err(anyhow!("blob store returned an empty url"));
        }
        let address = match capture.fix.coordinates() {
            Some((lat, lon)) => format_address(self.geocoder.as_ref(), lat, lon),
            None => UNKNOWN.to_string(),
        };
        Ok(DetectionRecord::new(
            capture.filename.clone(),
            image_url,
            capture.fix.latitude,
            capture.fix.longitude,
            address,
            now_ms()?,
        ))
    }
}

fn encode_png(capture: &Capture) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    capture
        .image
        .write_to(&mut out, ImageFormat::Png)
        .with_context(|| format!("encode {} as png", capture.filename))?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_numbering_and_display() {
        assert_eq!(UploadStage::Encode.step_number(), 1);
        assert_eq!(UploadStage::LocalWrite.step_number(), 1);
        assert_eq!(UploadStage::RemoteUpload.step_number(), 2);
        assert_eq!(UploadStage::UrlFetch.step_number(), 3);
        assert_eq!(UploadStage::RecordPush.step_number(), 4);
        assert_eq!(UploadStage::UrlFetch.to_string(), "step 3 (url fetch)");
        for (i, stage) in UploadStage::ALL.iter().enumerate() {
            assert_eq!(stage.index(), i);
        }
    }

    #[test]
    fn failure_names_file_step_and_cause() {
        let failure = UploadFailure {
            filename: "1.png".to_string(),
            stage: UploadStage::RemoteUpload,
            cause: anyhow!("connection reset"),
        };
        assert_eq!(
            failure.to_string(),
            "upload of 1.png failed at step 2 (remote upload): connection reset"
        );
    }
}

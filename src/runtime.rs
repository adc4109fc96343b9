//! Assembly of the pipeline from a `RoadscanConfig`.

use anyhow::Result;
use std::sync::Arc;

use crate::capture::{CaptureOrchestrator, CaptureSink, OverlaySurface};
use crate::config::{BlobSettings, RecordSettings, RoadscanConfig};
use crate::detect::{BackendRegistry, CpuBackend, DetectionTrigger, StubBackend};
use crate::frame::LatestFrame;
use crate::geo::{
    CachingGeocoder, GeolocationResolver, NmeaPositionProvider, NoGeocoder, NominatimGeocoder,
    PositionProvider, ReverseGeocoder, StaticPositionProvider, Subscription,
};
use crate::ingest::{DirectoryConfig, DirectorySource, FrameSource, StubSource};
use crate::store::{
    BlobStore, FilesystemBlobStore, FirebaseBlobStore, FirebaseRecordStore, RecordStore,
    SqliteRecordStore,
};
use crate::upload::{BlockingUploads, UploadPipeline, UploadQueue, UploadStats};
use crate::worker::{CaptureWorker, WorkerHandle};

const GEOCODE_CACHE_CAPACITY: usize = 1024;
const STUB_SOURCE_WIDTH: u32 = 640;
const STUB_SOURCE_HEIGHT: u32 = 480;

pub fn open_record_store(config: &RoadscanConfig) -> Result<Arc<dyn RecordStore>> {
    let store: Arc<dyn RecordStore> = match &config.records {
        RecordSettings::Sqlite { db_path } => Arc::new(SqliteRecordStore::open(db_path)?),
        RecordSettings::Firebase { url, auth_token } => {
            let mut store = FirebaseRecordStore::new(url, config.upload.step_timeout)?;
            if let Some(token) = auth_token {
                store = store.with_auth(token.clone());
            }
            Arc::new(store)
        }
    };
    Ok(store)
}

pub fn open_blob_store(config: &RoadscanConfig) -> Result<Arc<dyn BlobStore>> {
    let store: Arc<dyn BlobStore> = match &config.blob {
        BlobSettings::Filesystem { root } => Arc::new(FilesystemBlobStore::new(root)?),
        BlobSettings::Firebase {
            bucket,
            endpoint,
            auth_token,
        } => {
            let mut store =
                FirebaseBlobStore::new(bucket, endpoint.as_deref(), config.upload.step_timeout)?;
            if let Some(token) = auth_token {
                store = store.with_auth(token.clone());
            }
            Arc::new(store)
        }
    };
    Ok(store)
}

pub fn open_geocoder(config: &RoadscanConfig) -> Result<Arc<dyn ReverseGeocoder>> {
    let geocoder: Arc<dyn ReverseGeocoder> = match &config.location.geocoder_url {
        Some(url) => Arc::new(CachingGeocoder::new(
            NominatimGeocoder::new(url, config.upload.step_timeout)?,
            GEOCODE_CACHE_CAPACITY,
        )),
        None => Arc::new(NoGeocoder),
    };
    Ok(geocoder)
}

pub fn open_position_provider(config: &RoadscanConfig) -> Arc<dyn PositionProvider> {
    if let Some(path) = &config.location.nmea_path {
        return Arc::new(NmeaPositionProvider::new(path));
    }
    log::warn!("no positioning source configured; captures will carry unknown fixes");
    Arc::new(StaticPositionProvider::new(None))
}

/// Registry with every backend compiled into this build.
pub fn backend_registry(config: &RoadscanConfig) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    registry.register(CpuBackend::new());
    registry.register(StubBackend::new());
    register_model_backend(&mut registry, config);
    registry.set_default("cpu")?;
    Ok(registry)
}

#[cfg(feature = "backend-tract")]
fn register_model_backend(registry: &mut BackendRegistry, config: &RoadscanConfig) {
    if let Some(model_path) = &config.detector.model_path {
        registry.register(
            crate::detect::TractBackend::new(model_path, config.detector.input_size)
                .with_threshold(config.detector.confidence_threshold),
        );
    }
}

#[cfg(not(feature = "backend-tract"))]
fn register_model_backend(_registry: &mut BackendRegistry, config: &RoadscanConfig) {
    if config.detector.model_path.is_some() {
        log::warn!("detector model_path set but this build lacks the backend-tract feature");
    }
}

/// A configured pipeline: detector, location, stores and the upload queue.
pub struct Roadscan {
    config: RoadscanConfig,
    registry: BackendRegistry,
    trigger: DetectionTrigger,
    resolver: Arc<GeolocationResolver>,
    subscription: Option<Subscription>,
    records: Arc<dyn RecordStore>,
    queue: Arc<UploadQueue>,
    surface: Arc<OverlaySurface>,
}

impl Roadscan {
    pub fn from_config(config: RoadscanConfig) -> Result<Self> {
        let registry = backend_registry(&config)?;
        let trigger = match registry.activate(
            Some(config.detector.backend.as_str()),
            config.detector.accelerated,
        ) {
            Ok(backend) => DetectionTrigger::new(backend),
            Err(err) => {
                log::error!(
                    "detector '{}' unavailable, frames will not be analysed: {:#}",
                    config.detector.backend,
                    err
                );
                DetectionTrigger::unavailable()
            }
        };

        let geocoder = open_geocoder(&config)?;
        let resolver = Arc::new(GeolocationResolver::new(
            open_position_provider(&config),
            geocoder.clone(),
        ));
        let records = open_record_store(&config)?;
        let pipeline = Arc::new(UploadPipeline::new(
            &config.pictures_dir,
            open_blob_store(&config)?,
            records.clone(),
            geocoder,
        ));
        let queue = Arc::new(UploadQueue::start(
            pipeline,
            config.upload.workers,
            config.upload.queue_capacity,
        )?);

        Ok(Self {
            config,
            registry,
            trigger,
            resolver,
            subscription: None,
            records,
            queue,
            surface: Arc::new(OverlaySurface::new()),
        })
    }

    pub fn config(&self) -> &RoadscanConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<GeolocationResolver> {
        &self.resolver
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn surface(&self) -> &Arc<OverlaySurface> {
        &self.surface
    }

    pub fn upload_stats(&self) -> UploadStats {
        self.queue.stats()
    }

    /// Subscribe to continuous location updates. A provider that cannot
    /// start (missing device, no permission) leaves fixes unknown.
    pub fn start_location(&mut self) -> Result<()> {
        if self.subscription.is_some() {
            return Ok(());
        }
        match self
            .resolver
            .start(self.config.location.update_settings())
        {
            Ok(subscription) => self.subscription = subscription,
            Err(err) => log::warn!("location updates unavailable: {:#}", err),
        }
        Ok(())
    }

    pub fn orchestrator(&self) -> CaptureOrchestrator {
        self.orchestrator_with(self.queue.clone())
    }

    /// Orchestrator that waits for upload queue space rather than rejecting
    /// captures, for offline runs that must upload every detection.
    pub fn replay_orchestrator(&self) -> CaptureOrchestrator {
        self.orchestrator_with(Arc::new(BlockingUploads(self.queue.clone())))
    }

    fn orchestrator_with(&self, sink: Arc<dyn CaptureSink>) -> CaptureOrchestrator {
        CaptureOrchestrator::new(
            self.trigger.clone(),
            self.surface.clone(),
            self.resolver.clone(),
            sink,
        )
        .with_policy(self.config.capture.policy())
    }

    pub fn spawn_worker(&self, slot: Arc<LatestFrame>) -> Result<WorkerHandle> {
        CaptureWorker::spawn(slot, self.orchestrator())
    }

    /// Frame source named by the configuration: a directory of images, or
    /// the synthetic stub when no path is set.
    pub fn open_source(&self, looped: bool) -> Result<Box<dyn FrameSource>> {
        let source = &self.config.source;
        let frames: Box<dyn FrameSource> = match &source.path {
            Some(path) => Box::new(DirectorySource::new(DirectoryConfig {
                path: path.clone(),
                target_fps: source.target_fps,
                rotation: source.rotation,
                mirrored: source.mirrored,
                looped,
            })?),
            None => Box::new(
                StubSource::new(STUB_SOURCE_WIDTH, STUB_SOURCE_HEIGHT, source.target_fps)
                    .with_rotation(source.rotation),
            ),
        };
        Ok(frames)
    }

    /// Stop location updates, drain pending uploads and release the detector.
    pub fn shutdown(mut self) -> Result<UploadStats> {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel()?;
        }
        self.queue.shutdown()?;
        self.registry.close_all();
        let stats = self.queue.stats();
        log::info!(
            "shutdown: {} stored, {} failed, {} rejected",
            stats.stored,
            stats.failed_total(),
            stats.rejected
        );
        Ok(stats)
    }
}

impl Drop for Roadscan {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            if let Err(err) = subscription.cancel() {
                log::warn!("location subscription did not stop cleanly: {:#}", err);
            }
        }
    }
}

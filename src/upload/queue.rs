use anyhow::{anyhow, Context, Result};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use super::stats::{UploadCounters, UploadStats};
use super::UploadPipeline;
use crate::capture::{Capture, CaptureSink};

/// Bounded fan-out of captures to upload worker threads.
///
/// `submit` never blocks: a full queue rejects the capture. Each capture's
/// steps run in order on one worker; captures on different workers finish in
/// any order.
pub struct UploadQueue {
    sender: Mutex<Option<SyncSender<Capture>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<UploadCounters>,
    capacity: usize,
}

impl UploadQueue {
    pub fn start(pipeline: Arc<UploadPipeline>, workers: usize, capacity: usize) -> Result<Self> {
        if workers == 0 {
            return Err(anyhow!("upload queue needs at least one worker"));
        }
        if capacity == 0 {
            return Err(anyhow!("upload queue capacity must be at least 1"));
        }
        let (sender, receiver) = sync_channel::<Capture>(capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(UploadCounters::default());

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let receiver = receiver.clone();
            let pipeline = pipeline.clone();
            let counters = counters.clone();
            let handle = std::thread::Builder::new()
                .name(format!("upload-{}", index))
                .spawn(move || upload_loop(&receiver, &pipeline, &counters))
                .with_context(|| format!("spawn upload worker {}", index))?;
            handles.push(handle);
        }
        log::info!(
            "upload queue started ({} workers, capacity {})",
            workers,
            capacity
        );

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            counters,
            capacity,
        })
    }

    pub fn stats(&self) -> UploadStats {
        self.counters.snapshot()
    }

    /// Stop accepting captures, let the workers drain what is queued, and
    /// wait for them.
    pub fn shutdown(&self) -> Result<()> {
        self.sender
            .lock()
            .map_err(|_| anyhow!("upload sender lock poisoned"))?
            .take();
        let handles = std::mem::take(
            &mut *self
                .workers
                .lock()
                .map_err(|_| anyhow!("upload worker lock poisoned"))?,
        );
        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow!("upload worker panicked"))?;
        }
        Ok(())
    }

    /// Hand over a capture, waiting for queue space instead of rejecting.
    pub fn submit_blocking(&self, capture: Capture) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .map_err(|_| anyhow!("upload sender lock poisoned"))?;
        let Some(sender) = sender.as_ref() else {
            return Err(anyhow!("upload queue shut down; dropping {}", capture.filename));
        };
        sender
            .send(capture)
            .map_err(|e| anyhow!("upload workers gone; {} rejected", e.0.filename))?;
        self.counters.submitted();
        Ok(())
    }
}

fn upload_loop(
    receiver: &Mutex<Receiver<Capture>>,
    pipeline: &UploadPipeline,
    counters: &UploadCounters,
) {
    loop {
        let next = match receiver.lock() {
            Ok(receiver) => receiver.recv(),
            Err(_) => {
                log::error!("upload receiver lock poisoned; worker exiting");
                return;
            }
        };
        let Ok(capture) = next else {
            return;
        };
        counters.started();
        let outcome = pipeline.run(&capture).map(|_| ()).map_err(|f| f.stage);
        counters.finished(outcome);
    }
}

impl CaptureSink for UploadQueue {
    fn submit(&self, capture: Capture) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .map_err(|_| anyhow!("upload sender lock poisoned"))?;
        let Some(sender) = sender.as_ref() else {
            return Err(anyhow!("upload queue shut down; dropping {}", capture.filename));
        };
        match sender.try_send(capture) {
            Ok(()) => {
                self.counters.submitted();
                Ok(())
            }
            Err(TrySendError::Full(capture)) => {
                self.counters.rejected();
                log::warn!(
                    "upload queue full ({} pending); rejecting {}",
                    self.capacity,
                    capture.filename
                );
                Err(anyhow!("upload queue full; {} rejected", capture.filename))
            }
            Err(TrySendError::Disconnected(capture)) => {
                self.counters.rejected();
                Err(anyhow!("upload workers gone; {} rejected", capture.filename))
            }
        }
    }
}

/// Sink for offline replays: every capture is queued, the producer waits
/// while the queue is full.
pub struct BlockingUploads(pub Arc<UploadQueue>);

impl CaptureSink for BlockingUploads {
    fn submit(&self, capture: Capture) -> Result<()> {
        self.0.submit_blocking(capture)
    }
}

impl Drop for UploadQueue {
    fn drop(&mut self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

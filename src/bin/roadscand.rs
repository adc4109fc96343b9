//! roadscand - road hazard capture daemon
//!
//! This daemon:
//! 1. Loads configuration (`ROADSCAN_CONFIG` file plus environment overrides)
//! 2. Sets up the detector backend and continuous location updates
//! 3. Feeds frames from the configured source into the latest-frame slot
//! 4. Runs the capture thread; detections are uploaded on the bounded queue
//! 5. Logs worker and upload health periodically until Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use roadscan::{LatestFrame, Roadscan, RoadscanConfig};

const SOURCE_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "ROADSCAN_CONFIG")]
    config: Option<PathBuf>,
    /// Seconds between health log lines.
    #[arg(long, default_value_t = 30)]
    health_interval_secs: u64,
    /// Exit once a directory source is exhausted instead of looping it.
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = RoadscanConfig::load_from(args.config.as_deref())?;
    log::info!(
        "roadscand {} starting: pictures in {}, detector '{}' (accelerated={})",
        env!("CARGO_PKG_VERSION"),
        cfg.pictures_dir.display(),
        cfg.detector.backend,
        cfg.detector.accelerated
    );

    let mut roadscan = Roadscan::from_config(cfg)?;
    roadscan.start_location()?;

    let slot = Arc::new(LatestFrame::new());
    let worker = roadscan.spawn_worker(slot.clone())?;
    let mut source = roadscan.open_source(!args.once)?;
    log::info!("reading frames from {}", source.describe());

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;

    let health_interval = Duration::from_secs(args.health_interval_secs.max(1));
    let mut last_health_log = Instant::now();

    while running.load(Ordering::SeqCst) {
        match source.next_frame() {
            Ok(Some(frame)) => {
                slot.offer(frame)?;
            }
            Ok(None) => {
                log::info!("frame source exhausted");
                break;
            }
            Err(err) => {
                log::warn!("frame source error: {:#}", err);
                std::thread::sleep(SOURCE_RETRY_DELAY);
            }
        }

        if last_health_log.elapsed() >= health_interval {
            let frames = worker.stats();
            let uploads = roadscan.upload_stats();
            let fix = roadscan.resolver().current();
            log::info!(
                "health: frames read={} processed={} dropped={} captures={} rejected={} | uploads stored={} failed={} pending={} | fix known={}",
                source.frames_captured(),
                frames.processed,
                frames.dropped,
                frames.captures,
                frames.rejected,
                uploads.stored,
                uploads.failed_total(),
                uploads.pending(),
                fix.is_known()
            );
            last_health_log = Instant::now();
        }
    }

    let stats = if running.load(Ordering::SeqCst) {
        // Source ended: let the worker finish the last pending frame.
        slot.close();
        worker.join()?
    } else {
        log::info!("shutdown signal received, stopping capture...");
        worker.stop()?
    };
    log::info!(
        "capture stopped: {} frames processed, {} captures, {} dropped",
        stats.processed,
        stats.captures,
        stats.dropped
    );
    roadscan.shutdown()?;
    Ok(())
}

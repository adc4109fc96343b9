//! hazard_watch - warn about unfixed hazards near the current position
//!
//! Polls the record store and the positioning source; the first unfixed
//! hazard within the alert radius is announced once per session. A new
//! session starts after the position has been clear of hazards.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use roadscan::geo::{NoGeocoder, StaticPositionProvider};
use roadscan::proximity::ALERT_RADIUS_KM;
use roadscan::runtime::{open_position_provider, open_record_store};
use roadscan::{now_ms, GeolocationResolver, HazardWatch, Position, PositionProvider, RoadscanConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "ROADSCAN_CONFIG")]
    config: Option<PathBuf>,
    /// Fixed latitude instead of the configured positioning source.
    #[arg(long, requires = "longitude", allow_hyphen_values = true)]
    latitude: Option<f64>,
    /// Fixed longitude instead of the configured positioning source.
    #[arg(long, requires = "latitude", allow_hyphen_values = true)]
    longitude: Option<f64>,
    /// Alert radius in kilometres.
    #[arg(long, default_value_t = ALERT_RADIUS_KM)]
    radius_km: f64,
    /// Seconds between polls.
    #[arg(long, default_value_t = 5)]
    interval_secs: u64,
    /// Poll once and exit.
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = RoadscanConfig::load_from(args.config.as_deref())?;
    let store = open_record_store(&cfg)?;

    let provider: Arc<dyn PositionProvider> = match (args.latitude, args.longitude) {
        (Some(lat), Some(lon)) => Arc::new(StaticPositionProvider::new(Some(Position::new(
            lat,
            lon,
            now_ms()?,
        )))),
        _ => open_position_provider(&cfg),
    };
    let resolver = Arc::new(GeolocationResolver::new(provider, Arc::new(NoGeocoder)));
    let _subscription = resolver.start(cfg.location.update_settings())?;

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;

    let mut watch = HazardWatch::new(args.radius_km);
    let interval = Duration::from_secs(args.interval_secs.max(1));
    while running.load(Ordering::SeqCst) {
        let fix = resolver.sample();
        match fix.coordinates() {
            Some((latitude, longitude)) => {
                let position = Position::new(latitude, longitude, fix.captured_at_ms);
                let records = store.list()?;
                if let Some(alert) = watch.poll(&records, &position) {
                    log::warn!(
                        "hazard ahead: {} ({:.0} m, record {})",
                        alert.address,
                        alert.distance_km * 1000.0,
                        alert.id
                    );
                    println!("{}", serde_json::to_string(&alert)?);
                } else if watch.nearby(&records, &position).is_empty() {
                    watch.reset();
                }
            }
            None => log::debug!("no position fix yet"),
        }
        if args.once {
            break;
        }
        std::thread::sleep(interval);
    }
    Ok(())
}

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{Position, UpdateThrottle};

pub type PositionCallback = Box<dyn Fn(Position) + Send + Sync + 'static>;

/// Rate limits requested from a positioning provider.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UpdateSettings {
    pub interval: Duration,
    pub min_distance_m: f64,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            min_distance_m: 10.0,
        }
    }
}

impl UpdateSettings {
    pub fn throttle(&self) -> UpdateThrottle {
        UpdateThrottle::new(self.interval, self.min_distance_m)
    }
}

/// The platform positioning subsystem.
pub trait PositionProvider: Send + Sync {
    /// Deliver rate-limited updates to `callback` until the subscription is
    /// cancelled. Updates arrive on the provider's own thread.
    fn subscribe(&self, settings: UpdateSettings, callback: PositionCallback)
        -> Result<Subscription>;

    /// Most recent fix known to the subsystem, without waiting for a new one.
    fn last_known(&self) -> Option<Position>;

    /// Whether the process may read the device position.
    fn authorized(&self) -> bool {
        true
    }
}

/// Handle for an active location subscription.
///
/// Dropping the handle stops delivery without waiting for the provider
/// thread; `cancel` also joins it.
#[derive(Debug)]
pub struct Subscription {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(shutdown: Arc<AtomicBool>, join: Option<JoinHandle<()>>) -> Self {
        Self { shutdown, join }
    }

    pub fn is_active(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
    }

    pub fn cancel(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("location provider thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

struct Subscriber {
    throttle: UpdateThrottle,
    callback: PositionCallback,
    shutdown: Arc<AtomicBool>,
}

/// Provider driven by explicit `publish` calls.
///
/// Used for fixed installations with a surveyed position and for tests.
pub struct StaticPositionProvider {
    last: Mutex<Option<Position>>,
    authorized: AtomicBool,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl StaticPositionProvider {
    pub fn new(initial: Option<Position>) -> Self {
        Self {
            last: Mutex::new(initial),
            authorized: AtomicBool::new(true),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// A provider whose permission has not been granted.
    pub fn denied() -> Self {
        let provider = Self::new(None);
        provider.authorized.store(false, Ordering::SeqCst);
        provider
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }

    /// Record a new fix and deliver it to subscribers whose throttle admits it.
    pub fn publish(&self, position: Position) -> Result<()> {
        *self
            .last
            .lock()
            .map_err(|_| anyhow!("position lock poisoned"))? = Some(position);
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| anyhow!("subscriber lock poisoned"))?;
        subscribers.retain(|s| !s.shutdown.load(Ordering::SeqCst));
        let now = Instant::now();
        for subscriber in subscribers.iter_mut() {
            if subscriber.throttle.admit(position, now) {
                (subscriber.callback)(position);
            }
        }
        Ok(())
    }
}

impl Default for StaticPositionProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PositionProvider for StaticPositionProvider {
    fn subscribe(
        &self,
        settings: UpdateSettings,
        callback: PositionCallback,
    ) -> Result<Subscription> {
        let shutdown = Arc::new(AtomicBool::new(false));
        self.subscribers
            .lock()
            .map_err(|_| anyhow!("subscriber lock poisoned"))?
            .push(Subscriber {
                throttle: settings.throttle(),
                callback,
                shutdown: shutdown.clone(),
            });
        Ok(Subscription::new(shutdown, None))
    }

    fn last_known(&self) -> Option<Position> {
        if !self.authorized() {
            return None;
        }
        self.last.lock().ok().and_then(|p| *p)
    }

    fn authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn publish_respects_throttle_and_cancellation() -> Result<()> {
        let provider = StaticPositionProvider::new(None);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let subscription = provider.subscribe(
            UpdateSettings::default(),
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )?;

        provider.publish(Position::new(10.0, 10.0, 1))?;
        provider.publish(Position::new(10.0, 10.0, 2))?;
        provider.publish(Position::new(10.01, 10.0, 3))?;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(provider.last_known().map(|p| p.timestamp_ms), Some(3));

        subscription.cancel()?;
        provider.publish(Position::new(11.0, 10.0, 4))?;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test]
    fn denied_provider_reports_nothing() {
        let provider = StaticPositionProvider::denied();
        provider.publish(Position::new(1.0, 1.0, 1)).unwrap();
        assert!(provider.last_known().is_none());
        provider.set_authorized(true);
        assert!(provider.last_known().is_some());
    }
}

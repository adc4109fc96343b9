use anyhow::{anyhow, Result};
use std::sync::{Arc, RwLock};

use super::geocode::{format_address, ReverseGeocoder};
use super::provider::{PositionProvider, Subscription, UpdateSettings};
use super::{GeoFix, Position, UNKNOWN};
use crate::now_ms;

pub type DisplayCallback = Box<dyn Fn(&GeoFix) + Send + Sync + 'static>;

/// Owns the "current" fix slot.
///
/// The slot holds an immutable `GeoFix` behind an `Arc`; writers replace the
/// whole snapshot so readers never observe a half-updated fix. Only the
/// location callback writes it.
pub struct GeolocationResolver {
    positioning: Arc<dyn PositionProvider>,
    geocoder: Arc<dyn ReverseGeocoder>,
    current: RwLock<Arc<GeoFix>>,
    display: RwLock<Option<DisplayCallback>>,
}

impl GeolocationResolver {
    pub fn new(positioning: Arc<dyn PositionProvider>, geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        Self {
            positioning,
            geocoder,
            current: RwLock::new(Arc::new(GeoFix::unknown(now_ms().unwrap_or(0)))),
            display: RwLock::new(None),
        }
    }

    /// Surface that shows the latest resolved address.
    pub fn set_display(&self, display: DisplayCallback) -> Result<()> {
        *self
            .display
            .write()
            .map_err(|_| anyhow!("display lock poisoned"))? = Some(display);
        Ok(())
    }

    /// Begin continuous updates. Without location permission this logs and
    /// returns `None`; captures then fall back to unknown fixes.
    pub fn start(self: &Arc<Self>, settings: UpdateSettings) -> Result<Option<Subscription>> {
        if !self.positioning.authorized() {
            log::warn!("location permission not granted; fixes will be unknown");
            return Ok(None);
        }
        let resolver = Arc::downgrade(self);
        let subscription = self.positioning.subscribe(
            settings,
            Box::new(move |position| {
                if let Some(resolver) = resolver.upgrade() {
                    resolver.on_location(position);
                }
            }),
        )?;
        log::info!(
            "location updates started (interval {:?}, min distance {} m)",
            settings.interval,
            settings.min_distance_m
        );
        Ok(Some(subscription))
    }

    /// Location update callback: publish the coordinates, then the address
    /// once geocoding finishes.
    pub fn on_location(&self, position: Position) {
        self.replace(GeoFix::from_position(position, UNKNOWN));
        let address = self.resolve_address(position.latitude, position.longitude);
        let fix = GeoFix::from_position(position, address);
        if let Ok(display) = self.display.read() {
            if let Some(display) = display.as_ref() {
                display(&fix);
            }
        }
        self.replace(fix);
    }

    fn replace(&self, fix: GeoFix) {
        match self.current.write() {
            Ok(mut slot) => *slot = Arc::new(fix),
            Err(_) => log::error!("geofix slot poisoned; dropping location update"),
        }
    }

    /// Latest snapshot written by the update callback.
    pub fn current(&self) -> Arc<GeoFix> {
        self.current
            .read()
            .map(|slot| slot.clone())
            .unwrap_or_else(|_| Arc::new(GeoFix::unknown(now_ms().unwrap_or(0))))
    }

    /// Most recent fix known to the positioning subsystem, or an unknown fix
    /// when permission is missing or no fix was ever recorded. Never
    /// geocodes.
    pub fn last_known_fix(&self) -> GeoFix {
        if !self.positioning.authorized() {
            return GeoFix::unknown(now_ms().unwrap_or(0));
        }
        match self.positioning.last_known() {
            Some(position) => GeoFix::from_position(position, UNKNOWN),
            None => GeoFix::unknown(now_ms().unwrap_or(0)),
        }
    }

    /// Fix for a capture taken now. Uses the cached snapshot, falling back to
    /// the last known coordinates; never blocks on the network.
    pub fn sample(&self) -> Arc<GeoFix> {
        let current = self.current();
        if current.is_known() {
            return current;
        }
        Arc::new(self.last_known_fix())
    }

    /// `"<line>, <admin>, <country>"` or `"Unknown location"`.
    pub fn resolve_address(&self, latitude: f64, longitude: f64) -> String {
        format_address(self.geocoder.as_ref(), latitude, longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{Address, NoGeocoder, StaticPositionProvider, UNKNOWN_LOCATION};
    use std::sync::Mutex;

    struct FixedGeocoder;

    impl ReverseGeocoder for FixedGeocoder {
        fn reverse(&self, _lat: f64, _lon: f64) -> Result<Option<Address>> {
            Ok(Some(Address {
                line: "Main St".to_string(),
                admin_area: Some("CA".to_string()),
                country: Some("US".to_string()),
            }))
        }
    }

    #[test]
    fn continuous_updates_replace_current_fix() -> Result<()> {
        let provider = Arc::new(StaticPositionProvider::new(None));
        let resolver = Arc::new(GeolocationResolver::new(
            provider.clone(),
            Arc::new(FixedGeocoder),
        ));
        let shown = Arc::new(Mutex::new(Vec::new()));
        let sink = shown.clone();
        resolver.set_display(Box::new(move |fix| {
            sink.lock().unwrap().push(fix.address.clone())
        }))?;

        assert!(!resolver.current().is_known());
        let subscription = resolver.start(UpdateSettings::default())?.expect("authorized");
        provider.publish(Position::new(37.7749, -122.4194, 10))?;

        let fix = resolver.current();
        assert_eq!(fix.coordinates(), Some((37.7749, -122.4194)));
        assert_eq!(fix.address, "Main St, CA, US");
        assert_eq!(shown.lock().unwrap().as_slice(), ["Main St, CA, US"]);
        subscription.cancel()?;
        Ok(())
    }

    #[test]
    fn without_permission_everything_is_unknown() -> Result<()> {
        let provider = Arc::new(StaticPositionProvider::denied());
        provider.publish(Position::new(1.0, 2.0, 3))?;
        let resolver = Arc::new(GeolocationResolver::new(provider, Arc::new(NoGeocoder)));
        assert!(resolver.start(UpdateSettings::default())?.is_none());
        let fix = resolver.sample();
        assert!(!fix.is_known());
        assert_eq!(fix.address, UNKNOWN);
        Ok(())
    }

    #[test]
    fn sample_falls_back_to_last_known_without_geocoding() {
        let provider = Arc::new(StaticPositionProvider::new(Some(Position::new(5.0, 6.0, 7))));
        let resolver = GeolocationResolver::new(provider, Arc::new(FixedGeocoder));
        let fix = resolver.sample();
        assert_eq!(fix.coordinates(), Some((5.0, 6.0)));
        assert_eq!(fix.address, UNKNOWN);
    }

    #[test]
    fn geocoding_miss_yields_unknown_location() {
        let provider = Arc::new(StaticPositionProvider::new(None));
        let resolver = GeolocationResolver::new(provider, Arc::new(NoGeocoder));
        resolver.on_location(Position::new(1.0, 1.0, 1));
        assert_eq!(resolver.current().address, UNKNOWN_LOCATION);
    }
}

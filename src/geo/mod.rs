//! Geolocation: fixes, positioning providers, reverse geocoding.
//!
//! Every failure in this module degrades to the "unknown" sentinels instead
//! of aborting a capture: no permission, no fix and geocoding misses all
//! produce a usable `GeoFix`.

mod geocode;
mod nmea;
mod provider;
mod resolver;
mod throttle;

pub use geocode::{
    format_address, Address, CachingGeocoder, NoGeocoder, NominatimGeocoder, ReverseGeocoder,
};
pub use nmea::{parse_sentence, NmeaPositionProvider};
pub use provider::{
    PositionCallback, PositionProvider, StaticPositionProvider, Subscription, UpdateSettings,
};
pub use resolver::GeolocationResolver;
pub use throttle::UpdateThrottle;

use serde::{Deserialize, Serialize};

/// Sentinel for absent coordinates and for an address when no fix exists.
pub const UNKNOWN: &str = "unknown";

/// Address reported when the geocoder returns no result.
pub const UNKNOWN_LOCATION: &str = "Unknown location";

const EARTH_RADIUS_KM: f64 = 6371.0;

/// A position report from the positioning subsystem.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Epoch milliseconds at which the fix was taken.
    pub timestamp_ms: u64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64, timestamp_ms: u64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_ms,
        }
    }

    pub fn distance_km(&self, other: &Position) -> f64 {
        haversine_km(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Coordinate/address snapshot with explicit "unknown" fallbacks.
///
/// Instances are immutable once built; the resolver replaces the whole
/// snapshot rather than editing fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: String,
    /// Epoch milliseconds at which this snapshot was taken.
    pub captured_at_ms: u64,
}

impl GeoFix {
    /// No position available.
    pub fn unknown(captured_at_ms: u64) -> Self {
        Self {
            latitude: None,
            longitude: None,
            address: UNKNOWN.to_string(),
            captured_at_ms,
        }
    }

    pub fn from_position(position: Position, address: impl Into<String>) -> Self {
        Self {
            latitude: Some(position.latitude),
            longitude: Some(position.longitude),
            address: address.into(),
            captured_at_ms: position.timestamp_ms,
        }
    }

    /// `(latitude, longitude)` when both are known.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.coordinates().is_some()
    }
}

/// Great-circle distance in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

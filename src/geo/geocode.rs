//! Reverse geocoding: coordinates to a human-readable address.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use super::UNKNOWN_LOCATION;

const DEFAULT_USER_AGENT: &str = concat!("roadscan/", env!("CARGO_PKG_VERSION"));
const CACHE_PRECISION: f64 = 1e5;

/// Structured geocoder result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address {
    pub line: String,
    pub admin_area: Option<String>,
    pub country: Option<String>,
}

impl Address {
    /// `"<address line>, <admin area>, <country>"`, skipping absent parts.
    pub fn formatted(&self) -> String {
        let mut parts = vec![self.line.as_str()];
        parts.extend(self.admin_area.as_deref());
        parts.extend(self.country.as_deref());
        parts.retain(|p| !p.is_empty());
        parts.join(", ")
    }
}

pub trait ReverseGeocoder: Send + Sync {
    /// `Ok(None)` when the service has no result for the coordinates.
    fn reverse(&self, latitude: f64, longitude: f64) -> Result<Option<Address>>;
}

/// Resolve coordinates to a display string, degrading every miss or
/// failure to `"Unknown location"`.
pub fn format_address(geocoder: &dyn ReverseGeocoder, latitude: f64, longitude: f64) -> String {
    match geocoder.reverse(latitude, longitude) {
        Ok(Some(address)) => {
            let formatted = address.formatted();
            if formatted.is_empty() {
                UNKNOWN_LOCATION.to_string()
            } else {
                formatted
            }
        }
        Ok(None) => {
            log::debug!("no address for ({}, {})", latitude, longitude);
            UNKNOWN_LOCATION.to_string()
        }
        Err(err) => {
            log::debug!(
                "reverse geocoding ({}, {}) failed: {:#}",
                latitude,
                longitude,
                err
            );
            UNKNOWN_LOCATION.to_string()
        }
    }
}

/// Geocoder for deployments without a geocoding service.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoGeocoder;

impl ReverseGeocoder for NoGeocoder {
    fn reverse(&self, _latitude: f64, _longitude: f64) -> Result<Option<Address>> {
        Ok(None)
    }
}

// ----------------------------------------------------------------------------
// Nominatim
// ----------------------------------------------------------------------------

/// Nominatim `/reverse` client.
pub struct NominatimGeocoder {
    agent: ureq::Agent,
    base_url: url::Url,
}

#[derive(Debug, Deserialize)]
struct NominatimReply {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    address: HashMap<String, String>,
}

impl NominatimGeocoder {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = url::Url::parse(base_url)
            .with_context(|| format!("invalid geocoder url {}", base_url))?;
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build();
        Ok(Self { agent, base_url })
    }

    fn reverse_url(&self, latitude: f64, longitude: f64) -> Result<url::Url> {
        let mut url = self
            .base_url
            .join("reverse")
            .context("build geocoder reverse url")?;
        url.query_pairs_mut()
            .append_pair("format", "jsonv2")
            .append_pair("addressdetails", "1")
            .append_pair("lat", &latitude.to_string())
            .append_pair("lon", &longitude.to_string());
        Ok(url)
    }
}

impl ReverseGeocoder for NominatimGeocoder {
    fn reverse(&self, latitude: f64, longitude: f64) -> Result<Option<Address>> {
        let url = self.reverse_url(latitude, longitude)?;
        let reply: NominatimReply = self
            .agent
            .get(url.as_str())
            .call()
            .with_context(|| format!("reverse geocode via {}", self.base_url))?
            .into_json()
            .context("decode geocoder reply")?;
        Ok(address_from_reply(reply))
    }
}

fn address_from_reply(reply: NominatimReply) -> Option<Address> {
    if reply.error.is_some() {
        return None;
    }
    let field = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| reply.address.get(*k))
            .filter(|v| !v.is_empty())
            .cloned()
    };
    let street = match (field(&["house_number"]), field(&["road", "pedestrian", "path"])) {
        (Some(number), Some(road)) => Some(format!("{} {}", number, road)),
        (None, Some(road)) => Some(road),
        _ => None,
    };
    let locality = field(&["city", "town", "village", "suburb"]);
    let line = match (street, locality) {
        (Some(street), Some(locality)) => format!("{} {}", street, locality),
        (Some(street), None) => street,
        (None, Some(locality)) => locality,
        (None, None) => reply
            .display_name
            .as_deref()
            .and_then(|d| d.split(',').next())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())?,
    };
    Some(Address {
        line,
        admin_area: field(&["state", "region", "county"]),
        country: field(&["country"]),
    })
}

// ----------------------------------------------------------------------------
// Cache
// ----------------------------------------------------------------------------

/// Memoizes results by coordinates rounded to 1e-5 degrees (about a metre).
///
/// Misses (`Ok(None)`) are cached; errors are not.
pub struct CachingGeocoder<G> {
    inner: G,
    capacity: usize,
    entries: Mutex<Cache>,
}

#[derive(Default)]
struct Cache {
    map: HashMap<(i64, i64), Option<Address>>,
    order: VecDeque<(i64, i64)>,
}

impl<G: ReverseGeocoder> CachingGeocoder<G> {
    pub fn new(inner: G, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            entries: Mutex::new(Cache::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|c| c.map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cache_key(latitude: f64, longitude: f64) -> (i64, i64) {
    (
        (latitude * CACHE_PRECISION).round() as i64,
        (longitude * CACHE_PRECISION).round() as i64,
    )
}

impl<G: ReverseGeocoder> ReverseGeocoder for CachingGeocoder<G> {
    fn reverse(&self, latitude: f64, longitude: f64) -> Result<Option<Address>> {
        let key = cache_key(latitude, longitude);
        {
            let cache = self
                .entries
                .lock()
                .map_err(|_| anyhow!("geocoder cache lock poisoned"))?;
            if let Some(hit) = cache.map.get(&key) {
                return Ok(hit.clone());
            }
        }
        // Lookup runs unlocked; concurrent misses for one key both query.
        let result = self.inner.reverse(latitude, longitude)?;
        let mut cache = self
            .entries
            .lock()
            .map_err(|_| anyhow!("geocoder cache lock poisoned"))?;
        if cache.map.insert(key, result.clone()).is_none() {
            cache.order.push_back(key);
        }
        while cache.order.len() > self.capacity {
            if let Some(oldest) = cache.order.pop_front() {
                cache.map.remove(&oldest);
            }
        }
        Ok(result)
    }
}

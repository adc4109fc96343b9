//! Proximity alerts for unremediated hazards near the driver.

use serde::Serialize;
use std::collections::HashSet;

use crate::geo::{haversine_km, Position};
use crate::store::{DetectionRecord, RecordId};

/// Alert radius around the current position.
pub const ALERT_RADIUS_KM: f64 = 0.5;

/// A stored hazard placed on a map.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HazardMarker {
    pub id: RecordId,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub fixed: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HazardAlert {
    pub id: RecordId,
    pub address: String,
    pub distance_km: f64,
}

/// Announces the first nearby unfixed hazard of a session.
///
/// Each address is announced at most once; after one announcement the watch
/// stays quiet until `reset`.
pub struct HazardWatch {
    radius_km: f64,
    announced: HashSet<String>,
    alerted: bool,
}

impl Default for HazardWatch {
    fn default() -> Self {
        Self::new(ALERT_RADIUS_KM)
    }
}

impl HazardWatch {
    pub fn new(radius_km: f64) -> Self {
        Self {
            radius_km,
            announced: HashSet::new(),
            alerted: false,
        }
    }

    /// Records with known coordinates. Records stored with `"unknown"`
    /// coordinates cannot be placed and are skipped.
    pub fn markers(records: &[(RecordId, DetectionRecord)]) -> Vec<HazardMarker> {
        records
            .iter()
            .filter_map(|(id, record)| {
                let (latitude, longitude) = record.coordinates()?;
                Some(HazardMarker {
                    id: id.clone(),
                    latitude,
                    longitude,
                    address: record.address.clone(),
                    fixed: record.is_fixed(),
                })
            })
            .collect()
    }

    /// Unfixed hazards within the radius, nearest first.
    pub fn nearby(
        &self,
        records: &[(RecordId, DetectionRecord)],
        position: &Position,
    ) -> Vec<HazardAlert> {
        let mut alerts: Vec<HazardAlert> = Self::markers(records)
            .into_iter()
            .filter(|m| !m.fixed)
            .filter_map(|m| {
                let distance_km =
                    haversine_km(position.latitude, position.longitude, m.latitude, m.longitude);
                (distance_km <= self.radius_km).then_some(HazardAlert {
                    id: m.id,
                    address: m.address,
                    distance_km,
                })
            })
            .collect();
        alerts.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        alerts
    }

    /// The alert to announce for this position update, if any.
    pub fn poll(
        &mut self,
        records: &[(RecordId, DetectionRecord)],
        position: &Position,
    ) -> Option<HazardAlert> {
        if self.alerted {
            return None;
        }
        let alert = self
            .nearby(records, position)
            .into_iter()
            .find(|a| !self.announced.contains(&a.address))?;
        self.announced.insert(alert.address.clone());
        self.alerted = true;
        Some(alert)
    }

    /// Allow the next announcement. Already announced addresses stay silent.
    pub fn reset(&mut self) {
        self.alerted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(lat: Option<f64>, lon: Option<f64>, address: &str, status: &str) -> DetectionRecord {
        let mut record = DetectionRecord::new("1.png", "u", lat, lon, address, 1);
        record.status = status.to_string();
        record
    }

    fn records() -> Vec<(RecordId, DetectionRecord)> {
        vec![
            // ~110 m north
            (RecordId::new("a"), record(Some(37.7759), Some(-122.4194), "Near St", "unfixed")),
            // ~330 m north, already repaired
            (RecordId::new("b"), record(Some(37.7779), Some(-122.4194), "Fixed St", "Fixed")),
            // ~2.2 km north
            (RecordId::new("c"), record(Some(37.7949), Some(-122.4194), "Far St", "unfixed")),
            (RecordId::new("d"), record(None, None, "unknown", "unfixed")),
            // ~220 m north
            (RecordId::new("e"), record(Some(37.7769), Some(-122.4194), "Second St", "unfixed")),
        ]
    }

    fn here() -> Position {
        Position::new(37.7749, -122.4194, 0)
    }

    #[test]
    fn markers_skip_unknown_coordinates() {
        let markers = HazardWatch::markers(&records());
        assert_eq!(markers.len(), 4);
        assert!(markers.iter().any(|m| m.fixed));
    }

    #[test]
    fn nearby_filters_fixed_and_distant() {
        let watch = HazardWatch::default();
        let ids: Vec<_> = watch
            .nearby(&records(), &here())
            .into_iter()
            .map(|a| a.id.to_string())
            .collect();
        assert_eq!(ids, ["a", "e"]);
    }

    #[test]
    fn announces_once_per_session_and_address() {
        let mut watch = HazardWatch::default();
        let first = watch.poll(&records(), &here()).expect("alert");
        assert_eq!(first.address, "Near St");
        assert!(first.distance_km < 0.2);
        assert!(watch.poll(&records(), &here()).is_none());

        watch.reset();
        let second = watch.poll(&records(), &here()).expect("alert");
        assert_eq!(second.address, "Second St");

        watch.reset();
        assert!(watch.poll(&records(), &here()).is_none());
    }
}

use std::time::{Duration, Instant};

use super::Position;

/// Rate limiter for location updates.
///
/// An update is admitted when at least `interval` has passed since the last
/// admitted one, or the device moved at least `min_distance_m` from it,
/// whichever happens first. The first update is always admitted.
#[derive(Clone, Debug)]
pub struct UpdateThrottle {
    interval: Duration,
    min_distance_m: f64,
    last: Option<(Instant, Position)>,
}

impl UpdateThrottle {
    pub fn new(interval: Duration, min_distance_m: f64) -> Self {
        Self {
            interval,
            min_distance_m,
            last: None,
        }
    }

    pub fn admit(&mut self, position: Position, now: Instant) -> bool {
        let admitted = match &self.last {
            None => true,
            Some((at, last)) => {
                now.saturating_duration_since(*at) >= self.interval
                    || last.distance_km(&position) * 1000.0 >= self.min_distance_m
            }
        };
        if admitted {
            self.last = Some((now, position));
        }
        admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_on_interval_or_distance() {
        let mut throttle = UpdateThrottle::new(Duration::from_millis(1000), 10.0);
        let t0 = Instant::now();
        let here = Position::new(37.7749, -122.4194, 0);
        // ~1.1 m north
        let nudge = Position::new(37.77491, -122.4194, 0);
        // ~111 m north
        let moved = Position::new(37.7759, -122.4194, 0);

        assert!(throttle.admit(here, t0));
        assert!(!throttle.admit(nudge, t0 + Duration::from_millis(200)));
        assert!(throttle.admit(moved, t0 + Duration::from_millis(300)));
        assert!(!throttle.admit(moved, t0 + Duration::from_millis(900)));
        assert!(throttle.admit(moved, t0 + Duration::from_millis(1300)));
    }
}

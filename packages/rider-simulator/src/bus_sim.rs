//! bus_sim.rs: Bus motion along an ordered stop list
//!
//! The bus drives stop to stop in a straight line at cruise speed, dwells at
//! each stop, and turns around at either terminus. Positions are kept as
//! WGS84 points; distances use a local flat-earth approximation, which is
//! accurate to well under a metre over a city route.

use crowdtrack_types::GeoPoint;
use serde::Deserialize;

const METERS_PER_DEG_LAT: f64 = 111_320.0;

// ── Local geometry ────────────────────────────────────────────────────────────

/// Shifts `p` by the given north/east offsets in meters.
pub fn offset(p: GeoPoint, north_m: f64, east_m: f64) -> GeoPoint {
    let lat = p.lat + north_m / METERS_PER_DEG_LAT;
    let lon = p.lon + east_m / (METERS_PER_DEG_LAT * p.lat.to_radians().cos());
    GeoPoint::new(lat, lon)
}

/// (north, east) meters from `a` to `b`.
fn delta_m(a: GeoPoint, b: GeoPoint) -> (f64, f64) {
    let north = (b.lat - a.lat) * METERS_PER_DEG_LAT;
    let east = (b.lon - a.lon) * METERS_PER_DEG_LAT * a.lat.to_radians().cos();
    (north, east)
}

pub fn distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let (n, e) = delta_m(a, b);
    n.hypot(e)
}

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct StopSpec {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    pub vehicle_id: String,
    pub cruise_kmh: f64,
    pub dwell_s: f64,
    pub stops: Vec<StopSpec>,
}

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BusSim {
    pub position: GeoPoint,
    /// 0 = north, 90 = east
    pub heading_deg: f64,
    pub speed_kmh: f64,
    stops: Vec<GeoPoint>,
    next_stop: usize,
    forward: bool,
    dwell_left_s: f64,
    cruise_mps: f64,
    dwell_s: f64,
}

impl BusSim {
    /// Starts dwelling at the first stop. Needs at least two stops to move.
    pub fn new(cfg: &BusConfig) -> Self {
        let stops: Vec<GeoPoint> = cfg
            .stops
            .iter()
            .map(|s| GeoPoint::new(s.lat, s.lon))
            .collect();
        let position = stops.first().copied().unwrap_or_default();
        Self {
            position,
            heading_deg: 0.0,
            speed_kmh: 0.0,
            next_stop: 1.min(stops.len().saturating_sub(1)),
            forward: true,
            dwell_left_s: cfg.dwell_s,
            cruise_mps: cfg.cruise_kmh / 3.6,
            dwell_s: cfg.dwell_s,
            stops,
        }
    }

    pub fn is_dwelling(&self) -> bool {
        self.dwell_left_s > 0.0
    }

    /// Advance by `dt` seconds.
    pub fn tick(&mut self, mut dt: f64) {
        if self.stops.len() < 2 {
            self.speed_kmh = 0.0;
            return;
        }

        // Bounded so a route of coincident stops can't spin forever.
        let mut arrivals = 0;
        while dt > 0.0 && arrivals <= self.stops.len() {
            if self.dwell_left_s > 0.0 {
                let used = dt.min(self.dwell_left_s);
                self.dwell_left_s -= used;
                dt -= used;
                self.speed_kmh = 0.0;
                continue;
            }

            let target = self.stops[self.next_stop];
            let (n, e) = delta_m(self.position, target);
            let remaining = n.hypot(e);
            let step = self.cruise_mps * dt;

            if remaining > 1e-6 {
                self.heading_deg = e.atan2(n).to_degrees().rem_euclid(360.0);
            }

            if step < remaining {
                let f = step / remaining;
                self.position = offset(self.position, n * f, e * f);
                self.speed_kmh = self.cruise_mps * 3.6;
                return;
            }

            // Arrived: snap, dwell, pick the next stop.
            self.position = target;
            dt -= if self.cruise_mps > 0.0 { remaining / self.cruise_mps } else { dt };
            self.dwell_left_s = self.dwell_s;
            self.advance_stop();
            arrivals += 1;
        }
    }

    fn advance_stop(&mut self) {
        let last = self.stops.len() - 1;
        if self.forward && self.next_stop == last {
            self.forward = false;
        } else if !self.forward && self.next_stop == 0 {
            self.forward = true;
        }
        if self.forward {
            self.next_stop += 1;
        } else {
            self.next_stop -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> BusConfig {
        BusConfig {
            vehicle_id: "bus-1".into(),
            cruise_kmh: 36.0, // 10 m/s
            dwell_s: 20.0,
            stops: vec![
                StopSpec { name: "A".into(), lat: 9.00, lon: 38.75 },
                StopSpec { name: "B".into(), lat: 9.01, lon: 38.75 },
                StopSpec { name: "C".into(), lat: 9.02, lon: 38.75 },
            ],
        }
    }

    #[test]
    fn test_offset_roundtrip_distance() {
        let p = GeoPoint::new(9.0, 38.75);
        let q = offset(p, 300.0, 400.0);
        assert!((distance_m(p, q) - 500.0).abs() < 0.5);
    }

    #[test]
    fn test_bus_dwells_then_heads_north() {
        let mut bus = BusSim::new(&line());
        assert!(bus.is_dwelling());
        bus.tick(10.0);
        assert_eq!(bus.position, GeoPoint::new(9.00, 38.75));
        assert_eq!(bus.speed_kmh, 0.0);

        bus.tick(20.0); // 10 s dwell left, then 100 m of driving
        assert!(!bus.is_dwelling());
        let moved = distance_m(GeoPoint::new(9.00, 38.75), bus.position);
        assert!((moved - 100.0).abs() < 0.5, "moved {moved}");
        assert!(bus.heading_deg < 1.0 || bus.heading_deg > 359.0);
        assert!((bus.speed_kmh - 36.0).abs() < 1e-9);
    }

    #[test]
    fn test_bus_snaps_to_stop_and_dwells() {
        let mut bus = BusSim::new(&line());
        bus.tick(20.0);
        // A to B is ~1113 m: 120 s gets there with time to spare.
        bus.tick(120.0);
        assert_eq!(bus.position, GeoPoint::new(9.01, 38.75));
        assert!(bus.is_dwelling());
    }

    #[test]
    fn test_bus_turns_around_at_terminus() {
        let mut bus = BusSim::new(&line());
        // Dwell at A, drive to B, dwell, drive to C, dwell, and head back.
        for _ in 0..400 {
            bus.tick(1.0);
        }
        assert!(bus.position.lat < 9.02);
        assert!((bus.heading_deg - 180.0).abs() < 1.0);
    }

    #[test]
    fn test_single_stop_never_moves() {
        let mut cfg = line();
        cfg.stops.truncate(1);
        let mut bus = BusSim::new(&cfg);
        bus.tick(500.0);
        assert_eq!(bus.position, GeoPoint::new(9.00, 38.75));
    }
}

//! # schedule
//!
//! Consumed subset of the schedule subsystem: "may this vehicle report right
//! now" plus the ordered stop list for the resolved direction.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use crowdtrack_types::{stops_for_direction, Direction, RouteStop};
use serde::Deserialize;
use tracing::info;

use crate::error::{Result, TrackingError};

/// Outcome of a schedule lookup. `handle` is opaque to the engine and only
/// passed back into [`ScheduleGate::ordered_stops`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleWindow {
    pub active: bool,
    pub handle: Option<String>,
    pub direction: Direction,
}

impl ScheduleWindow {
    pub fn inactive() -> Self {
        Self {
            active: false,
            handle: None,
            direction: Direction::Departure,
        }
    }
}

#[async_trait]
pub trait ScheduleGate: Send + Sync {
    async fn is_vehicle_active(&self, vehicle_id: &str, at: DateTime<Utc>)
        -> Result<ScheduleWindow>;

    async fn ordered_stops(&self, handle: &str, direction: Direction) -> Result<Vec<RouteStop>>;
}

// ── Static schedule ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleFile {
    #[serde(default)]
    vehicles: Vec<VehicleEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VehicleEntry {
    vehicle_id: String,
    #[serde(default)]
    windows: Vec<WindowEntry>,
    #[serde(default)]
    stops: Vec<RouteStop>,
}

#[derive(Debug, Deserialize)]
struct WindowEntry {
    start: String,
    end: String,
    #[serde(default)]
    direction: Direction,
}

#[derive(Debug, Clone)]
struct ServiceWindow {
    start: NaiveTime,
    end: NaiveTime,
    direction: Direction,
}

impl ServiceWindow {
    /// Windows with `end < start` wrap past midnight.
    fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

#[derive(Debug, Clone)]
struct VehicleSchedule {
    /// Empty means in service all day, departure direction.
    windows: Vec<ServiceWindow>,
    departure_stops: Vec<RouteStop>,
}

/// Fixed daily service windows (UTC) per vehicle.
#[derive(Debug, Clone, Default)]
pub struct StaticSchedule {
    vehicles: HashMap<String, VehicleSchedule>,
    /// Unknown vehicles are treated as active with no stops.
    open: bool,
}

fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|e| TrackingError::Config(format!("bad service time {s:?}: {e}")))
}

impl StaticSchedule {
    /// A schedule that admits every vehicle all day without route data.
    pub fn open() -> Self {
        Self {
            vehicles: HashMap::new(),
            open: true,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: ScheduleFile = serde_json::from_str(json)?;
        let mut vehicles = HashMap::new();
        for v in file.vehicles {
            let windows = v
                .windows
                .iter()
                .map(|w| {
                    Ok(ServiceWindow {
                        start: parse_hhmm(&w.start)?,
                        end: parse_hhmm(&w.end)?,
                        direction: w.direction,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            vehicles.insert(
                v.vehicle_id,
                VehicleSchedule {
                    windows,
                    departure_stops: v.stops,
                },
            );
        }
        Ok(Self {
            vehicles,
            open: false,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TrackingError::Config(format!("read {}: {e}", path.display())))?;
        let schedule = Self::from_json_str(&raw)?;
        info!(
            "🗓️ Loaded schedule from {} ({} vehicles: {})",
            path.display(),
            schedule.vehicles.len(),
            schedule.vehicle_ids().join(", ")
        );
        Ok(schedule)
    }

    /// Registers a vehicle in service all day with the given departure stops.
    pub fn with_vehicle(mut self, vehicle_id: impl Into<String>, stops: Vec<RouteStop>) -> Self {
        self.vehicles.insert(
            vehicle_id.into(),
            VehicleSchedule {
                windows: Vec::new(),
                departure_stops: stops,
            },
        );
        self
    }

    pub fn vehicle_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.vehicles.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ScheduleGate for StaticSchedule {
    async fn is_vehicle_active(
        &self,
        vehicle_id: &str,
        at: DateTime<Utc>,
    ) -> Result<ScheduleWindow> {
        let Some(vehicle) = self.vehicles.get(vehicle_id) else {
            if self.open {
                return Ok(ScheduleWindow {
                    active: true,
                    handle: None,
                    direction: Direction::Departure,
                });
            }
            return Ok(ScheduleWindow::inactive());
        };

        let handle = Some(vehicle_id.to_string());
        if vehicle.windows.is_empty() {
            return Ok(ScheduleWindow {
                active: true,
                handle,
                direction: Direction::Departure,
            });
        }

        let t = at.time();
        Ok(match vehicle.windows.iter().find(|w| w.contains(t)) {
            Some(w) => ScheduleWindow {
                active: true,
                handle,
                direction: w.direction,
            },
            None => ScheduleWindow {
                active: false,
                handle,
                direction: Direction::Departure,
            },
        })
    }

    async fn ordered_stops(&self, handle: &str, direction: Direction) -> Result<Vec<RouteStop>> {
        Ok(self
            .vehicles
            .get(handle)
            .map(|v| stops_for_direction(&v.departure_stops, direction))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const JSON: &str = r#"{
        "vehicles": [{
            "vehicleId": "bus-1",
            "windows": [
                {"start": "06:00", "end": "09:00", "direction": "departure"},
                {"start": "16:00", "end": "19:00", "direction": "return"},
                {"start": "23:00", "end": "01:00"}
            ],
            "stops": [
                {"stopId": "A", "name": "A", "order": 1, "position": {"lat": 9.00, "lon": 38.75}, "radiusM": 50.0},
                {"stopId": "B", "name": "B", "order": 2, "position": {"lat": 9.01, "lon": 38.75}, "radiusM": 50.0},
                {"stopId": "C", "name": "C", "order": 3, "position": {"lat": 9.02, "lon": 38.75}, "radiusM": 50.0}
            ]
        }]
    }"#;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn test_window_resolves_direction() {
        let s = StaticSchedule::from_json_str(JSON).unwrap();
        let w = s.is_vehicle_active("bus-1", at(7, 30)).await.unwrap();
        assert!(w.active);
        assert_eq!(w.direction, Direction::Departure);

        let w = s.is_vehicle_active("bus-1", at(17, 0)).await.unwrap();
        assert!(w.active);
        assert_eq!(w.direction, Direction::Return);

        let w = s.is_vehicle_active("bus-1", at(12, 0)).await.unwrap();
        assert!(!w.active);
    }

    #[tokio::test]
    async fn test_window_wraps_midnight() {
        let s = StaticSchedule::from_json_str(JSON).unwrap();
        assert!(s.is_vehicle_active("bus-1", at(0, 30)).await.unwrap().active);
        assert!(s.is_vehicle_active("bus-1", at(23, 30)).await.unwrap().active);
    }

    #[tokio::test]
    async fn test_unknown_vehicle() {
        let s = StaticSchedule::from_json_str(JSON).unwrap();
        assert!(!s.is_vehicle_active("bus-9", at(7, 0)).await.unwrap().active);
        assert!(StaticSchedule::open().is_vehicle_active("bus-9", at(7, 0)).await.unwrap().active);
    }

    #[tokio::test]
    async fn test_return_stops_reversed() {
        let s = StaticSchedule::from_json_str(JSON).unwrap();
        let stops = s.ordered_stops("bus-1", Direction::Return).await.unwrap();
        let got: Vec<_> = stops.iter().map(|s| (s.stop_id.as_str(), s.order)).collect();
        assert_eq!(got, vec![("C", 1), ("B", 2), ("A", 3)]);
    }

    #[test]
    fn test_bad_time_is_config_error() {
        let json = r#"{"vehicles":[{"vehicleId":"x","windows":[{"start":"25:00","end":"26:00"}]}]}"#;
        assert!(matches!(
            StaticSchedule::from_json_str(json),
            Err(TrackingError::Config(_))
        ));
    }
}

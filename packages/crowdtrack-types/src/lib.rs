//! # crowdtrack-types
//!
//! Shared data model for the CrowdTrack crowdsourced bus positioning system.
//!
//! These types are used by:
//! - `backend-rust`: validation, trust scoring, clustering and aggregation
//! - `rider-simulator`: producing report submissions for load and scenario tests
//! - web / mobile clients: JSON payloads (camelCase on the wire)
//!
//! ## Lifecycle
//!
//! - [`LocationReport`] is append-only. It is created on ingestion and never
//!   mutated afterwards.
//! - [`DeviceTrustRecord`] is created on a device's first report (0.5 / 0.5)
//!   and rewritten by the trust scorer.
//! - [`TrackingSession`] bounds one rider's "I'm on this bus" burst. At most one
//!   is active per device.
//! - [`AggregatedPosition`] is one row per vehicle, overwritten every cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Geography ─────────────────────────────────────────────────────────────────

/// WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

// ── Route ─────────────────────────────────────────────────────────────────────

/// Trip direction. Resolved by the schedule collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Departure,
    Return,
}

/// One stop on a vehicle's route, scoped to a schedule and direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStop {
    pub stop_id: String,
    pub name: String,
    /// 1-based position in the ordered stop list for the current direction
    pub order: u32,
    pub position: GeoPoint,
    /// Coverage radius around the stop, meters
    pub radius_m: f64,
}

/// Orders departure stops for `direction`.
///
/// The return direction visits the same physical stops in reverse and
/// renumbers them 1..N, so stop A(1) B(2) C(3) becomes C(1) B(2) A(3).
pub fn stops_for_direction(departure: &[RouteStop], direction: Direction) -> Vec<RouteStop> {
    let mut stops = departure.to_vec();
    stops.sort_by_key(|s| s.order);
    if direction == Direction::Return {
        stops.reverse();
    }
    for (idx, stop) in stops.iter_mut().enumerate() {
        stop.order = idx as u32 + 1;
    }
    stops
}

// ── Reports ───────────────────────────────────────────────────────────────────

/// Raw report as submitted by a rider's phone, stamped with server receipt time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSubmission {
    /// Opaque (hashed) device identifier
    pub device_id: String,
    pub vehicle_id: String,
    pub lat: f64,
    pub lon: f64,
    /// Device-reported horizontal accuracy, meters
    pub accuracy_m: f64,
    /// Client-supplied speed, km/h
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
    /// Client-supplied heading, degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_deg: Option<f64>,
    pub client_timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

impl ReportSubmission {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

/// A persisted report. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationReport {
    pub id: Uuid,
    pub device_id: String,
    pub vehicle_id: String,
    pub lat: f64,
    pub lon: f64,
    pub accuracy_m: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_deg: Option<f64>,
    pub client_timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    /// Per-report weight used in trust-weighted aggregation, in [0, 1]
    pub reputation_weight: f64,
    /// Overall validation confidence at ingestion time
    pub confidence: f64,
    /// false for soft rejects kept for audit; those never feed aggregation
    pub is_validated: bool,
}

impl LocationReport {
    pub fn from_submission(
        submission: &ReportSubmission,
        reputation_weight: f64,
        confidence: f64,
        is_validated: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: submission.device_id.clone(),
            vehicle_id: submission.vehicle_id.clone(),
            lat: submission.lat,
            lon: submission.lon,
            accuracy_m: submission.accuracy_m,
            speed_kmh: submission.speed_kmh,
            heading_deg: submission.heading_deg,
            client_timestamp: submission.client_timestamp,
            received_at: submission.received_at,
            reputation_weight: reputation_weight.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            is_validated,
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

// ── Device Trust ──────────────────────────────────────────────────────────────

pub const DEFAULT_TRUST: f64 = 0.5;

/// Slowly-changing reliability estimate for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTrustRecord {
    pub device_id: String,
    pub reputation_score: f64,
    pub trust_score: f64,
    pub total_contributions: u64,
    pub accurate_contributions: u64,
    pub clustering_affinity: f64,
    pub movement_consistency: f64,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_recalculated: Option<DateTime<Utc>>,
}

impl DeviceTrustRecord {
    pub fn new(device_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            reputation_score: DEFAULT_TRUST,
            trust_score: DEFAULT_TRUST,
            total_contributions: 0,
            accurate_contributions: 0,
            clustering_affinity: DEFAULT_TRUST,
            movement_consistency: DEFAULT_TRUST,
            last_activity: now,
            last_recalculated: None,
        }
    }

    /// Clamps every score into [0, 1]. Called on every write.
    pub fn clamped(mut self) -> Self {
        self.reputation_score = clamp_unit(self.reputation_score);
        self.trust_score = clamp_unit(self.trust_score);
        self.clustering_affinity = clamp_unit(self.clustering_affinity);
        self.movement_consistency = clamp_unit(self.movement_consistency);
        self
    }

    pub fn accuracy_rate(&self) -> f64 {
        if self.total_contributions == 0 {
            return 0.0;
        }
        self.accurate_contributions as f64 / self.total_contributions as f64
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        DEFAULT_TRUST
    }
}

// ── Tracking Session ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// Rider pressed stop
    Stopped,
    /// A newer session for the same device replaced this one
    Superseded,
    InactivityTimeout,
    TripCompleted,
    /// Persistent outlier or static device
    Deactivated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSession {
    pub session_id: Uuid,
    pub device_id: String,
    pub vehicle_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<SessionEndReason>,
    /// Device trust when the session began
    pub trust_at_start: f64,
    pub locations_contributed: u64,
    pub valid_locations: u64,
    pub average_accuracy_m: f64,
}

impl TrackingSession {
    pub fn start(
        device_id: impl Into<String>,
        vehicle_id: impl Into<String>,
        trust_at_start: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            device_id: device_id.into(),
            vehicle_id: vehicle_id.into(),
            started_at: now,
            last_activity: now,
            ended_at: None,
            is_active: true,
            end_reason: None,
            trust_at_start: trust_at_start.clamp(0.0, 1.0),
            locations_contributed: 0,
            valid_locations: 0,
            average_accuracy_m: 0.0,
        }
    }

    /// Folds one accepted report into the running counters.
    pub fn record_contribution(&mut self, valid: bool, accuracy_m: f64, at: DateTime<Utc>) {
        let n = self.locations_contributed as f64;
        self.average_accuracy_m = (self.average_accuracy_m * n + accuracy_m) / (n + 1.0);
        self.locations_contributed += 1;
        if valid {
            self.valid_locations += 1;
        }
        if at > self.last_activity {
            self.last_activity = at;
        }
    }

    pub fn end(&mut self, reason: SessionEndReason, at: DateTime<Utc>) {
        self.is_active = false;
        self.ended_at = Some(at);
        self.end_reason = Some(reason);
    }
}

// ── Aggregated Position ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    /// At least one trusted tracker, more than one tracker
    Active,
    /// Exactly one tracker; confidence capped
    SingleTracker,
    /// Scheduled active but no trusted live data
    NoTracking,
    /// Outside its scheduled window
    Inactive,
    /// Never seen
    NoData,
}

/// Which step of the fallback cascade produced a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSource {
    TrustedCluster,
    LastKnown,
    Historical,
    None,
}

/// Snapshot of the last position computed from a trusted cluster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastKnownLocation {
    pub lat: f64,
    pub lon: f64,
    pub confidence: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedPosition {
    pub vehicle_id: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub confidence: f64,
    pub active_trackers: u32,
    pub trusted_trackers: u32,
    pub status: PositionStatus,
    pub source: PositionSource,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known: Option<LastKnownLocation>,
}

impl AggregatedPosition {
    pub fn no_data(vehicle_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            lat: None,
            lon: None,
            confidence: 0.0,
            active_trackers: 0,
            trusted_trackers: 0,
            status: PositionStatus::NoData,
            source: PositionSource::None,
            last_updated: now,
            last_known: None,
        }
    }

    pub fn point(&self) -> Option<GeoPoint> {
        Some(GeoPoint::new(self.lat?, self.lon?))
    }
}

// ── Broadcast ─────────────────────────────────────────────────────────────────

/// Payload pushed to real-time subscribers every cycle.
/// Always carries status and confidence so clients can render uncertainty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionBroadcast {
    pub vehicle_id: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub confidence: f64,
    pub trusted_trackers: u32,
    pub status: PositionStatus,
    pub timestamp: DateTime<Utc>,
}

impl From<&AggregatedPosition> for PositionBroadcast {
    fn from(p: &AggregatedPosition) -> Self {
        Self {
            vehicle_id: p.vehicle_id.clone(),
            lat: p.lat,
            lon: p.lon,
            confidence: p.confidence,
            trusted_trackers: p.trusted_trackers,
            status: p.status,
            timestamp: p.last_updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(id: &str, order: u32) -> RouteStop {
        RouteStop {
            stop_id: id.into(),
            name: id.into(),
            order,
            position: GeoPoint::new(9.0 + order as f64 * 0.01, 38.7),
            radius_m: 50.0,
        }
    }

    #[test]
    fn test_return_direction_reverses_and_renumbers() {
        let departure = vec![stop("A", 1), stop("B", 2), stop("C", 3)];
        let ret = stops_for_direction(&departure, Direction::Return);
        let ids: Vec<_> = ret.iter().map(|s| (s.stop_id.as_str(), s.order)).collect();
        assert_eq!(ids, vec![("C", 1), ("B", 2), ("A", 3)]);
    }

    #[test]
    fn test_departure_sorted_by_order() {
        let departure = vec![stop("B", 2), stop("A", 1)];
        let dep = stops_for_direction(&departure, Direction::Departure);
        assert_eq!(dep[0].stop_id, "A");
        assert_eq!(dep[1].order, 2);
    }

    #[test]
    fn test_session_running_average() {
        let now = Utc::now();
        let mut s = TrackingSession::start("d1", "bus-1", 0.5, now);
        s.record_contribution(true, 10.0, now);
        s.record_contribution(false, 30.0, now);
        assert_eq!(s.locations_contributed, 2);
        assert_eq!(s.valid_locations, 1);
        assert!((s.average_accuracy_m - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_trust_record_clamped() {
        let mut r = DeviceTrustRecord::new("d1", Utc::now());
        r.trust_score = 1.4;
        r.reputation_score = f64::NAN;
        let r = r.clamped();
        assert_eq!(r.trust_score, 1.0);
        assert_eq!(r.reputation_score, DEFAULT_TRUST);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&PositionStatus::SingleTracker).unwrap();
        assert_eq!(json, "\"single_tracker\"");
    }
}

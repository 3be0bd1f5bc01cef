//! # validator
//!
//! Seven independent checks over one incoming report, combined by a fixed
//! weight vector into a confidence score.
//!
//! - Boundary, timestamp and schedule are hard gates. A boundary failure
//!   short-circuits everything else with zero confidence.
//! - Speed, route, accuracy and movement are compensable: they lower the
//!   overall confidence, and only the `min_confidence` floor decides.
//!
//! The validator is pure. The engine fetches the previous report, recent
//! history and schedule data and passes them in through [`ValidationInput`].

use chrono::{Datelike, DateTime, Utc};
use crowdtrack_types::{Direction, GeoPoint, LocationReport, ReportSubmission, RouteStop};
use serde::Serialize;

use crate::config::{EngineConfig, RegionConfig, ValidationConfig};
use crate::error::RejectReason;
use crate::geo;
use crate::movement::{MovementAnalyzer, MovementPattern, TimedPoint};
use crate::route_gate::{Progression, RouteAssessment, RouteGate};
use crate::schedule::ScheduleWindow;

// ── Flags ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFlag {
    OutsideServiceArea,
    InvalidCoordinates,
    TooFrequent,
    ExtremelyHighSpeed,
    HighSpeed,
    ExcessiveAcceleration,
    OffRoute,
    OutsideCorridor,
    Backtracking,
    NoRouteData,
    TimestampOutOfTolerance,
    TimestampInFuture,
    ImplausibleTimestamp,
    PoorGpsAccuracy,
    InvalidAccuracy,
    StationaryTooLong,
    ErraticBearing,
    InconsistentSpeed,
    SuspiciousMovement,
    VehicleNotScheduled,
    LowConfidence,
}

impl ValidationFlag {
    pub fn recommendation(&self) -> Option<&'static str> {
        Some(match self {
            Self::OutsideServiceArea => "Location is outside the service area; tracking is only available inside the city",
            Self::InvalidCoordinates => "Location could not be determined; wait for a GPS fix and try again",
            Self::TooFrequent => "Reports are being sent too often; wait a few seconds between updates",
            Self::ExtremelyHighSpeed => "Movement is faster than a bus can travel; check that location services are working",
            Self::ExcessiveAcceleration => "Location jumped unexpectedly; wait for the GPS signal to settle",
            Self::OffRoute => "You appear to be away from this bus route; confirm you selected the right bus",
            Self::Backtracking => "You appear to be moving against the route direction; confirm the bus and direction",
            Self::TimestampOutOfTolerance | Self::TimestampInFuture | Self::ImplausibleTimestamp => {
                "Device clock looks wrong; enable automatic date and time"
            }
            Self::PoorGpsAccuracy | Self::InvalidAccuracy => {
                "Poor GPS accuracy; move to an open area or near a window"
            }
            Self::StationaryTooLong => "You have not moved for a while; stop tracking if you left the bus",
            Self::ErraticBearing | Self::InconsistentSpeed | Self::SuspiciousMovement => {
                "Movement does not look like a bus ride; keep the phone with you on the bus"
            }
            Self::VehicleNotScheduled => "This bus is not in service right now; check the schedule",
            Self::LowConfidence => "Location could not be confirmed; keep tracking and it will improve",
            Self::HighSpeed | Self::OutsideCorridor | Self::NoRouteData => return None,
        })
    }
}

// ── Per-check results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundaryResult {
    pub valid: bool,
    pub within_region: bool,
    pub obviously_invalid: bool,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeedResult {
    pub valid: bool,
    pub throttled: bool,
    pub speed_kmh: Option<f64>,
    pub acceleration_ms2: Option<f64>,
    pub time_delta_secs: Option<f64>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteResult {
    pub valid: bool,
    pub has_route_data: bool,
    pub within_stop_radius: bool,
    pub within_corridor: bool,
    pub corridor_distance_m: Option<f64>,
    pub progression: Option<&'static str>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimestampResult {
    pub valid: bool,
    /// client minus server, seconds
    pub skew_secs: f64,
    pub in_future: bool,
    pub implausible: bool,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyResult {
    pub valid: bool,
    pub accuracy_m: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovementResult {
    pub valid: bool,
    pub pattern: MovementPattern,
    pub stationary_too_long: bool,
    pub erratic_bearing: bool,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleResult {
    pub valid: bool,
    pub direction: Direction,
    pub confidence: f64,
}

/// Results of every check after the boundary gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckBreakdown {
    pub speed: SpeedResult,
    pub route: RouteResult,
    pub timestamp: TimestampResult,
    pub accuracy: AccuracyResult,
    pub movement: MovementResult,
    pub schedule: ScheduleResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub valid: bool,
    pub confidence_score: f64,
    pub flags: Vec<ValidationFlag>,
    pub recommendations: Vec<String>,
    /// Set when a hard gate failed; the report must not be persisted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject: Option<RejectReason>,
    pub boundary: BoundaryResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<CheckBreakdown>,
}

impl ValidationOutcome {
    pub fn is_hard_reject(&self) -> bool {
        self.reject.is_some()
    }

    pub fn primary_recommendation(&self) -> String {
        self.recommendations
            .first()
            .cloned()
            .unwrap_or_else(|| "Report could not be validated".to_string())
    }
}

// ── Input ─────────────────────────────────────────────────────────────────────

pub struct ValidationInput<'a> {
    pub submission: &'a ReportSubmission,
    /// Device's immediately preceding accepted report within the lookback
    pub previous: Option<&'a LocationReport>,
    /// Device's recent validated reports, oldest first
    pub history: &'a [LocationReport],
    pub schedule: &'a ScheduleWindow,
    /// Ordered for `schedule.direction`; empty when unknown
    pub stops: &'a [RouteStop],
}

// ── Validator ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReportValidator {
    cfg: ValidationConfig,
    region: RegionConfig,
    movement: MovementAnalyzer,
    route: RouteGate,
}

impl ReportValidator {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            cfg: cfg.validation.clone(),
            region: cfg.region.clone(),
            movement: MovementAnalyzer::new(cfg.movement.clone()),
            route: RouteGate::new(&cfg.validation),
        }
    }

    pub fn validate(&self, input: &ValidationInput<'_>) -> ValidationOutcome {
        let sub = input.submission;
        let point = sub.point();
        let mut flags = Vec::new();

        let boundary = self.check_boundary(point);
        if !boundary.valid {
            let (flag, reason) = if boundary.obviously_invalid {
                (ValidationFlag::InvalidCoordinates, RejectReason::InvalidCoordinates)
            } else {
                (ValidationFlag::OutsideServiceArea, RejectReason::OutsideServiceArea)
            };
            flags.push(flag);
            return ValidationOutcome {
                valid: false,
                confidence_score: 0.0,
                recommendations: recommendations(&flags),
                flags,
                reject: Some(reason),
                boundary,
                checks: None,
            };
        }

        let speed = self.check_speed(sub, input.previous, input.history, &mut flags);
        let route = self.check_route(point, input.history, input.stops, &mut flags);
        let timestamp = self.check_timestamp(sub, &mut flags);
        let accuracy = self.check_accuracy(sub.accuracy_m, &mut flags);
        let movement = self.check_movement(sub, input.history, &mut flags);
        let schedule = check_schedule(input.schedule, &mut flags);

        let w = &self.cfg.weights;
        let confidence = (w.boundary * boundary.confidence
            + w.speed * speed.confidence
            + w.route * route.confidence
            + w.timestamp * timestamp.confidence
            + w.accuracy * accuracy.confidence
            + w.movement * movement.confidence
            + w.schedule * schedule.confidence)
            .clamp(0.0, 1.0);

        let reject = if !timestamp.valid {
            Some(if timestamp.implausible {
                RejectReason::ImplausibleTimestamp
            } else if timestamp.in_future {
                RejectReason::TimestampInFuture
            } else {
                RejectReason::TimestampOutOfTolerance
            })
        } else if !schedule.valid {
            Some(RejectReason::VehicleNotScheduled)
        } else {
            None
        };

        let valid = reject.is_none() && confidence >= self.cfg.min_confidence;
        if reject.is_none() && !valid {
            flags.push(ValidationFlag::LowConfidence);
        }

        ValidationOutcome {
            valid,
            confidence_score: confidence,
            recommendations: recommendations(&flags),
            flags,
            reject,
            boundary,
            checks: Some(CheckBreakdown {
                speed,
                route,
                timestamp,
                accuracy,
                movement,
                schedule,
            }),
        }
    }

    pub fn check_boundary(&self, p: GeoPoint) -> BoundaryResult {
        let r = &self.region;
        let eps = r.near_zero_epsilon;
        let obviously_invalid = !p.is_finite()
            || p.lat.abs() > 90.0
            || p.lon.abs() > 180.0
            || (p.lat.abs() < eps && p.lon.abs() < eps);
        let within_region = !obviously_invalid
            && (r.min_lat..=r.max_lat).contains(&p.lat)
            && (r.min_lon..=r.max_lon).contains(&p.lon);
        let valid = within_region && !obviously_invalid;
        BoundaryResult {
            valid,
            within_region,
            obviously_invalid,
            confidence: if valid { 1.0 } else { 0.0 },
        }
    }

    fn check_speed(
        &self,
        sub: &ReportSubmission,
        previous: Option<&LocationReport>,
        history: &[LocationReport],
        flags: &mut Vec<ValidationFlag>,
    ) -> SpeedResult {
        let Some(prev) = previous else {
            return SpeedResult {
                valid: true,
                throttled: false,
                speed_kmh: None,
                acceleration_ms2: None,
                time_delta_secs: None,
                confidence: 1.0,
            };
        };

        let dt = seconds_between(prev.received_at, sub.received_at);
        if dt < self.cfg.min_report_interval_secs as f64 {
            flags.push(ValidationFlag::TooFrequent);
            return SpeedResult {
                valid: true,
                throttled: true,
                speed_kmh: None,
                acceleration_ms2: None,
                time_delta_secs: Some(dt),
                confidence: 0.3,
            };
        }

        let speed_ms = geo::distance(prev.point(), sub.point()) / dt;
        let speed_kmh = speed_ms * 3.6;

        // Previous speed from the leg leading into `prev`, else the client's own figure.
        let prev_speed_ms = history
            .iter()
            .rev()
            .find(|h| h.received_at < prev.received_at && h.id != prev.id)
            .and_then(|before| {
                let leg_dt = seconds_between(before.received_at, prev.received_at);
                (leg_dt > 0.0).then(|| geo::distance(before.point(), prev.point()) / leg_dt)
            })
            .or_else(|| prev.speed_kmh.map(|v| v / 3.6));
        let acceleration = prev_speed_ms.map(|v0| (speed_ms - v0).abs() / dt);

        let (valid, confidence) = if speed_kmh > self.cfg.max_speed_kmh {
            flags.push(ValidationFlag::ExtremelyHighSpeed);
            (false, 0.0)
        } else if acceleration.is_some_and(|a| a > self.cfg.max_acceleration_ms2) {
            flags.push(ValidationFlag::ExcessiveAcceleration);
            (false, 0.2)
        } else if speed_kmh > self.cfg.warn_speed_kmh {
            flags.push(ValidationFlag::HighSpeed);
            (true, 0.7)
        } else {
            (true, 1.0)
        };

        SpeedResult {
            valid,
            throttled: false,
            speed_kmh: Some(speed_kmh),
            acceleration_ms2: acceleration,
            time_delta_secs: Some(dt),
            confidence,
        }
    }

    fn check_route(
        &self,
        point: GeoPoint,
        history: &[LocationReport],
        stops: &[RouteStop],
        flags: &mut Vec<ValidationFlag>,
    ) -> RouteResult {
        let trail: Vec<GeoPoint> = history.iter().map(|r| r.point()).collect();
        let Some(RouteAssessment {
            nearest,
            progression,
            corridor,
            stop_score,
            corridor_score,
        }) = self.route.assess(stops, &trail, point)
        else {
            flags.push(ValidationFlag::NoRouteData);
            return RouteResult {
                valid: true,
                has_route_data: false,
                within_stop_radius: false,
                within_corridor: false,
                corridor_distance_m: None,
                progression: None,
                confidence: 0.7,
            };
        };

        let confidence =
            (0.3 * stop_score + 0.3 * progression.score() + 0.4 * corridor_score).clamp(0.0, 1.0);
        let valid = confidence >= self.cfg.route_min_score;
        if !valid {
            flags.push(ValidationFlag::OffRoute);
        }
        if !corridor.within {
            flags.push(ValidationFlag::OutsideCorridor);
        }
        if progression == Progression::Backtracking {
            flags.push(ValidationFlag::Backtracking);
        }

        RouteResult {
            valid,
            has_route_data: true,
            within_stop_radius: nearest.within_radius,
            within_corridor: corridor.within,
            corridor_distance_m: Some(corridor.distance_m),
            progression: Some(match progression {
                Progression::Progressing => "progressing",
                Progression::Backtracking => "backtracking",
                Progression::Inconclusive => "inconclusive",
            }),
            confidence,
        }
    }

    fn check_timestamp(
        &self,
        sub: &ReportSubmission,
        flags: &mut Vec<ValidationFlag>,
    ) -> TimestampResult {
        let c = &self.cfg;
        let skew = seconds_between(sub.received_at, sub.client_timestamp);
        let year = sub.client_timestamp.year();
        let implausible = year < c.min_plausible_year || year > sub.received_at.year() + 1;
        let in_future = skew > c.max_future_skew_secs as f64;
        let out_of_tolerance = skew.abs() > c.timestamp_tolerance_secs as f64;

        let valid = !(implausible || in_future || out_of_tolerance);
        if implausible {
            flags.push(ValidationFlag::ImplausibleTimestamp);
        } else if in_future {
            flags.push(ValidationFlag::TimestampInFuture);
        } else if out_of_tolerance {
            flags.push(ValidationFlag::TimestampOutOfTolerance);
        }

        let confidence = if !valid {
            0.0
        } else {
            let good = c.timestamp_good_skew_secs as f64;
            let tol = (c.timestamp_tolerance_secs as f64).max(good + 1.0);
            if skew.abs() <= good {
                1.0
            } else {
                1.0 - 0.5 * (skew.abs() - good) / (tol - good)
            }
        };

        TimestampResult {
            valid,
            skew_secs: skew,
            in_future,
            implausible,
            confidence,
        }
    }

    fn check_accuracy(&self, accuracy_m: f64, flags: &mut Vec<ValidationFlag>) -> AccuracyResult {
        let c = &self.cfg;
        if !accuracy_m.is_finite() || accuracy_m < 0.0 {
            flags.push(ValidationFlag::InvalidAccuracy);
            return AccuracyResult {
                valid: false,
                accuracy_m,
                confidence: 0.0,
            };
        }
        let (valid, confidence) = if accuracy_m <= c.accuracy_excellent_m {
            (true, 1.0)
        } else if accuracy_m <= c.accuracy_good_m {
            (true, 0.9)
        } else if accuracy_m <= c.accuracy_fair_m {
            (true, 0.7)
        } else if accuracy_m <= c.accuracy_max_m {
            flags.push(ValidationFlag::PoorGpsAccuracy);
            (true, 0.4)
        } else {
            flags.push(ValidationFlag::PoorGpsAccuracy);
            (false, 0.0)
        };
        AccuracyResult {
            valid,
            accuracy_m,
            confidence,
        }
    }

    fn check_movement(
        &self,
        sub: &ReportSubmission,
        history: &[LocationReport],
        flags: &mut Vec<ValidationFlag>,
    ) -> MovementResult {
        let skip = history.len().saturating_sub(self.cfg.movement_history_limit);
        let points: Vec<TimedPoint> = history[skip..]
            .iter()
            .map(|r| TimedPoint::new(r.point(), r.received_at))
            .chain(std::iter::once(TimedPoint::new(sub.point(), sub.received_at)))
            .collect();
        let analysis = self.movement.analyze(&points);

        let stationary_too_long = analysis.pattern == MovementPattern::Stationary;
        let erratic_bearing = !analysis.direction.consistent;
        if stationary_too_long {
            flags.push(ValidationFlag::StationaryTooLong);
        }
        if erratic_bearing {
            flags.push(ValidationFlag::ErraticBearing);
        }
        if !analysis.speed.consistent {
            flags.push(ValidationFlag::InconsistentSpeed);
        }
        if analysis.pattern == MovementPattern::TooFast {
            flags.push(ValidationFlag::SuspiciousMovement);
        }

        MovementResult {
            valid: analysis.pattern != MovementPattern::TooFast
                && analysis.confidence >= self.cfg.movement_min_confidence,
            pattern: analysis.pattern,
            stationary_too_long,
            erratic_bearing,
            confidence: analysis.confidence,
        }
    }
}

fn check_schedule(window: &ScheduleWindow, flags: &mut Vec<ValidationFlag>) -> ScheduleResult {
    if !window.active {
        flags.push(ValidationFlag::VehicleNotScheduled);
    }
    ScheduleResult {
        valid: window.active,
        direction: window.direction,
        confidence: if window.active { 1.0 } else { 0.0 },
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

fn recommendations(flags: &[ValidationFlag]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for text in flags.iter().filter_map(|f| f.recommendation()) {
        if !out.iter().any(|r| r == text) {
            out.push(text.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route_gate::tests::line_stops;
    use chrono::{Duration, TimeZone};

    fn validator() -> ReportValidator {
        ReportValidator::new(&EngineConfig::default())
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, 8, 0, 0).unwrap()
    }

    fn sub(lat: f64, lon: f64, acc: f64, at: DateTime<Utc>) -> ReportSubmission {
        ReportSubmission {
            device_id: "dev-a".into(),
            vehicle_id: "bus-1".into(),
            lat,
            lon,
            accuracy_m: acc,
            speed_kmh: None,
            heading_deg: None,
            client_timestamp: at,
            received_at: at,
        }
    }

    fn accepted(s: &ReportSubmission) -> LocationReport {
        LocationReport::from_submission(s, 0.8, 0.9, true)
    }

    fn active() -> ScheduleWindow {
        ScheduleWindow {
            active: true,
            handle: Some("bus-1".into()),
            direction: Direction::Departure,
        }
    }

    fn run(
        v: &ReportValidator,
        s: &ReportSubmission,
        previous: Option<&LocationReport>,
        history: &[LocationReport],
        window: &ScheduleWindow,
        stops: &[RouteStop],
    ) -> ValidationOutcome {
        v.validate(&ValidationInput {
            submission: s,
            previous,
            history,
            schedule: window,
            stops,
        })
    }

    #[test]
    fn test_fresh_device_good_fix_is_valid() {
        let v = validator();
        let s = sub(9.005, 38.75, 15.0, t0());
        let out = run(&v, &s, None, &[], &active(), &line_stops());
        assert!(out.valid, "{out:?}");
        assert!(out.confidence_score >= 0.6);
        assert!(out.reject.is_none());
    }

    #[test]
    fn test_fresh_device_without_route_data_is_valid() {
        let v = validator();
        let s = sub(9.005, 38.75, 20.0, t0());
        let out = run(&v, &s, None, &[], &active(), &[]);
        assert!(out.valid);
        assert!(out.flags.contains(&ValidationFlag::NoRouteData));
    }

    #[test]
    fn test_null_island_short_circuits() {
        let v = validator();
        let s = sub(0.0, 0.0, 5.0, t0());
        let out = run(&v, &s, None, &[], &active(), &line_stops());
        assert!(!out.valid);
        assert_eq!(out.confidence_score, 0.0);
        assert_eq!(out.reject, Some(RejectReason::InvalidCoordinates));
        assert!(out.checks.is_none());
        assert!(!out.recommendations.is_empty());
    }

    #[test]
    fn test_outside_region_rejected() {
        let v = validator();
        let s = sub(8.0, 38.75, 5.0, t0());
        let out = run(&v, &s, None, &[], &active(), &[]);
        assert_eq!(out.reject, Some(RejectReason::OutsideServiceArea));
        assert_eq!(out.confidence_score, 0.0);
    }

    #[test]
    fn test_speed_over_max_fails_speed_check() {
        let v = validator();
        let first = sub(9.000, 38.75, 10.0, t0());
        let prev = accepted(&first);
        // ~1.1 km in 30 s ≈ 133 km/h
        let second = sub(9.010, 38.75, 10.0, t0() + Duration::seconds(30));
        let out = run(&v, &second, Some(&prev), &[prev.clone()], &active(), &[]);
        let speed = &out.checks.as_ref().unwrap().speed;
        assert!(!speed.valid);
        assert!(speed.speed_kmh.unwrap() > 80.0);
        assert!(out.flags.contains(&ValidationFlag::ExtremelyHighSpeed));
    }

    #[test]
    fn test_too_frequent_is_throttle() {
        let v = validator();
        let prev = accepted(&sub(9.000, 38.75, 10.0, t0()));
        let s = sub(9.0001, 38.75, 10.0, t0() + Duration::seconds(2));
        let out = run(&v, &s, Some(&prev), &[prev.clone()], &active(), &[]);
        let speed = &out.checks.as_ref().unwrap().speed;
        assert!(speed.throttled && speed.valid);
        assert!(out.flags.contains(&ValidationFlag::TooFrequent));
    }

    #[test]
    fn test_acceleration_limit() {
        let v = validator();
        let a = accepted(&sub(9.0000, 38.75, 10.0, t0()));
        // 10 m in 10 s (1 m/s), then ~100 m in 5 s (20 m/s, under the speed cap)
        let b = accepted(&sub(9.00009, 38.75, 10.0, t0() + Duration::seconds(10)));
        let c = sub(9.00099, 38.75, 10.0, t0() + Duration::seconds(15));
        let out = run(&v, &c, Some(&b), &[a, b.clone()], &active(), &[]);
        let speed = &out.checks.as_ref().unwrap().speed;
        assert!(speed.acceleration_ms2.unwrap() > 3.0);
        assert!(!speed.valid);
        assert!(out.flags.contains(&ValidationFlag::ExcessiveAcceleration));
    }

    #[test]
    fn test_clock_skew_is_hard_reject() {
        let v = validator();
        let mut s = sub(9.005, 38.75, 10.0, t0());
        s.client_timestamp = t0() - Duration::minutes(10);
        let out = run(&v, &s, None, &[], &active(), &[]);
        assert!(!out.valid);
        assert_eq!(out.reject, Some(RejectReason::TimestampOutOfTolerance));

        s.client_timestamp = t0() + Duration::minutes(2);
        let out = run(&v, &s, None, &[], &active(), &[]);
        assert_eq!(out.reject, Some(RejectReason::TimestampInFuture));

        s.client_timestamp = Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0).unwrap();
        let out = run(&v, &s, None, &[], &active(), &[]);
        assert_eq!(out.reject, Some(RejectReason::ImplausibleTimestamp));
    }

    #[test]
    fn test_small_skew_reduces_confidence() {
        let v = validator();
        let mut s = sub(9.005, 38.75, 10.0, t0());
        s.client_timestamp = t0() - Duration::seconds(165);
        let out = run(&v, &s, None, &[], &active(), &[]);
        let ts = &out.checks.as_ref().unwrap().timestamp;
        assert!(ts.valid);
        assert!((ts.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_unscheduled_vehicle_is_hard_reject() {
        let v = validator();
        let s = sub(9.005, 38.75, 10.0, t0());
        let out = run(&v, &s, None, &[], &ScheduleWindow::inactive(), &[]);
        assert_eq!(out.reject, Some(RejectReason::VehicleNotScheduled));
        assert!(out.is_hard_reject());
    }

    #[test]
    fn test_accuracy_bands() {
        let v = validator();
        let mut flags = Vec::new();
        assert_eq!(v.check_accuracy(8.0, &mut flags).confidence, 1.0);
        assert_eq!(v.check_accuracy(18.0, &mut flags).confidence, 0.9);
        assert_eq!(v.check_accuracy(45.0, &mut flags).confidence, 0.7);
        assert!(flags.is_empty());
        assert_eq!(v.check_accuracy(90.0, &mut flags).confidence, 0.4);
        assert!(flags.contains(&ValidationFlag::PoorGpsAccuracy));
        let beyond = v.check_accuracy(250.0, &mut flags);
        assert!(!beyond.valid);
        assert_eq!(beyond.confidence, 0.0);
    }

    #[test]
    fn test_poor_accuracy_alone_is_compensable() {
        let v = validator();
        let s = sub(9.005, 38.75, 250.0, t0());
        let out = run(&v, &s, None, &[], &active(), &line_stops());
        assert!(out.reject.is_none());
        assert!(out.flags.contains(&ValidationFlag::PoorGpsAccuracy));
        assert!(out
            .recommendations
            .iter()
            .any(|r| r.contains("move to an open area")));
    }

    #[test]
    fn test_off_route_flagged() {
        let v = validator();
        // ~2 km east of the line of stops
        let s = sub(9.005, 38.77, 10.0, t0());
        let out = run(&v, &s, None, &[], &active(), &line_stops());
        let route = &out.checks.as_ref().unwrap().route;
        assert!(!route.valid);
        assert!(out.flags.contains(&ValidationFlag::OffRoute));
    }

    #[test]
    fn test_backtracking_flagged() {
        let v = validator();
        let c = accepted(&sub(9.020, 38.75, 10.0, t0()));
        let b = accepted(&sub(9.010, 38.75, 10.0, t0() + Duration::seconds(90)));
        let s = sub(9.000, 38.75, 10.0, t0() + Duration::seconds(180));
        let out = run(&v, &s, Some(&b), &[c, b.clone()], &active(), &line_stops());
        assert!(out.flags.contains(&ValidationFlag::Backtracking));
    }
}

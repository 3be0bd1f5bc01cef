//! # movement
//!
//! Speed / bearing plausibility over one device's recent fixes. Shared by the
//! report validator (movement check) and the trust scorer (movement
//! consistency).
//!
//! Fewer than two usable fixes yields [`MovementPattern::InsufficientData`]
//! with neutral consistency, so a brand-new device is never penalised for
//! having no history.

use chrono::{DateTime, Utc};
use crowdtrack_types::GeoPoint;
use serde::Serialize;

use crate::config::MovementConfig;
use crate::geo;

/// One timestamped fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedPoint {
    pub point: GeoPoint,
    pub at: DateTime<Utc>,
}

impl TimedPoint {
    pub fn new(point: GeoPoint, at: DateTime<Utc>) -> Self {
        Self { point, at }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementPattern {
    InsufficientData,
    Stationary,
    Walking,
    TooFast,
    BusWithStops,
    BusLike,
    Irregular,
}

impl MovementPattern {
    /// How strongly this pattern agrees with riding a bus.
    pub fn score(&self) -> f64 {
        match self {
            Self::BusLike | Self::BusWithStops => 1.0,
            Self::InsufficientData => 0.7,
            Self::Stationary => 0.5,
            Self::Walking => 0.4,
            Self::Irregular => 0.3,
            Self::TooFast => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeedConsistency {
    pub consistent: bool,
    pub mean_kmh: f64,
    pub coefficient_of_variation: f64,
    pub max_jump_kmh: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectionConsistency {
    pub consistent: bool,
    pub avg_change_deg: f64,
    pub max_change_deg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovementAnalysis {
    pub pattern: MovementPattern,
    pub speeds_kmh: Vec<f64>,
    /// None for segments too short to carry a meaningful bearing
    pub bearings: Vec<Option<f64>>,
    pub avg_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub duration_secs: f64,
    pub speed: SpeedConsistency,
    pub direction: DirectionConsistency,
    pub confidence: f64,
}

impl MovementAnalysis {
    fn insufficient() -> Self {
        Self {
            pattern: MovementPattern::InsufficientData,
            speeds_kmh: Vec::new(),
            bearings: Vec::new(),
            avg_speed_kmh: 0.0,
            max_speed_kmh: 0.0,
            duration_secs: 0.0,
            speed: SpeedConsistency {
                consistent: true,
                mean_kmh: 0.0,
                coefficient_of_variation: 0.0,
                max_jump_kmh: 0.0,
            },
            direction: DirectionConsistency {
                consistent: true,
                avg_change_deg: 0.0,
                max_change_deg: 0.0,
            },
            confidence: MovementPattern::InsufficientData.score(),
        }
    }

    pub fn is_insufficient(&self) -> bool {
        self.pattern == MovementPattern::InsufficientData
    }

    pub fn is_bus_like(&self) -> bool {
        matches!(
            self.pattern,
            MovementPattern::BusLike | MovementPattern::BusWithStops
        )
    }

    /// Speed + direction agreement in [0, 1]; None without enough data.
    pub fn consistency_score(&self) -> Option<f64> {
        if self.is_insufficient() {
            return None;
        }
        Some(0.5 * consistency_factor(self.speed.consistent) + 0.5 * consistency_factor(self.direction.consistent))
    }
}

fn consistency_factor(ok: bool) -> f64 {
    if ok {
        1.0
    } else {
        0.4
    }
}

#[derive(Debug, Clone, Default)]
pub struct MovementAnalyzer {
    config: MovementConfig,
}

impl MovementAnalyzer {
    pub fn new(config: MovementConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, points: &[TimedPoint]) -> MovementAnalysis {
        let mut sorted: Vec<TimedPoint> = points
            .iter()
            .copied()
            .filter(|p| p.point.is_finite())
            .collect();
        sorted.sort_by_key(|p| p.at);

        let mut speeds = Vec::with_capacity(sorted.len());
        let mut bearings = Vec::with_capacity(sorted.len());
        for pair in sorted.windows(2) {
            let dt = (pair[1].at - pair[0].at).num_milliseconds() as f64 / 1000.0;
            if dt <= 0.0 {
                continue;
            }
            let d = geo::distance(pair[0].point, pair[1].point);
            speeds.push(d / dt * 3.6);
            bearings.push(
                (d >= self.config.min_bearing_segment_m).then(|| geo::bearing(pair[0].point, pair[1].point)),
            );
        }

        if speeds.is_empty() {
            return MovementAnalysis::insufficient();
        }

        let duration_secs = match (sorted.first(), sorted.last()) {
            (Some(first), Some(last)) => (last.at - first.at).num_milliseconds() as f64 / 1000.0,
            _ => 0.0,
        };
        let avg = speeds.iter().sum::<f64>() / speeds.len() as f64;
        let max = speeds.iter().cloned().fold(0.0_f64, f64::max);

        let pattern = self.classify(&speeds, avg, max, duration_secs);
        let speed = self.speed_consistency(&speeds, avg);
        let direction = self.direction_consistency(&bearings);

        let confidence = (0.5 * pattern.score()
            + 0.25 * consistency_factor(speed.consistent)
            + 0.25 * consistency_factor(direction.consistent))
        .clamp(0.0, 1.0);

        MovementAnalysis {
            pattern,
            speeds_kmh: speeds,
            bearings,
            avg_speed_kmh: avg,
            max_speed_kmh: max,
            duration_secs,
            speed,
            direction,
            confidence,
        }
    }

    fn classify(&self, speeds: &[f64], avg: f64, max: f64, duration_secs: f64) -> MovementPattern {
        let c = &self.config;
        let stopped = |s: &f64| *s < c.stationary_speed_kmh;

        if max > c.too_fast_kmh {
            return MovementPattern::TooFast;
        }
        if speeds.iter().all(stopped) && duration_secs > c.stationary_min_secs as f64 {
            return MovementPattern::Stationary;
        }
        let has_stopped = speeds.iter().any(stopped);
        let has_moving = speeds.iter().any(|s| !stopped(s));
        if has_stopped && has_moving && (c.bus_min_avg_kmh..=c.bus_max_avg_kmh).contains(&avg) {
            return MovementPattern::BusWithStops;
        }
        if avg < c.walking_avg_kmh && max < c.walking_max_kmh {
            return MovementPattern::Walking;
        }
        if avg >= c.bus_min_avg_kmh {
            return MovementPattern::BusLike;
        }
        MovementPattern::Irregular
    }

    fn speed_consistency(&self, speeds: &[f64], mean: f64) -> SpeedConsistency {
        let variance = speeds.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / speeds.len() as f64;
        let cv = if mean > 0.1 { variance.sqrt() / mean } else { 0.0 };
        let max_jump = speeds
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0_f64, f64::max);

        SpeedConsistency {
            consistent: cv < self.config.max_speed_cv && max_jump <= self.config.max_speed_jump_kmh,
            mean_kmh: mean,
            coefficient_of_variation: cv,
            max_jump_kmh: max_jump,
        }
    }

    fn direction_consistency(&self, bearings: &[Option<f64>]) -> DirectionConsistency {
        let usable: Vec<f64> = bearings.iter().flatten().copied().collect();
        let changes: Vec<f64> = usable
            .windows(2)
            .map(|w| geo::bearing_delta(w[0], w[1]))
            .collect();

        if changes.is_empty() {
            return DirectionConsistency {
                consistent: true,
                avg_change_deg: 0.0,
                max_change_deg: 0.0,
            };
        }

        let avg = changes.iter().sum::<f64>() / changes.len() as f64;
        let max = changes.iter().cloned().fold(0.0_f64, f64::max);
        DirectionConsistency {
            consistent: avg < self.config.max_avg_bearing_change_deg
                && max < self.config.max_bearing_change_deg,
            avg_change_deg: avg,
            max_change_deg: max,
        }
    }
}

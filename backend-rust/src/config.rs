//! # config
//!
//! Every tunable threshold of the engine. Defaults reproduce the production
//! behaviour; a TOML file can override any subset and a few deployment knobs
//! come from the environment.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, TrackingError};

// ── Region ────────────────────────────────────────────────────────────────────

/// Operating region bounding box.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
    /// |lat| and |lon| both below this are treated as a null-island fix
    pub near_zero_epsilon: f64,
}

impl Default for RegionConfig {
    fn default() -> Self {
        // Addis Ababa metro
        Self {
            min_lat: 8.80,
            max_lat: 9.20,
            min_lon: 38.60,
            max_lon: 39.00,
            near_zero_epsilon: 0.001,
        }
    }
}

// ── Validation ────────────────────────────────────────────────────────────────

/// Per-check weights. Must sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckWeights {
    pub boundary: f64,
    pub speed: f64,
    pub route: f64,
    pub timestamp: f64,
    pub accuracy: f64,
    pub movement: f64,
    pub schedule: f64,
}

impl Default for CheckWeights {
    fn default() -> Self {
        Self {
            boundary: 0.20,
            speed: 0.15,
            route: 0.25,
            timestamp: 0.10,
            accuracy: 0.15,
            movement: 0.10,
            schedule: 0.05,
        }
    }
}

impl CheckWeights {
    pub fn sum(&self) -> f64 {
        self.boundary
            + self.speed
            + self.route
            + self.timestamp
            + self.accuracy
            + self.movement
            + self.schedule
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub weights: CheckWeights,
    pub min_confidence: f64,

    // speed / acceleration
    pub max_speed_kmh: f64,
    /// Above this the speed check passes with a `high_speed` warning
    pub warn_speed_kmh: f64,
    pub max_acceleration_ms2: f64,
    pub min_report_interval_secs: i64,
    pub previous_report_lookback_secs: i64,

    // timestamp
    pub timestamp_tolerance_secs: i64,
    pub max_future_skew_secs: i64,
    /// Skew under which the timestamp check scores full confidence
    pub timestamp_good_skew_secs: i64,
    pub min_plausible_year: i32,

    // accuracy bands, meters
    pub accuracy_excellent_m: f64,
    pub accuracy_good_m: f64,
    pub accuracy_fair_m: f64,
    pub accuracy_max_m: f64,

    // route adherence
    pub route_min_score: f64,
    pub corridor_width_m: f64,
    /// Corridor width on the last leg before the final stop
    pub final_leg_corridor_width_m: f64,
    /// Distance beyond a stop's radius over which the stop score decays to 0
    pub stop_score_decay_m: f64,

    // movement
    pub movement_history_limit: usize,
    pub movement_min_confidence: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            weights: CheckWeights::default(),
            min_confidence: 0.6,
            max_speed_kmh: 80.0,
            warn_speed_kmh: 60.0,
            max_acceleration_ms2: 3.0,
            min_report_interval_secs: 5,
            previous_report_lookback_secs: 30 * 60,
            timestamp_tolerance_secs: 5 * 60,
            max_future_skew_secs: 60,
            timestamp_good_skew_secs: 30,
            min_plausible_year: 2020,
            accuracy_excellent_m: 10.0,
            accuracy_good_m: 20.0,
            accuracy_fair_m: 50.0,
            accuracy_max_m: 100.0,
            route_min_score: 0.4,
            corridor_width_m: 500.0,
            final_leg_corridor_width_m: 250.0,
            stop_score_decay_m: 1000.0,
            movement_history_limit: 10,
            movement_min_confidence: 0.4,
        }
    }
}

// ── Movement ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    pub stationary_speed_kmh: f64,
    pub stationary_min_secs: i64,
    pub too_fast_kmh: f64,
    pub walking_avg_kmh: f64,
    pub walking_max_kmh: f64,
    pub bus_min_avg_kmh: f64,
    pub bus_max_avg_kmh: f64,
    pub max_speed_cv: f64,
    pub max_speed_jump_kmh: f64,
    pub max_avg_bearing_change_deg: f64,
    pub max_bearing_change_deg: f64,
    /// Segments shorter than this carry no usable bearing (GPS jitter)
    pub min_bearing_segment_m: f64,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            stationary_speed_kmh: 5.0,
            stationary_min_secs: 5 * 60,
            too_fast_kmh: 60.0,
            walking_avg_kmh: 8.0,
            walking_max_kmh: 15.0,
            bus_min_avg_kmh: 8.0,
            bus_max_avg_kmh: 40.0,
            max_speed_cv: 1.0,
            max_speed_jump_kmh: 30.0,
            max_avg_bearing_change_deg: 45.0,
            max_bearing_change_deg: 120.0,
            min_bearing_segment_m: 5.0,
        }
    }
}

// ── Trust ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustWeights {
    pub frequency: f64,
    pub consistency: f64,
    pub accuracy: f64,
    pub clustering: f64,
    pub historical: f64,
}

impl Default for TrustWeights {
    fn default() -> Self {
        Self {
            frequency: 0.15,
            consistency: 0.25,
            accuracy: 0.25,
            clustering: 0.20,
            historical: 0.15,
        }
    }
}

impl TrustWeights {
    pub fn sum(&self) -> f64 {
        self.frequency + self.consistency + self.accuracy + self.clustering + self.historical
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    pub weights: TrustWeights,
    pub window_days: i64,
    pub max_step: f64,
    pub trusted_threshold: f64,
    pub high_reputation_weight: f64,
    pub min_daily_reports: f64,
    pub max_daily_reports: f64,
    pub min_active_days: u32,
    /// Multiplier applied per step back in time when weighting window reports
    pub recency_decay: f64,
    /// Max reports sampled from the window for cross-device proximity
    pub proximity_sample: usize,
    /// Reports from other devices within ± this many seconds count as concurrent
    pub concurrency_window_secs: i64,
    /// Affinity credited to a report with no concurrent peers
    pub alone_affinity: f64,
    /// Accuracy at or under which a valid contribution counts as accurate
    pub accurate_contribution_m: f64,
    /// Recalculate on a spawned task after each accepted report; when false
    /// the recalculation runs inline before `record_report` returns
    pub background_recalculation: bool,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            weights: TrustWeights::default(),
            window_days: 7,
            max_step: 0.1,
            trusted_threshold: 0.7,
            high_reputation_weight: 0.7,
            min_daily_reports: 1.0,
            max_daily_reports: 50.0,
            min_active_days: 3,
            recency_decay: 0.85,
            proximity_sample: 50,
            concurrency_window_secs: 60,
            alone_affinity: 0.6,
            accurate_contribution_m: 50.0,
            background_recalculation: true,
        }
    }
}

// ── Clustering ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub window_secs: i64,
    pub radius_m: f64,
    pub outlier_strike_limit: u32,
    pub stationary_timeout_secs: i64,
    pub stationary_tolerance_m: f64,
    pub deactivation_ttl_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            window_secs: 120,
            radius_m: 25.0,
            outlier_strike_limit: 5,
            stationary_timeout_secs: 10 * 60,
            stationary_tolerance_m: 10.0,
            deactivation_ttl_secs: 10 * 60,
        }
    }
}

// ── Aggregation ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub cycle_secs: u64,
    pub single_tracker_cap: f64,
    pub last_known_max_age_secs: i64,
    pub last_known_decay_minutes: f64,
    pub last_known_floor: f64,
    pub historical_days: i64,
    pub historical_window_secs: i64,
    pub historical_confidence: f64,
    pub good_accuracy_m: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            cycle_secs: 15,
            single_tracker_cap: 0.8,
            last_known_max_age_secs: 30 * 60,
            last_known_decay_minutes: 60.0,
            last_known_floor: 0.1,
            historical_days: 7,
            historical_window_secs: 15 * 60,
            historical_confidence: 0.3,
            good_accuracy_m: 20.0,
        }
    }
}

// ── Sessions / Cache ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub inactivity_timeout_secs: i64,
    pub reaper_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 15 * 60,
            reaper_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub position_ttl_secs: u64,
    pub session_ttl_secs: u64,
    pub trust_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            position_ttl_secs: 60,
            session_ttl_secs: 15 * 60,
            trust_ttl_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn position_ttl(&self) -> Duration {
        Duration::from_secs(self.position_ttl_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn trust_ttl(&self) -> Duration {
        Duration::from_secs(self.trust_ttl_secs)
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub region: RegionConfig,
    pub validation: ValidationConfig,
    pub movement: MovementConfig,
    pub trust: TrustConfig,
    pub cluster: ClusterConfig,
    pub aggregation: AggregationConfig,
    pub session: SessionConfig,
    pub cache: CacheConfig,
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(raw).map_err(|e| TrackingError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads `path` if it exists, otherwise falls back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No {} found, using default engine config", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TrackingError::Config(format!("{}: {e}", path.display())))?;
        let cfg = Self::from_toml_str(&raw)?;
        info!("Loaded engine config from {}", path.display());
        Ok(cfg)
    }

    /// Applies the few environment overrides that vary per deployment.
    pub fn apply_env(&mut self) {
        if let Some(secs) = env_parse::<u64>("CROWDTRACK_CYCLE_SECS") {
            self.aggregation.cycle_secs = secs.max(1);
        }
        if let Some(t) = env_parse::<f64>("CROWDTRACK_TRUST_THRESHOLD") {
            self.trust.trusted_threshold = t.clamp(0.0, 1.0);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let r = &self.region;
        if r.min_lat >= r.max_lat || r.min_lon >= r.max_lon {
            return Err(TrackingError::Config("region bounding box is inverted".into()));
        }
        if (self.validation.weights.sum() - 1.0).abs() > 1e-6 {
            return Err(TrackingError::Config(format!(
                "validation weights sum to {:.3}, expected 1.0",
                self.validation.weights.sum()
            )));
        }
        if (self.trust.weights.sum() - 1.0).abs() > 1e-6 {
            return Err(TrackingError::Config(format!(
                "trust weights sum to {:.3}, expected 1.0",
                self.trust.weights.sum()
            )));
        }
        if self.cluster.radius_m <= 0.0 || self.validation.corridor_width_m <= 0.0 {
            return Err(TrackingError::Config("radii must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.trust.max_step) {
            return Err(TrackingError::Config("trust.max_step must be in [0, 1]".into()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring unparseable {key}={raw}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = EngineConfig::from_toml_str(
            r#"
            [cluster]
            radius_m = 40.0

            [trust]
            trusted_threshold = 0.8
            "#,
        )
        .unwrap();
        assert_eq!(cfg.cluster.radius_m, 40.0);
        assert_eq!(cfg.cluster.window_secs, 120);
        assert_eq!(cfg.trust.trusted_threshold, 0.8);
        assert_eq!(cfg.trust.max_step, 0.1);
    }

    #[test]
    fn test_bad_weights_rejected() {
        let err = EngineConfig::from_toml_str(
            r#"
            [validation.weights]
            boundary = 0.9
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, TrackingError::Config(_)));
    }

    #[test]
    fn test_inverted_region_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.region.min_lat = 10.0;
        assert!(cfg.validate().is_err());
    }
}

//! # trust
//!
//! Per-device trust from a rolling window of behaviour.
//!
//! Five sub-scores in [0, 1] are combined with fixed weights into a candidate,
//! then the stored value moves toward the candidate by at most `max_step`.
//! The step clamp is what keeps one burst of good or bad data from flipping a
//! device, so every write path goes through [`TrustScorer::recalculate`].
//!
//! Reports inside the window are recency weighted: the newest counts 1, each
//! older report `recency_decay` times the one after it.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use crowdtrack_types::{DeviceTrustRecord, LocationReport};
use serde::Serialize;

use crate::config::{EngineConfig, TrustConfig};
use crate::geo;
use crate::movement::{MovementAnalyzer, TimedPoint};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrustBreakdown {
    pub frequency: f64,
    pub consistency: f64,
    pub accuracy: f64,
    pub clustering: f64,
    pub historical: f64,
    /// Weighted sum before the step clamp
    pub candidate: f64,
}

#[derive(Debug, Clone)]
pub struct TrustScorer {
    cfg: TrustConfig,
    cluster_radius_m: f64,
    movement: MovementAnalyzer,
    movement_history_limit: usize,
}

impl TrustScorer {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            cfg: cfg.trust.clone(),
            cluster_radius_m: cfg.cluster.radius_m,
            movement: MovementAnalyzer::new(cfg.movement.clone()),
            movement_history_limit: cfg.validation.movement_history_limit.max(2),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::days(self.cfg.window_days)
    }

    pub fn threshold(&self) -> f64 {
        self.cfg.trusted_threshold
    }

    pub fn is_trusted(&self, trust: f64) -> bool {
        trust >= self.cfg.trusted_threshold
    }

    pub fn proximity_sample(&self) -> usize {
        self.cfg.proximity_sample
    }

    pub fn concurrency_window(&self) -> Duration {
        Duration::seconds(self.cfg.concurrency_window_secs)
    }

    /// Per-report weight used by the aggregator.
    pub fn report_weight(&self, trust: f64, confidence: f64, accuracy_m: f64, valid: bool) -> f64 {
        let factor = if accuracy_m <= 20.0 {
            1.0
        } else if accuracy_m <= 50.0 {
            0.85
        } else if accuracy_m <= 100.0 {
            0.6
        } else {
            0.3
        };
        let w = ((0.5 * trust + 0.5 * confidence) * factor).clamp(0.0, 1.0);
        if valid {
            w
        } else {
            w.min(0.2)
        }
    }

    pub fn is_accurate_contribution(&self, valid: bool, accuracy_m: f64) -> bool {
        valid && accuracy_m <= self.cfg.accurate_contribution_m
    }

    /// Recomputes `previous` from the device's `window` (oldest first) and
    /// concurrent `peers` (validated reports of other devices on the same
    /// vehicles). Returns the new record and the sub-scores behind it.
    pub fn recalculate(
        &self,
        previous: &DeviceTrustRecord,
        window: &[LocationReport],
        peers: &[LocationReport],
        now: DateTime<Utc>,
    ) -> (DeviceTrustRecord, TrustBreakdown) {
        let previous = previous.clone().clamped();
        let w = &self.cfg.weights;

        let newest_first: Vec<&LocationReport> = window.iter().rev().collect();
        let decay = self.recency_weights(newest_first.len());

        let frequency = self.frequency_score(window);
        let validated = weighted_fraction(&newest_first, &decay, |r| r.is_validated);
        let accuracy = weighted_fraction(&newest_first, &decay, |r| {
            r.reputation_weight >= self.cfg.high_reputation_weight
        });
        let (proximity, clustering) = self.peer_scores(&newest_first, peers);
        let movement = self.movement_consistency(window);

        let consistency = if newest_first.is_empty() {
            previous.trust_score
        } else {
            0.5 * validated + 0.3 * proximity + 0.2 * movement
        };
        let historical = previous.trust_score;

        let candidate = (w.frequency * frequency
            + w.consistency * consistency
            + w.accuracy * accuracy
            + w.clustering * clustering
            + w.historical * historical)
            .clamp(0.0, 1.0);

        let step = self.cfg.max_step;
        let delta = (candidate - previous.trust_score).clamp(-step, step);
        let trust_score = previous.trust_score + delta;

        let reputation_score = if newest_first.is_empty() {
            previous.reputation_score
        } else {
            weighted_mean(&newest_first, &decay, |r| r.reputation_weight)
        };

        let record = DeviceTrustRecord {
            trust_score,
            reputation_score,
            clustering_affinity: clustering,
            movement_consistency: movement,
            last_recalculated: Some(now),
            ..previous
        }
        .clamped();

        (
            record,
            TrustBreakdown {
                frequency,
                consistency,
                accuracy,
                clustering,
                historical,
                candidate,
            },
        )
    }

    fn recency_weights(&self, n: usize) -> Vec<f64> {
        let mut out = Vec::with_capacity(n);
        let mut w = 1.0;
        for _ in 0..n {
            out.push(w);
            w *= self.cfg.recency_decay;
        }
        out
    }

    /// Rewards 1..=50 reports per active day over at least `min_active_days`.
    fn frequency_score(&self, window: &[LocationReport]) -> f64 {
        if window.is_empty() {
            return 0.0;
        }
        let days: BTreeSet<_> = window.iter().map(|r| r.received_at.date_naive()).collect();
        let active_days = days.len().max(1) as f64;
        let per_day = window.len() as f64 / active_days;

        let rate = if per_day > self.cfg.max_daily_reports {
            (self.cfg.max_daily_reports / per_day).max(0.2)
        } else if per_day < self.cfg.min_daily_reports {
            per_day / self.cfg.min_daily_reports.max(1e-9)
        } else {
            1.0
        };
        let spread = (active_days / self.cfg.min_active_days.max(1) as f64).min(1.0);
        (rate * (0.6 + 0.4 * spread)).clamp(0.0, 1.0)
    }

    /// (proximity agreement, clustering affinity) over the newest sampled
    /// reports. A report that failed validation never joins a cluster, so it
    /// counts as far from its peers.
    fn peer_scores(&self, newest_first: &[&LocationReport], peers: &[LocationReport]) -> (f64, f64) {
        let sample: Vec<&LocationReport> = newest_first
            .iter()
            .copied()
            .take(self.cfg.proximity_sample)
            .collect();
        if sample.is_empty() {
            return (self.cfg.alone_affinity, self.cfg.alone_affinity);
        }

        let span = self.concurrency_window();
        let mut affinity_sum = 0.0;
        let mut affinity_norm = 0.0;
        let mut near_sum = 0.0;
        let mut peered_norm = 0.0;
        let mut w = 1.0;

        for r in &sample {
            if !r.is_validated {
                peered_norm += w;
                affinity_norm += w;
                w *= self.cfg.recency_decay;
                continue;
            }
            let nearest = peers
                .iter()
                .filter(|p| {
                    p.device_id != r.device_id
                        && p.vehicle_id == r.vehicle_id
                        && p.is_validated
                        && (p.received_at - r.received_at).abs() <= span
                })
                .map(|p| geo::distance(p.point(), r.point()))
                .min_by(f64::total_cmp);

            let affinity = match nearest {
                None => self.cfg.alone_affinity,
                Some(d) if d <= self.cluster_radius_m => {
                    near_sum += w;
                    peered_norm += w;
                    1.0
                }
                Some(_) => {
                    peered_norm += w;
                    0.0
                }
            };
            affinity_sum += w * affinity;
            affinity_norm += w;
            w *= self.cfg.recency_decay;
        }

        let proximity = if peered_norm > 0.0 {
            near_sum / peered_norm
        } else {
            self.cfg.alone_affinity
        };
        (proximity, affinity_sum / affinity_norm)
    }

    /// Speed/direction agreement of recent validated fixes; neutral pass
    /// without enough data.
    fn movement_consistency(&self, window: &[LocationReport]) -> f64 {
        let recent: Vec<TimedPoint> = window
            .iter()
            .rev()
            .filter(|r| r.is_validated)
            .take(self.movement_history_limit)
            .map(|r| TimedPoint::new(r.point(), r.received_at))
            .collect();
        self.movement
            .analyze(&recent)
            .consistency_score()
            .unwrap_or(1.0)
    }
}

fn weighted_fraction(
    reports: &[&LocationReport],
    weights: &[f64],
    pred: impl Fn(&LocationReport) -> bool,
) -> f64 {
    weighted_mean(reports, weights, |r| if pred(r) { 1.0 } else { 0.0 })
}

fn weighted_mean(
    reports: &[&LocationReport],
    weights: &[f64],
    value: impl Fn(&LocationReport) -> f64,
) -> f64 {
    let norm: f64 = weights.iter().take(reports.len()).sum();
    if norm <= 0.0 {
        return 0.0;
    }
    reports
        .iter()
        .zip(weights)
        .map(|(r, w)| w * value(r))
        .sum::<f64>()
        / norm
}

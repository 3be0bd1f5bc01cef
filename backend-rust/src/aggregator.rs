//! # aggregator
//!
//! Trust-weighted consensus over the main cluster, plus the fallback cascade
//! used when no trusted live data exists:
//!
//! 1. trusted-cluster centroid
//! 2. last known trusted position, confidence decaying linearly with age
//! 3. historical same-time-of-day average, fixed low confidence
//! 4. nothing
//!
//! Everything here is pure; the engine fetches inputs and persists output.

use chrono::{DateTime, Timelike, Utc};
use crowdtrack_types::{
    AggregatedPosition, GeoPoint, LastKnownLocation, LocationReport, PositionSource, PositionStatus,
};

use crate::clustering::ClusteringResult;
use crate::config::AggregationConfig;
use crate::geo;

#[derive(Debug, Clone, PartialEq)]
pub struct Consensus {
    pub point: GeoPoint,
    pub confidence: f64,
    pub trusted_trackers: u32,
    pub status: PositionStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fallback {
    pub point: GeoPoint,
    pub confidence: f64,
    pub source: PositionSource,
}

#[derive(Debug, Clone)]
pub struct PositionAggregator {
    cfg: AggregationConfig,
    trusted_threshold: f64,
}

impl PositionAggregator {
    pub fn new(cfg: AggregationConfig, trusted_threshold: f64) -> Self {
        Self {
            cfg,
            trusted_threshold,
        }
    }

    /// Weighted centroid of the main cluster's trusted members. None when the
    /// main cluster holds no trusted device.
    pub fn consensus(&self, clusters: &ClusteringResult) -> Option<Consensus> {
        let main = clusters.main_cluster()?;
        let trusted: Vec<&LocationReport> = main
            .members
            .iter()
            .filter(|m| m.trust >= self.trusted_threshold)
            .map(|m| &m.report)
            .collect();
        if trusted.is_empty() {
            return None;
        }

        let weight_sum: f64 = trusted.iter().map(|r| r.reputation_weight).sum();
        let point = if weight_sum > 0.0 {
            GeoPoint::new(
                trusted.iter().map(|r| r.lat * r.reputation_weight).sum::<f64>() / weight_sum,
                trusted.iter().map(|r| r.lon * r.reputation_weight).sum::<f64>() / weight_sum,
            )
        } else {
            let pts: Vec<GeoPoint> = trusted.iter().map(|r| r.point()).collect();
            geo::centroid(&pts)?
        };

        let n = trusted.len();
        let avg_accuracy = trusted.iter().map(|r| r.accuracy_m).sum::<f64>() / n as f64;
        let avg_weight = weight_sum / n as f64;

        let mut confidence = 0.3 + 0.1 * n.min(3) as f64;
        if avg_accuracy < self.cfg.good_accuracy_m {
            confidence += 0.1;
        } else if avg_accuracy < 50.0 {
            confidence += 0.05;
        }
        confidence += 0.2 * clusters.efficiency();
        confidence += (avg_weight - 0.5) * 0.2;
        let mut confidence = confidence.clamp(0.0, 1.0);

        let status = if n == 1 {
            confidence = confidence.min(self.cfg.single_tracker_cap);
            PositionStatus::SingleTracker
        } else {
            PositionStatus::Active
        };

        Some(Consensus {
            point,
            confidence,
            trusted_trackers: n as u32,
            status,
        })
    }

    /// Snapshot younger than `last_known_max_age`, confidence
    /// `max(floor, 1 - minutes / decay_minutes)`.
    pub fn last_known(
        &self,
        snapshot: Option<&LastKnownLocation>,
        now: DateTime<Utc>,
    ) -> Option<Fallback> {
        let s = snapshot?;
        let age_secs = (now - s.recorded_at).num_seconds();
        if age_secs < 0 || age_secs > self.cfg.last_known_max_age_secs {
            return None;
        }
        let minutes = age_secs as f64 / 60.0;
        let confidence = (1.0 - minutes / self.cfg.last_known_decay_minutes.max(1e-9))
            .max(self.cfg.last_known_floor)
            .clamp(0.0, 1.0);
        Some(Fallback {
            point: GeoPoint::new(s.lat, s.lon),
            confidence,
            source: PositionSource::LastKnown,
        })
    }

    /// Mean of validated reports whose time of day lies within
    /// ± `historical_window_secs` of `now`'s, on earlier days.
    pub fn historical(&self, past: &[LocationReport], now: DateTime<Utc>) -> Option<Fallback> {
        let today = now.date_naive();
        let now_tod = now.num_seconds_from_midnight() as i64;
        let window = self.cfg.historical_window_secs;

        let pts: Vec<GeoPoint> = past
            .iter()
            .filter(|r| r.is_validated && r.received_at.date_naive() < today)
            .filter(|r| {
                let tod = r.received_at.num_seconds_from_midnight() as i64;
                let diff = (tod - now_tod).abs();
                diff.min(86_400 - diff) <= window
            })
            .map(|r| r.point())
            .collect();
        Some(Fallback {
            point: geo::centroid(&pts)?,
            confidence: self.cfg.historical_confidence,
            source: PositionSource::Historical,
        })
    }

    /// Builds the public record for one cycle.
    pub fn build(
        &self,
        vehicle_id: &str,
        consensus: Option<&Consensus>,
        fallback: Option<&Fallback>,
        active_trackers: u32,
        previous: Option<&AggregatedPosition>,
        now: DateTime<Utc>,
    ) -> AggregatedPosition {
        let carried = previous.and_then(|p| p.last_known);

        if let Some(c) = consensus {
            return AggregatedPosition {
                vehicle_id: vehicle_id.to_string(),
                lat: Some(c.point.lat),
                lon: Some(c.point.lon),
                confidence: c.confidence,
                active_trackers,
                trusted_trackers: c.trusted_trackers,
                status: c.status,
                source: PositionSource::TrustedCluster,
                last_updated: now,
                last_known: Some(LastKnownLocation {
                    lat: c.point.lat,
                    lon: c.point.lon,
                    confidence: c.confidence,
                    recorded_at: now,
                }),
            };
        }

        let ever_seen = active_trackers > 0 || carried.is_some() || fallback.is_some();
        let status = if ever_seen {
            PositionStatus::NoTracking
        } else {
            PositionStatus::NoData
        };
        AggregatedPosition {
            vehicle_id: vehicle_id.to_string(),
            lat: fallback.map(|f| f.point.lat),
            lon: fallback.map(|f| f.point.lon),
            confidence: fallback.map(|f| f.confidence).unwrap_or(0.0),
            active_trackers,
            trusted_trackers: 0,
            status,
            source: fallback.map(|f| f.source).unwrap_or(PositionSource::None),
            last_updated: now,
            last_known: carried,
        }
    }

    /// Vehicle outside its service window.
    pub fn inactive(
        &self,
        vehicle_id: &str,
        previous: Option<&AggregatedPosition>,
        now: DateTime<Utc>,
    ) -> AggregatedPosition {
        AggregatedPosition {
            status: PositionStatus::Inactive,
            last_known: previous.and_then(|p| p.last_known),
            ..AggregatedPosition::no_data(vehicle_id, now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::SpatialClusterer;
    use chrono::{Duration, TimeZone};
    use crowdtrack_types::ReportSubmission;
    use std::collections::HashMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, 8, 0, 0).unwrap()
    }

    fn report(device: &str, lat: f64, acc: f64, weight: f64, at: DateTime<Utc>) -> LocationReport {
        let sub = ReportSubmission {
            device_id: device.into(),
            vehicle_id: "bus-1".into(),
            lat,
            lon: 38.75,
            accuracy_m: acc,
            speed_kmh: None,
            heading_deg: None,
            client_timestamp: at,
            received_at: at,
        };
        LocationReport::from_submission(&sub, weight, 0.9, true)
    }

    fn aggregator() -> PositionAggregator {
        PositionAggregator::new(AggregationConfig::default(), 0.7)
    }

    fn cluster(reports: &[LocationReport], trust: &[(&str, f64)]) -> ClusteringResult {
        let t: HashMap<String, f64> = trust.iter().map(|(d, v)| (d.to_string(), *v)).collect();
        SpatialClusterer::new(25.0).cluster(reports, &t)
    }

    #[test]
    fn test_weighted_centroid() {
        let reports = vec![
            report("a", 9.0000, 5.0, 1.0, now()),
            report("b", 9.0001, 5.0, 0.5, now()),
        ];
        let res = cluster(&reports, &[("a", 0.9), ("b", 0.9)]);
        let c = aggregator().consensus(&res).unwrap();
        let expected = (9.0 * 1.0 + 9.0001 * 0.5) / 1.5;
        assert!((c.point.lat - expected).abs() < 1e-12);
        assert_eq!(c.status, PositionStatus::Active);
        assert_eq!(c.trusted_trackers, 2);
    }

    #[test]
    fn test_single_tracker_capped() {
        let reports = vec![report("a", 9.0, 1.0, 1.0, now())];
        let res = cluster(&reports, &[("a", 1.0)]);
        let c = aggregator().consensus(&res).unwrap();
        assert_eq!(c.status, PositionStatus::SingleTracker);
        assert!(c.confidence <= 0.8);
    }

    #[test]
    fn test_untrusted_cluster_has_no_consensus() {
        let reports = vec![report("a", 9.0, 5.0, 0.9, now()), report("b", 9.0, 5.0, 0.9, now())];
        let res = cluster(&reports, &[("a", 0.5), ("b", 0.6)]);
        assert!(aggregator().consensus(&res).is_none());
    }

    #[test]
    fn test_last_known_decays() {
        let agg = aggregator();
        let snap = LastKnownLocation {
            lat: 9.0,
            lon: 38.75,
            confidence: 0.9,
            recorded_at: now() - Duration::minutes(15),
        };
        let f = agg.last_known(Some(&snap), now()).unwrap();
        assert!((f.confidence - 0.75).abs() < 1e-9);

        let stale = LastKnownLocation {
            recorded_at: now() - Duration::minutes(45),
            ..snap
        };
        assert!(agg.last_known(Some(&stale), now()).is_none());
    }

    #[test]
    fn test_historical_same_time_of_day() {
        let agg = aggregator();
        let past = vec![
            report("a", 9.00, 10.0, 0.8, now() - Duration::days(1) + Duration::minutes(5)),
            report("b", 9.02, 10.0, 0.8, now() - Duration::days(2) - Duration::minutes(10)),
            // wrong time of day
            report("c", 9.10, 10.0, 0.8, now() - Duration::days(1) + Duration::hours(3)),
            // today does not count
            report("d", 9.10, 10.0, 0.8, now() - Duration::minutes(5)),
        ];
        let f = agg.historical(&past, now()).unwrap();
        assert!((f.point.lat - 9.01).abs() < 1e-9);
        assert_eq!(f.confidence, 0.3);
        assert_eq!(f.source, PositionSource::Historical);
    }

    #[test]
    fn test_build_status_without_data() {
        let agg = aggregator();
        let pos = agg.build("bus-1", None, None, 0, None, now());
        assert_eq!(pos.status, PositionStatus::NoData);
        assert!(pos.lat.is_none());

        let pos = agg.build("bus-1", None, None, 2, None, now());
        assert_eq!(pos.status, PositionStatus::NoTracking);
        assert_eq!(pos.active_trackers, 2);
    }
}

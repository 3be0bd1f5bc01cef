//! # clustering
//!
//! Greedy single-pass proximity clustering of one vehicle's concurrent
//! reports. Each report joins the first cluster whose running centroid is
//! within the radius, else it starts a new cluster. O(n·k), fine for tens of
//! riders per bus.
//!
//! Greedy clustering is order sensitive, so input is reduced to each device's
//! latest report and sorted by device id first. Same input set, same result.

use std::collections::HashMap;

use crowdtrack_types::{GeoPoint, LocationReport};

use crate::geo;

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMember {
    pub report: LocationReport,
    pub trust: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub members: Vec<ClusterMember>,
    pub centroid: GeoPoint,
    pub trust_sum: f64,
}

impl Cluster {
    fn seed(member: ClusterMember) -> Self {
        Self {
            centroid: member.report.point(),
            trust_sum: member.trust,
            members: vec![member],
        }
    }

    fn absorb(&mut self, member: ClusterMember) {
        let n = self.members.len() as f64;
        let p = member.report.point();
        self.centroid = GeoPoint::new(
            (self.centroid.lat * n + p.lat) / (n + 1.0),
            (self.centroid.lon * n + p.lon) / (n + 1.0),
        );
        self.trust_sum += member.trust;
        self.members.push(member);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn device_ids(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.report.device_id.as_str()).collect()
    }

    /// Trusted members other than `device_id`.
    pub fn other_trusted(&self, device_id: &str, threshold: f64) -> usize {
        self.members
            .iter()
            .filter(|m| m.report.device_id != device_id && m.trust >= threshold)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusteringResult {
    pub clusters: Vec<Cluster>,
    /// Index of the cluster with the highest summed trust
    pub main: Option<usize>,
    pub total_reports: usize,
}

impl ClusteringResult {
    pub fn main_cluster(&self) -> Option<&Cluster> {
        self.main.and_then(|i| self.clusters.get(i))
    }

    /// Share of all concurrent reports absorbed into the main cluster.
    pub fn efficiency(&self) -> f64 {
        match self.main_cluster() {
            Some(c) if self.total_reports > 0 => c.len() as f64 / self.total_reports as f64,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpatialClusterer {
    radius_m: f64,
}

impl SpatialClusterer {
    pub fn new(radius_m: f64) -> Self {
        Self { radius_m }
    }

    /// `trust` maps device id to current trust; missing devices count as 0.5.
    pub fn cluster(
        &self,
        reports: &[LocationReport],
        trust: &HashMap<String, f64>,
    ) -> ClusteringResult {
        let latest = latest_per_device(reports);
        let total_reports = latest.len();
        let mut clusters: Vec<Cluster> = Vec::new();

        for report in latest {
            let member = ClusterMember {
                trust: trust
                    .get(&report.device_id)
                    .copied()
                    .unwrap_or(crowdtrack_types::DEFAULT_TRUST),
                report,
            };
            let p = member.report.point();
            match clusters
                .iter_mut()
                .find(|c| geo::distance(c.centroid, p) <= self.radius_m)
            {
                Some(c) => c.absorb(member),
                None => clusters.push(Cluster::seed(member)),
            }
        }

        // Highest trust sum; ties go to the larger, then the earlier cluster.
        let main = clusters
            .iter()
            .enumerate()
            .fold(None::<(usize, &Cluster)>, |best, (i, c)| match best {
                Some((_, b))
                    if b.trust_sum > c.trust_sum
                        || (b.trust_sum == c.trust_sum && b.len() >= c.len()) =>
                {
                    best
                }
                _ => Some((i, c)),
            })
            .map(|(i, _)| i);

        ClusteringResult {
            clusters,
            main,
            total_reports,
        }
    }
}

/// Each device's most recent report, sorted by device id.
pub fn latest_per_device(reports: &[LocationReport]) -> Vec<LocationReport> {
    let mut latest: HashMap<&str, &LocationReport> = HashMap::new();
    for r in reports {
        latest
            .entry(r.device_id.as_str())
            .and_modify(|cur| {
                if (r.received_at, r.id) > (cur.received_at, cur.id) {
                    *cur = r;
                }
            })
            .or_insert(r);
    }
    let mut out: Vec<LocationReport> = latest.into_values().cloned().collect();
    out.sort_by(|a, b| a.device_id.cmp(&b.device_id));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use crowdtrack_types::ReportSubmission;

    fn report(device: &str, lat: f64, lon: f64, secs: i64) -> LocationReport {
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 8, 0, 0).unwrap() + Duration::seconds(secs);
        let sub = ReportSubmission {
            device_id: device.into(),
            vehicle_id: "bus-1".into(),
            lat,
            lon,
            accuracy_m: 10.0,
            speed_kmh: None,
            heading_deg: None,
            client_timestamp: at,
            received_at: at,
        };
        LocationReport::from_submission(&sub, 0.8, 0.9, true)
    }

    fn trust(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(d, t)| (d.to_string(), *t)).collect()
    }

    #[test]
    fn test_main_cluster_by_trust_not_size() {
        let reports = vec![
            report("a", 9.0000, 38.75, 0),
            report("b", 9.00005, 38.75, 0),
            report("c", 9.01, 38.75, 0),
            report("d", 9.01005, 38.75, 0),
            report("e", 9.01002, 38.75, 0),
        ];
        let t = trust(&[("a", 0.95), ("b", 0.9), ("c", 0.3), ("d", 0.3), ("e", 0.3)]);
        let res = SpatialClusterer::new(25.0).cluster(&reports, &t);
        assert_eq!(res.clusters.len(), 2);
        let main = res.main_cluster().unwrap();
        assert_eq!(main.device_ids(), vec!["a", "b"]);
        assert!((res.efficiency() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_clustering_is_idempotent_and_order_independent() {
        let mut reports = vec![
            report("c", 9.00010, 38.75, 0),
            report("a", 9.00000, 38.75, 0),
            report("b", 9.00020, 38.75, 0),
            report("d", 9.00300, 38.75, 0),
        ];
        let t = trust(&[("a", 0.8), ("b", 0.8), ("c", 0.8), ("d", 0.8)]);
        let clusterer = SpatialClusterer::new(25.0);
        let first = clusterer.cluster(&reports, &t);
        let second = clusterer.cluster(&reports, &t);
        reports.reverse();
        let shuffled = clusterer.cluster(&reports, &t);

        for other in [&second, &shuffled] {
            let (m1, m2) = (first.main_cluster().unwrap(), other.main_cluster().unwrap());
            assert_eq!(m1.device_ids(), m2.device_ids());
            assert_eq!(m1.centroid, m2.centroid);
        }
    }

    #[test]
    fn test_latest_report_per_device_only() {
        let reports = vec![
            report("a", 9.0, 38.75, 0),
            report("a", 9.0001, 38.75, 30),
            report("b", 9.0001, 38.75, 30),
        ];
        let res = SpatialClusterer::new(25.0).cluster(&reports, &HashMap::new());
        assert_eq!(res.total_reports, 2);
        assert_eq!(res.clusters.len(), 1);
    }

    #[test]
    fn test_empty_input() {
        let res = SpatialClusterer::new(25.0).cluster(&[], &HashMap::new());
        assert!(res.main.is_none());
        assert_eq!(res.efficiency(), 0.0);
    }
}

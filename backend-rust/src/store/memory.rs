use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crowdtrack_types::{
    AggregatedPosition, DeviceTrustRecord, LocationReport, SessionEndReason, TrackingSession,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{PositionStore, ReportStore, SessionStore, TrustStore};
use crate::error::Result;

#[derive(Default)]
struct Inner {
    reports: Vec<LocationReport>,
    trust: HashMap<String, DeviceTrustRecord>,
    sessions: HashMap<Uuid, TrackingSession>,
    positions: HashMap<String, AggregatedPosition>,
}

/// In-process store behind a single async RwLock. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn report_count(&self) -> usize {
        self.inner.read().await.reports.len()
    }

    pub async fn all_sessions(&self) -> Vec<TrackingSession> {
        self.inner.read().await.sessions.values().cloned().collect()
    }
}

fn sorted_by_time(mut reports: Vec<LocationReport>) -> Vec<LocationReport> {
    reports.sort_by_key(|r| r.received_at);
    reports
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn append(&self, report: &LocationReport) -> Result<()> {
        self.inner.write().await.reports.push(report.clone());
        Ok(())
    }

    async fn last_accepted(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<LocationReport>> {
        let inner = self.inner.read().await;
        Ok(inner
            .reports
            .iter()
            .filter(|r| r.device_id == device_id && r.is_validated && r.received_at >= since)
            .max_by_key(|r| r.received_at)
            .cloned())
    }

    async fn device_history(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LocationReport>> {
        let inner = self.inner.read().await;
        let all = sorted_by_time(
            inner
                .reports
                .iter()
                .filter(|r| r.device_id == device_id && r.is_validated && r.received_at >= since)
                .cloned()
                .collect(),
        );
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).collect())
    }

    async fn device_reports_since(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LocationReport>> {
        let inner = self.inner.read().await;
        Ok(sorted_by_time(
            inner
                .reports
                .iter()
                .filter(|r| r.device_id == device_id && r.received_at >= since)
                .cloned()
                .collect(),
        ))
    }

    async fn vehicle_reports_between(
        &self,
        vehicle_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        validated_only: bool,
    ) -> Result<Vec<LocationReport>> {
        let inner = self.inner.read().await;
        Ok(sorted_by_time(
            inner
                .reports
                .iter()
                .filter(|r| {
                    r.vehicle_id == vehicle_id
                        && r.received_at >= from
                        && r.received_at <= to
                        && (!validated_only || r.is_validated)
                })
                .cloned()
                .collect(),
        ))
    }

    async fn active_vehicles(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        let ids: BTreeSet<String> = inner
            .reports
            .iter()
            .filter(|r| r.received_at >= since)
            .map(|r| r.vehicle_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }
}

#[async_trait]
impl TrustStore for MemoryStore {
    async fn get_trust(&self, device_id: &str) -> Result<Option<DeviceTrustRecord>> {
        Ok(self.inner.read().await.trust.get(device_id).cloned())
    }

    async fn put_trust(&self, record: &DeviceTrustRecord) -> Result<()> {
        self.inner
            .write()
            .await
            .trust
            .insert(record.device_id.clone(), record.clone().clamped());
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn start_session(
        &self,
        session: &TrackingSession,
    ) -> Result<Option<TrackingSession>> {
        // One write guard covers end-prior + insert.
        let mut inner = self.inner.write().await;
        let mut ended = None;
        for existing in inner.sessions.values_mut() {
            if existing.device_id == session.device_id && existing.is_active {
                existing.end(SessionEndReason::Superseded, session.started_at);
                ended = Some(existing.clone());
            }
        }
        inner.sessions.insert(session.session_id, session.clone());
        Ok(ended)
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<TrackingSession>> {
        Ok(self.inner.read().await.sessions.get(&session_id).cloned())
    }

    async fn active_session_for_device(&self, device_id: &str) -> Result<Option<TrackingSession>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .values()
            .find(|s| s.device_id == device_id && s.is_active)
            .cloned())
    }

    async fn active_sessions_for_vehicle(&self, vehicle_id: &str) -> Result<Vec<TrackingSession>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .values()
            .filter(|s| s.vehicle_id == vehicle_id && s.is_active)
            .cloned()
            .collect())
    }

    async fn end_session(
        &self,
        session_id: Uuid,
        reason: SessionEndReason,
        at: DateTime<Utc>,
    ) -> Result<Option<TrackingSession>> {
        let mut inner = self.inner.write().await;
        Ok(inner.sessions.get_mut(&session_id).map(|s| {
            if s.is_active {
                s.end(reason, at);
            }
            s.clone()
        }))
    }

    async fn record_contribution(
        &self,
        session_id: Uuid,
        valid: bool,
        accuracy_m: f64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(s) = inner.sessions.get_mut(&session_id) {
            if s.is_active {
                s.record_contribution(valid, accuracy_m, at);
            }
        }
        Ok(())
    }

    async fn stale_sessions(&self, before: DateTime<Utc>) -> Result<Vec<TrackingSession>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .values()
            .filter(|s| s.is_active && s.last_activity < before)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn get_position(&self, vehicle_id: &str) -> Result<Option<AggregatedPosition>> {
        Ok(self.inner.read().await.positions.get(vehicle_id).cloned())
    }

    async fn put_position(&self, position: &AggregatedPosition) -> Result<()> {
        self.inner
            .write()
            .await
            .positions
            .insert(position.vehicle_id.clone(), position.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crowdtrack_types::ReportSubmission;

    fn report(device: &str, at: DateTime<Utc>, valid: bool) -> LocationReport {
        let sub = ReportSubmission {
            device_id: device.into(),
            vehicle_id: "bus-1".into(),
            lat: 9.0,
            lon: 38.75,
            accuracy_m: 10.0,
            speed_kmh: None,
            heading_deg: None,
            client_timestamp: at,
            received_at: at,
        };
        LocationReport::from_submission(&sub, 0.8, 0.9, valid)
    }

    #[tokio::test]
    async fn test_start_session_supersedes_prior() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let first = TrackingSession::start("d1", "bus-1", 0.5, now);
        assert!(store.start_session(&first).await.unwrap().is_none());

        let second = TrackingSession::start("d1", "bus-2", 0.5, now + Duration::seconds(5));
        let ended = store.start_session(&second).await.unwrap().unwrap();
        assert_eq!(ended.session_id, first.session_id);
        assert_eq!(ended.end_reason, Some(SessionEndReason::Superseded));

        let active: Vec<_> = store
            .all_sessions()
            .await
            .into_iter()
            .filter(|s| s.device_id == "d1" && s.is_active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, second.session_id);
    }

    #[tokio::test]
    async fn test_last_accepted_skips_unvalidated() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        store.append(&report("d1", t0, true)).await.unwrap();
        store.append(&report("d1", t0 + Duration::seconds(10), false)).await.unwrap();

        let last = store.last_accepted("d1", t0 - Duration::minutes(1)).await.unwrap().unwrap();
        assert_eq!(last.received_at, t0);
    }

    #[tokio::test]
    async fn test_device_history_keeps_newest() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        for i in 0..5 {
            store.append(&report("d1", t0 + Duration::seconds(i * 10), true)).await.unwrap();
        }
        let hist = store.device_history("d1", t0, 3).await.unwrap();
        assert_eq!(hist.len(), 3);
        assert_eq!(hist[0].received_at, t0 + Duration::seconds(20));
        assert_eq!(hist[2].received_at, t0 + Duration::seconds(40));
    }
}

//! # sessions
//!
//! Rider tracking sessions. The session store is the source of truth; the
//! cache only memoises session lookups and is invalidated on every change.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use crowdtrack_types::{SessionEndReason, TrackingSession};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{cache_forget, cache_get_json, cache_put_json, keys, Cache};
use crate::config::{CacheConfig, SessionConfig};
use crate::error::{Result, TrackingError};
use crate::store::SessionStore;

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cache: Arc<dyn Cache>,
    cfg: SessionConfig,
    cache_cfg: CacheConfig,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        cache: Arc<dyn Cache>,
        cfg: SessionConfig,
        cache_cfg: CacheConfig,
    ) -> Self {
        Self {
            store,
            cache,
            cfg,
            cache_cfg,
        }
    }

    /// Starts a session, ending any prior active session for the device in
    /// the same store transaction.
    pub async fn start(
        &self,
        device_id: &str,
        vehicle_id: &str,
        trust: f64,
        now: DateTime<Utc>,
    ) -> Result<TrackingSession> {
        let session = TrackingSession::start(device_id, vehicle_id, trust, now);
        let superseded = self.store.start_session(&session).await?;
        if let Some(old) = superseded {
            cache_forget(self.cache.as_ref(), &keys::session(old.session_id)).await;
            info!(device = %device_id, old = %old.session_id, "session superseded");
        }
        cache_put_json(
            self.cache.as_ref(),
            &keys::session(session.session_id),
            &session,
            self.cache_cfg.session_ttl(),
        )
        .await;
        info!(device = %device_id, vehicle = %vehicle_id, session = %session.session_id, "session started");
        Ok(session)
    }

    pub async fn end(
        &self,
        session_id: Uuid,
        reason: SessionEndReason,
        now: DateTime<Utc>,
    ) -> Result<TrackingSession> {
        let ended = self
            .store
            .end_session(session_id, reason, now)
            .await?
            .ok_or(TrackingError::SessionNotFound(session_id))?;
        cache_forget(self.cache.as_ref(), &keys::session(session_id)).await;
        info!(session = %session_id, ?reason, "session ended");
        Ok(ended)
    }

    pub async fn get(&self, session_id: Uuid) -> Result<Option<TrackingSession>> {
        let key = keys::session(session_id);
        if let Some(s) = cache_get_json::<TrackingSession>(self.cache.as_ref(), &key).await {
            return Ok(Some(s));
        }
        let found = self.store.get_session(session_id).await?;
        if let Some(s) = &found {
            cache_put_json(self.cache.as_ref(), &key, s, self.cache_cfg.session_ttl()).await;
        }
        Ok(found)
    }

    /// Always read from the store.
    pub async fn active_for_device(&self, device_id: &str) -> Result<Option<TrackingSession>> {
        self.store.active_session_for_device(device_id).await
    }

    /// Folds an accepted report into the device's active session, if that
    /// session is for the same vehicle.
    pub async fn record_contribution(
        &self,
        device_id: &str,
        vehicle_id: &str,
        valid: bool,
        accuracy_m: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let Some(session) = self.store.active_session_for_device(device_id).await? else {
            return Ok(None);
        };
        if session.vehicle_id != vehicle_id {
            return Ok(None);
        }
        self.store
            .record_contribution(session.session_id, valid, accuracy_m, at)
            .await?;
        cache_forget(self.cache.as_ref(), &keys::session(session.session_id)).await;
        Ok(Some(session.session_id))
    }

    /// Ends every active session idle longer than the inactivity timeout.
    pub async fn reap(&self, now: DateTime<Utc>) -> Result<Vec<TrackingSession>> {
        let cutoff = now - Duration::seconds(self.cfg.inactivity_timeout_secs);
        let stale = self.store.stale_sessions(cutoff).await?;
        let mut ended = Vec::with_capacity(stale.len());
        for s in stale {
            match self.end(s.session_id, SessionEndReason::InactivityTimeout, now).await {
                Ok(done) => ended.push(done),
                Err(e) => warn!(session = %s.session_id, "failed to reap session: {e}"),
            }
        }
        Ok(ended)
    }

    /// Ends a vehicle's sessions once it leaves its service window.
    pub async fn complete_trip(&self, vehicle_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let active = self.store.active_sessions_for_vehicle(vehicle_id).await?;
        let n = active.len();
        for s in active {
            self.end(s.session_id, SessionEndReason::TripCompleted, now).await?;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::MemoryStore;

    fn manager() -> (SessionManager, MemoryStore) {
        let store = MemoryStore::new();
        let mgr = SessionManager::new(
            Arc::new(store.clone()),
            Arc::new(MemoryCache::new()),
            SessionConfig::default(),
            CacheConfig::default(),
        );
        (mgr, store)
    }

    #[tokio::test]
    async fn test_reap_ends_idle_sessions() {
        let (mgr, _) = manager();
        let t0 = Utc::now();
        let idle = mgr.start("d1", "bus-1", 0.5, t0).await.unwrap();
        let busy = mgr.start("d2", "bus-1", 0.5, t0).await.unwrap();
        mgr.record_contribution("d2", "bus-1", true, 10.0, t0 + Duration::minutes(10))
            .await
            .unwrap();

        let reaped = mgr.reap(t0 + Duration::minutes(16)).await.unwrap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].session_id, idle.session_id);
        assert_eq!(reaped[0].end_reason, Some(SessionEndReason::InactivityTimeout));
        assert!(mgr.get(busy.session_id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_end_unknown_session() {
        let (mgr, _) = manager();
        let err = mgr
            .end(Uuid::new_v4(), SessionEndReason::Stopped, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, TrackingError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_contribution_for_other_vehicle_ignored() {
        let (mgr, _) = manager();
        let now = Utc::now();
        mgr.start("d1", "bus-1", 0.5, now).await.unwrap();
        let hit = mgr
            .record_contribution("d1", "bus-2", true, 10.0, now)
            .await
            .unwrap();
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn test_get_after_end_is_not_stale() {
        let (mgr, _) = manager();
        let now = Utc::now();
        let s = mgr.start("d1", "bus-1", 0.5, now).await.unwrap();
        assert!(mgr.get(s.session_id).await.unwrap().unwrap().is_active);
        mgr.end(s.session_id, SessionEndReason::Stopped, now).await.unwrap();
        assert!(!mgr.get(s.session_id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_complete_trip() {
        let (mgr, store) = manager();
        let now = Utc::now();
        mgr.start("d1", "bus-1", 0.5, now).await.unwrap();
        mgr.start("d2", "bus-1", 0.5, now).await.unwrap();
        mgr.start("d3", "bus-2", 0.5, now).await.unwrap();
        assert_eq!(mgr.complete_trip("bus-1", now).await.unwrap(), 2);
        let still: Vec<_> = store.all_sessions().await.into_iter().filter(|s| s.is_active).collect();
        assert_eq!(still.len(), 1);
        assert_eq!(still[0].vehicle_id, "bus-2");
    }
}

//! # engine
//!
//! `TrackingEngine` ties the pure components (validator, trust scorer,
//! clusterer, aggregator) to the collaborator seams (stores, cache, schedule,
//! broadcast sink).
//!
//! ## Flow
//!
//! - Ingestion: `validate_report` → `record_report`. Hard rejects are never
//!   persisted; soft rejects are stored with `is_validated = false`.
//! - Every accepted report bumps the device's trust counters and session
//!   counters, then schedules a trust recalculation.
//! - Every `cycle_secs` each recently active vehicle is clustered,
//!   aggregated, persisted, cached and broadcast. Vehicles are independent:
//!   one vehicle failing never stops the others.
//!
//! Trust read-modify-write happens only under the device's entry in
//! `trust_locks`.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use crowdtrack_types::{
    AggregatedPosition, DeviceTrustRecord, LocationReport, PositionBroadcast, ReportSubmission,
    RouteStop, SessionEndReason, TrackingSession, DEFAULT_TRUST,
};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregator::{Fallback, PositionAggregator};
use crate::broadcast::BroadcastSink;
use crate::cache::{cache_get_json, cache_put_json, keys, Cache};
use crate::clustering::{ClusteringResult, SpatialClusterer};
use crate::config::EngineConfig;
use crate::error::{Result, TrackingError};
use crate::geo;
use crate::locks::KeyedLocks;
use crate::route_gate::RouteGate;
use crate::schedule::{ScheduleGate, ScheduleWindow};
use crate::sessions::SessionManager;
use crate::store::{MemoryStore, PositionStore, ReportStore, SessionStore, TrustStore};
use crate::trust::TrustScorer;
use crate::validator::{ReportValidator, ValidationInput, ValidationOutcome};

// ── Wiring ────────────────────────────────────────────────────────────────────

/// Everything the engine talks to outside its own process memory.
#[derive(Clone)]
pub struct Collaborators {
    pub reports: Arc<dyn ReportStore>,
    pub trust: Arc<dyn TrustStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub positions: Arc<dyn PositionStore>,
    pub cache: Arc<dyn Cache>,
    pub schedule: Arc<dyn ScheduleGate>,
    pub sink: Arc<dyn BroadcastSink>,
}

impl Collaborators {
    /// All four stores backed by one `MemoryStore`.
    pub fn in_memory(
        store: MemoryStore,
        cache: Arc<dyn Cache>,
        schedule: Arc<dyn ScheduleGate>,
        sink: Arc<dyn BroadcastSink>,
    ) -> Self {
        Self {
            reports: Arc::new(store.clone()),
            trust: Arc::new(store.clone()),
            sessions: Arc::new(store.clone()),
            positions: Arc::new(store),
            cache,
            schedule,
            sink,
        }
    }
}

/// Response to an accepted submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportReceipt {
    pub report_id: Uuid,
    pub validation: ValidationOutcome,
}

/// What one aggregation cycle did for one vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub position: AggregatedPosition,
    /// Devices flagged as outliers on their latest report
    pub struck: Vec<String>,
    pub deactivated: Vec<String>,
}

#[derive(Clone)]
pub struct TrackingEngine {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: EngineConfig,
    reports: Arc<dyn ReportStore>,
    trust: Arc<dyn TrustStore>,
    positions: Arc<dyn PositionStore>,
    cache: Arc<dyn Cache>,
    schedule: Arc<dyn ScheduleGate>,
    sink: Arc<dyn BroadcastSink>,
    sessions: SessionManager,
    validator: ReportValidator,
    scorer: TrustScorer,
    clusterer: SpatialClusterer,
    aggregator: PositionAggregator,
    route: RouteGate,
    trust_locks: KeyedLocks,
    strikes: Mutex<HashMap<String, Strikes>>,
}

/// Outlier strikes held against one device. A strike is earned at most once
/// per report, so re-running a cycle over the same window adds nothing.
#[derive(Debug, Clone)]
struct Strikes {
    vehicle_id: String,
    count: u32,
    last_report: Uuid,
}

impl TrackingEngine {
    pub fn new(cfg: EngineConfig, c: Collaborators) -> Self {
        let scorer = TrustScorer::new(&cfg);
        let threshold = scorer.threshold();
        let inner = Inner {
            sessions: SessionManager::new(
                c.sessions,
                c.cache.clone(),
                cfg.session.clone(),
                cfg.cache.clone(),
            ),
            validator: ReportValidator::new(&cfg),
            clusterer: SpatialClusterer::new(cfg.cluster.radius_m),
            aggregator: PositionAggregator::new(cfg.aggregation.clone(), threshold),
            route: RouteGate::new(&cfg.validation),
            scorer,
            reports: c.reports,
            trust: c.trust,
            positions: c.positions,
            cache: c.cache,
            schedule: c.schedule,
            sink: c.sink,
            trust_locks: KeyedLocks::new(),
            strikes: Mutex::new(HashMap::new()),
            cfg,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.cfg
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    // ── Ingestion ─────────────────────────────────────────────────────────────

    /// Runs every check against the device's recent history. Reads only.
    pub async fn validate_report(&self, sub: &ReportSubmission) -> Result<ValidationOutcome> {
        if sub.device_id.trim().is_empty() || sub.vehicle_id.trim().is_empty() {
            return Err(TrackingError::InvalidInput(
                "deviceId and vehicleId are required".into(),
            ));
        }
        let v = &self.inner.cfg.validation;
        let since = sub.received_at - Duration::seconds(v.previous_report_lookback_secs);
        let previous = self.inner.reports.last_accepted(&sub.device_id, since).await?;
        let history = self
            .inner
            .reports
            .device_history(&sub.device_id, since, v.movement_history_limit)
            .await?;
        let window = self
            .inner
            .schedule
            .is_vehicle_active(&sub.vehicle_id, sub.received_at)
            .await?;
        let stops = self.route_stops(&window).await?;

        Ok(self.inner.validator.validate(&ValidationInput {
            submission: sub,
            previous: previous.as_ref(),
            history: &history,
            schedule: &window,
            stops: &stops,
        }))
    }

    /// Persists a validated submission and returns the new report id.
    /// A hard reject comes back as `TrackingError::Rejected` and stores nothing.
    pub async fn record_report(
        &self,
        sub: &ReportSubmission,
        outcome: &ValidationOutcome,
    ) -> Result<Uuid> {
        if let Some(reason) = outcome.reject {
            return Err(TrackingError::Rejected {
                reason,
                recommendation: outcome.primary_recommendation(),
            });
        }

        let trust = self.trust_score(&sub.device_id).await?;
        let weight = self.inner.scorer.report_weight(
            trust,
            outcome.confidence_score,
            sub.accuracy_m,
            outcome.valid,
        );
        let report =
            LocationReport::from_submission(sub, weight, outcome.confidence_score, outcome.valid);
        self.inner.reports.append(&report).await?;
        debug!(
            device = %report.device_id,
            vehicle = %report.vehicle_id,
            valid = report.is_validated,
            weight = report.reputation_weight,
            "report recorded"
        );

        self.after_accept(&report).await;
        Ok(report.id)
    }

    /// Validate then record.
    pub async fn submit_report(&self, sub: &ReportSubmission) -> Result<ReportReceipt> {
        let validation = self.validate_report(sub).await?;
        let report_id = self.record_report(sub, &validation).await?;
        Ok(ReportReceipt {
            report_id,
            validation,
        })
    }

    async fn after_accept(&self, report: &LocationReport) {
        if let Err(e) = self.note_contribution(report).await {
            warn!(device = %report.device_id, "trust counters not updated: {e}");
        }
        if let Err(e) = self
            .inner
            .sessions
            .record_contribution(
                &report.device_id,
                &report.vehicle_id,
                report.is_validated,
                report.accuracy_m,
                report.received_at,
            )
            .await
        {
            warn!(device = %report.device_id, "session counters not updated: {e}");
        }

        let at = report.received_at;
        if self.inner.cfg.trust.background_recalculation {
            let engine = self.clone();
            let device = report.device_id.clone();
            tokio::spawn(async move {
                if let Err(e) = engine.recalculate_trust_at(&device, at).await {
                    warn!(device = %device, "trust recalculation failed: {e}");
                }
            });
        } else if let Err(e) = self.recalculate_trust_at(&report.device_id, at).await {
            warn!(device = %report.device_id, "trust recalculation failed: {e}");
        }
    }

    async fn note_contribution(&self, report: &LocationReport) -> Result<()> {
        let _guard = self.inner.trust_locks.lock(&report.device_id).await;
        let mut record = self.load_trust(&report.device_id, report.received_at).await?;
        record.total_contributions += 1;
        if self
            .inner
            .scorer
            .is_accurate_contribution(report.is_validated, report.accuracy_m)
        {
            record.accurate_contributions += 1;
        }
        if report.received_at > record.last_activity {
            record.last_activity = report.received_at;
        }
        self.inner.trust.put_trust(&record.clamped()).await
    }

    // ── Positions ─────────────────────────────────────────────────────────────

    pub async fn current_position(&self, vehicle_id: &str) -> Result<AggregatedPosition> {
        self.current_position_at(vehicle_id, Utc::now()).await
    }

    /// Cache, then store, then a `no_data` placeholder.
    pub async fn current_position_at(
        &self,
        vehicle_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AggregatedPosition> {
        let key = keys::position(vehicle_id);
        if let Some(p) = cache_get_json::<AggregatedPosition>(self.inner.cache.as_ref(), &key).await
        {
            return Ok(p);
        }
        match self.inner.positions.get_position(vehicle_id).await? {
            Some(p) => {
                cache_put_json(
                    self.inner.cache.as_ref(),
                    &key,
                    &p,
                    self.inner.cfg.cache.position_ttl(),
                )
                .await;
                Ok(p)
            }
            None => Ok(AggregatedPosition::no_data(vehicle_id, now)),
        }
    }

    // ── Sessions ──────────────────────────────────────────────────────────────

    pub async fn start_session(&self, device_id: &str, vehicle_id: &str) -> Result<TrackingSession> {
        self.start_session_at(device_id, vehicle_id, Utc::now()).await
    }

    pub async fn start_session_at(
        &self,
        device_id: &str,
        vehicle_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TrackingSession> {
        if device_id.trim().is_empty() || vehicle_id.trim().is_empty() {
            return Err(TrackingError::InvalidInput(
                "deviceId and vehicleId are required".into(),
            ));
        }
        let trust = self.trust_score(device_id).await?;
        self.inner.sessions.start(device_id, vehicle_id, trust, now).await
    }

    pub async fn end_session(&self, session_id: Uuid) -> Result<TrackingSession> {
        self.end_session_at(session_id, Utc::now()).await
    }

    pub async fn end_session_at(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TrackingSession> {
        self.inner
            .sessions
            .end(session_id, SessionEndReason::Stopped, now)
            .await
    }

    pub async fn reap_sessions(&self) -> Result<usize> {
        self.reap_sessions_at(Utc::now()).await
    }

    pub async fn reap_sessions_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let ended = self.inner.sessions.reap(now).await?;
        if !ended.is_empty() {
            info!("⏱️ Reaped {} idle sessions", ended.len());
        }
        Ok(ended.len())
    }

    // ── Trust ─────────────────────────────────────────────────────────────────

    /// Current trust score: cache, then store, then the default.
    pub async fn trust_score(&self, device_id: &str) -> Result<f64> {
        let key = keys::trust(device_id);
        if let Some(t) = cache_get_json::<f64>(self.inner.cache.as_ref(), &key).await {
            return Ok(t);
        }
        let score = self
            .inner
            .trust
            .get_trust(device_id)
            .await?
            .map(|r| r.trust_score)
            .unwrap_or(DEFAULT_TRUST);
        cache_put_json(
            self.inner.cache.as_ref(),
            &key,
            &score,
            self.inner.cfg.cache.trust_ttl(),
        )
        .await;
        Ok(score)
    }

    pub async fn trust_record(&self, device_id: &str) -> Result<Option<DeviceTrustRecord>> {
        self.inner.trust.get_trust(device_id).await
    }

    pub async fn recalculate_trust(&self, device_id: &str) -> Result<DeviceTrustRecord> {
        self.recalculate_trust_at(device_id, Utc::now()).await
    }

    /// Recomputes one device's trust from its window. Serialised per device.
    pub async fn recalculate_trust_at(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DeviceTrustRecord> {
        let _guard = self.inner.trust_locks.lock(device_id).await;
        let scorer = &self.inner.scorer;

        let previous = self.load_trust(device_id, now).await?;
        let window = self
            .inner
            .reports
            .device_reports_since(device_id, now - scorer.window())
            .await?;
        let peers = self.peer_reports(device_id, &window).await?;

        let (record, breakdown) = scorer.recalculate(&previous, &window, &peers, now);
        self.inner.trust.put_trust(&record).await?;
        cache_put_json(
            self.inner.cache.as_ref(),
            &keys::trust(device_id),
            &record.trust_score,
            self.inner.cfg.cache.trust_ttl(),
        )
        .await;

        debug!(
            device = %device_id,
            from = previous.trust_score,
            to = record.trust_score,
            candidate = breakdown.candidate,
            "trust recalculated"
        );
        Ok(record)
    }

    async fn load_trust(&self, device_id: &str, now: DateTime<Utc>) -> Result<DeviceTrustRecord> {
        Ok(self
            .inner
            .trust
            .get_trust(device_id)
            .await?
            .unwrap_or_else(|| DeviceTrustRecord::new(device_id, now)))
    }

    /// Validated reports from other devices on the same vehicles, around the
    /// time span of the device's sampled reports.
    async fn peer_reports(
        &self,
        device_id: &str,
        window: &[LocationReport],
    ) -> Result<Vec<LocationReport>> {
        let span = self.inner.scorer.concurrency_window();
        let mut ranges: HashMap<&str, (DateTime<Utc>, DateTime<Utc>)> = HashMap::new();
        for r in window.iter().rev().take(self.inner.scorer.proximity_sample()) {
            ranges
                .entry(r.vehicle_id.as_str())
                .and_modify(|(lo, hi)| {
                    *lo = (*lo).min(r.received_at);
                    *hi = (*hi).max(r.received_at);
                })
                .or_insert((r.received_at, r.received_at));
        }

        let mut peers = Vec::new();
        for (vehicle, (lo, hi)) in ranges {
            let found = self
                .inner
                .reports
                .vehicle_reports_between(vehicle, lo - span, hi + span, true)
                .await?;
            peers.extend(found.into_iter().filter(|p| p.device_id != device_id));
        }
        Ok(peers)
    }

    // ── Aggregation cycle ─────────────────────────────────────────────────────

    pub async fn run_cycle(&self, vehicle_id: &str) -> Result<CycleOutcome> {
        self.run_cycle_at(vehicle_id, Utc::now()).await
    }

    pub async fn run_cycle_at(&self, vehicle_id: &str, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let previous = self.inner.positions.get_position(vehicle_id).await?;
        let window = self.inner.schedule.is_vehicle_active(vehicle_id, now).await?;

        if !window.active {
            self.clear_strikes(vehicle_id);
            let ended = self.inner.sessions.complete_trip(vehicle_id, now).await?;
            if ended > 0 {
                info!(vehicle = %vehicle_id, "🏁 Trip over, ended {ended} sessions");
            }
            let position = self.inner.aggregator.inactive(vehicle_id, previous.as_ref(), now);
            self.publish(&position).await?;
            return Ok(CycleOutcome {
                position,
                struck: Vec::new(),
                deactivated: Vec::new(),
            });
        }

        let from = now - Duration::seconds(self.inner.cfg.cluster.window_secs);
        let recent = self
            .inner
            .reports
            .vehicle_reports_between(vehicle_id, from, now, true)
            .await?;

        let mut live = Vec::with_capacity(recent.len());
        for r in recent {
            if !self.is_deactivated(&r.device_id).await {
                live.push(r);
            }
        }

        let devices: BTreeSet<&str> = live.iter().map(|r| r.device_id.as_str()).collect();
        let mut trust = HashMap::with_capacity(devices.len());
        for d in &devices {
            trust.insert(d.to_string(), self.trust_score(d).await?);
        }

        let clusters = self.inner.clusterer.cluster(&live, &trust);
        let consensus = self.inner.aggregator.consensus(&clusters);
        let fallback = match consensus {
            Some(_) => None,
            None => self.fallback(vehicle_id, previous.as_ref(), now).await?,
        };
        let position = self.inner.aggregator.build(
            vehicle_id,
            consensus.as_ref(),
            fallback.as_ref(),
            clusters.total_reports as u32,
            previous.as_ref(),
            now,
        );

        let stops = self.route_stops(&window).await?;
        let (struck, at_limit) = self.update_strikes(vehicle_id, &clusters, &stops);
        let mut deactivated = Vec::new();
        for device in at_limit {
            self.deactivate(&device, "persistent outlier", now).await?;
            deactivated.push(device);
        }
        for device in devices {
            if deactivated.iter().any(|d| d == device) {
                continue;
            }
            if self.is_stationary(device, now).await? {
                self.deactivate(device, "stationary", now).await?;
                deactivated.push(device.to_string());
            }
        }

        self.publish(&position).await?;
        debug!(
            vehicle = %vehicle_id,
            status = ?position.status,
            confidence = position.confidence,
            trackers = position.active_trackers,
            "cycle complete"
        );
        Ok(CycleOutcome {
            position,
            struck,
            deactivated,
        })
    }

    pub async fn run_all_cycles(&self) -> Result<Vec<CycleOutcome>> {
        self.run_all_cycles_at(Utc::now()).await
    }

    /// One cycle per recently active vehicle, concurrently. A failing vehicle
    /// is logged and left out of the result.
    pub async fn run_all_cycles_at(&self, now: DateTime<Utc>) -> Result<Vec<CycleOutcome>> {
        let cfg = &self.inner.cfg;
        let lookback = cfg
            .aggregation
            .last_known_max_age_secs
            .max(cfg.cluster.window_secs);
        let vehicles = self
            .inner
            .reports
            .active_vehicles(now - Duration::seconds(lookback))
            .await?;

        let mut set = JoinSet::new();
        for vehicle in vehicles {
            let engine = self.clone();
            set.spawn(async move {
                let res = engine.run_cycle_at(&vehicle, now).await;
                (vehicle, res)
            });
        }

        let mut done = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => done.push(outcome),
                Ok((vehicle, Err(e))) => warn!(vehicle = %vehicle, "cycle skipped: {e}"),
                Err(e) => error!("cycle task failed: {e}"),
            }
        }
        done.sort_by(|a, b| a.position.vehicle_id.cmp(&b.position.vehicle_id));
        Ok(done)
    }

    /// Last known position first, historical average second.
    async fn fallback(
        &self,
        vehicle_id: &str,
        previous: Option<&AggregatedPosition>,
        now: DateTime<Utc>,
    ) -> Result<Option<Fallback>> {
        let agg = &self.inner.aggregator;
        let snapshot = previous.and_then(|p| p.last_known.as_ref());
        if let Some(f) = agg.last_known(snapshot, now) {
            return Ok(Some(f));
        }
        let days = self.inner.cfg.aggregation.historical_days;
        let past = self
            .inner
            .reports
            .vehicle_reports_between(vehicle_id, now - Duration::days(days), now, true)
            .await?;
        Ok(agg.historical(&past, now))
    }

    async fn publish(&self, position: &AggregatedPosition) -> Result<()> {
        self.inner.positions.put_position(position).await?;
        cache_put_json(
            self.inner.cache.as_ref(),
            &keys::position(&position.vehicle_id),
            position,
            self.inner.cfg.cache.position_ttl(),
        )
        .await;
        self.inner
            .sink
            .publish(&PositionBroadcast::from(position))
            .await;
        Ok(())
    }

    async fn route_stops(&self, window: &ScheduleWindow) -> Result<Vec<RouteStop>> {
        match (&window.handle, window.active) {
            (Some(handle), true) => {
                self.inner
                    .schedule
                    .ordered_stops(handle, window.direction)
                    .await
            }
            _ => Ok(Vec::new()),
        }
    }

    // ── Outliers / deactivation ───────────────────────────────────────────────

    /// Returns (devices flagged as outliers, devices at the strike limit).
    ///
    /// Entries for this vehicle whose device has no report in the window are
    /// dropped.
    fn update_strikes(
        &self,
        vehicle_id: &str,
        clusters: &ClusteringResult,
        stops: &[RouteStop],
    ) -> (Vec<String>, Vec<String>) {
        let threshold = self.inner.scorer.threshold();
        let limit = self.inner.cfg.cluster.outlier_strike_limit.max(1);
        let mut strikes = self.inner.strikes.lock().unwrap_or_else(|p| p.into_inner());
        strikes.retain(|device, s| {
            s.vehicle_id != vehicle_id
                || clusters
                    .clusters
                    .iter()
                    .any(|c| c.members.iter().any(|m| &m.report.device_id == device))
        });

        let mut struck = Vec::new();
        let mut at_limit = Vec::new();
        for (idx, cluster) in clusters.clusters.iter().enumerate() {
            let in_main = clusters.main == Some(idx);
            for m in &cluster.members {
                let device = &m.report.device_id;
                let isolated = !in_main && cluster.other_trusted(device, threshold) == 0;
                let off_corridor = self
                    .inner
                    .route
                    .corridor(stops, m.report.point())
                    .is_some_and(|c| !c.within);

                if !(isolated || off_corridor) {
                    strikes.remove(device);
                    continue;
                }

                let entry = strikes.entry(device.clone()).or_insert_with(|| Strikes {
                    vehicle_id: vehicle_id.to_string(),
                    count: 0,
                    last_report: Uuid::nil(),
                });
                if entry.vehicle_id != vehicle_id {
                    entry.vehicle_id = vehicle_id.to_string();
                    entry.count = 0;
                }
                if entry.last_report != m.report.id {
                    entry.last_report = m.report.id;
                    entry.count += 1;
                }
                struck.push(device.clone());
                if entry.count >= limit {
                    at_limit.push(device.clone());
                }
            }
        }
        (struck, at_limit)
    }

    fn clear_strikes(&self, vehicle_id: &str) {
        self.inner
            .strikes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|_, s| s.vehicle_id != vehicle_id);
    }

    /// Outlier strikes currently held against `device_id`.
    pub fn strike_count(&self, device_id: &str) -> u32 {
        self.inner
            .strikes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(device_id)
            .map_or(0, |s| s.count)
    }

    /// Every report over the stationary timeout stays within tolerance of
    /// every other one.
    async fn is_stationary(&self, device_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let c = &self.inner.cfg.cluster;
        let timeout = Duration::seconds(c.stationary_timeout_secs);
        let since = now - timeout - Duration::seconds(c.window_secs);
        let reports = self
            .inner
            .reports
            .device_reports_since(device_id, since)
            .await?;
        let (Some(first), Some(last)) = (reports.first(), reports.last()) else {
            return Ok(false);
        };
        if last.received_at - first.received_at < timeout {
            return Ok(false);
        }
        Ok(reports.iter().enumerate().all(|(i, a)| {
            reports[i + 1..]
                .iter()
                .all(|b| geo::distance(a.point(), b.point()) <= c.stationary_tolerance_m)
        }))
    }

    async fn deactivate(&self, device_id: &str, why: &str, now: DateTime<Utc>) -> Result<()> {
        let ttl = std::time::Duration::from_secs(self.inner.cfg.cluster.deactivation_ttl_secs);
        cache_put_json(
            self.inner.cache.as_ref(),
            &keys::deactivated(device_id),
            &now,
            ttl,
        )
        .await;
        self.inner
            .strikes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(device_id);

        if let Some(s) = self.inner.sessions.active_for_device(device_id).await? {
            self.inner
                .sessions
                .end(s.session_id, SessionEndReason::Deactivated, now)
                .await?;
        }
        warn!(device = %device_id, reason = why, "🚫 Device deactivated");
        Ok(())
    }

    pub async fn is_deactivated(&self, device_id: &str) -> bool {
        cache_get_json::<DateTime<Utc>>(self.inner.cache.as_ref(), &keys::deactivated(device_id))
            .await
            .is_some()
    }
}

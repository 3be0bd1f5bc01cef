//! # store
//!
//! Persistence seams consumed by the engine.
//!
//! - [`ReportStore`] is append-only; reports are never mutated.
//! - [`TrustStore`], [`SessionStore`] and [`PositionStore`] are mutable-row
//!   stores keyed by device, session and vehicle.
//!
//! [`MemoryStore`] backs tests and single-node dev; [`PgStore`] backs
//! production on PostgreSQL.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crowdtrack_types::{
    AggregatedPosition, DeviceTrustRecord, LocationReport, SessionEndReason, TrackingSession,
};
use uuid::Uuid;

use crate::error::Result;

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn append(&self, report: &LocationReport) -> Result<()>;

    /// Most recent validated report from `device_id` received at or after `since`.
    async fn last_accepted(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<LocationReport>>;

    /// Validated reports from `device_id` since `since`, oldest first, at most
    /// `limit` of the newest.
    async fn device_history(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LocationReport>>;

    /// Every report (validated or not) from `device_id` since `since`, oldest first.
    async fn device_reports_since(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LocationReport>>;

    /// Reports for `vehicle_id` received in `[from, to]`, oldest first.
    async fn vehicle_reports_between(
        &self,
        vehicle_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        validated_only: bool,
    ) -> Result<Vec<LocationReport>>;

    /// Vehicles with at least one report since `since`.
    async fn active_vehicles(&self, since: DateTime<Utc>) -> Result<Vec<String>>;
}

#[async_trait]
pub trait TrustStore: Send + Sync {
    async fn get_trust(&self, device_id: &str) -> Result<Option<DeviceTrustRecord>>;
    async fn put_trust(&self, record: &DeviceTrustRecord) -> Result<()>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts `session` and, in the same transaction, ends any active session
    /// for the same device with reason `Superseded`. Returns the ended session.
    async fn start_session(
        &self,
        session: &TrackingSession,
    ) -> Result<Option<TrackingSession>>;

    async fn get_session(&self, session_id: Uuid) -> Result<Option<TrackingSession>>;

    async fn active_session_for_device(&self, device_id: &str) -> Result<Option<TrackingSession>>;

    async fn active_sessions_for_vehicle(&self, vehicle_id: &str) -> Result<Vec<TrackingSession>>;

    /// Ends an active session. None when the id is unknown; an already-ended
    /// session is returned unchanged.
    async fn end_session(
        &self,
        session_id: Uuid,
        reason: SessionEndReason,
        at: DateTime<Utc>,
    ) -> Result<Option<TrackingSession>>;

    /// Folds one report into the session's running counters.
    async fn record_contribution(
        &self,
        session_id: Uuid,
        valid: bool,
        accuracy_m: f64,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Active sessions whose last activity is older than `before`.
    async fn stale_sessions(&self, before: DateTime<Utc>) -> Result<Vec<TrackingSession>>;
}

#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn get_position(&self, vehicle_id: &str) -> Result<Option<AggregatedPosition>>;
    async fn put_position(&self, position: &AggregatedPosition) -> Result<()>;
}

//! PostgreSQL-backed store. The schema is created idempotently on connect.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crowdtrack_types::{
    AggregatedPosition, DeviceTrustRecord, LastKnownLocation, LocationReport, PositionSource,
    PositionStatus, SessionEndReason, TrackingSession,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::info;
use uuid::Uuid;

use super::{PositionStore, ReportStore, SessionStore, TrustStore};
use crate::error::{Result, TrackingError};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS location_reports (
    id UUID PRIMARY KEY,
    device_id TEXT NOT NULL,
    vehicle_id TEXT NOT NULL,
    lat DOUBLE PRECISION NOT NULL,
    lon DOUBLE PRECISION NOT NULL,
    accuracy_m DOUBLE PRECISION NOT NULL,
    speed_kmh DOUBLE PRECISION,
    heading_deg DOUBLE PRECISION,
    client_timestamp TIMESTAMPTZ NOT NULL,
    received_at TIMESTAMPTZ NOT NULL,
    reputation_weight DOUBLE PRECISION NOT NULL,
    confidence DOUBLE PRECISION NOT NULL,
    is_validated BOOLEAN NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_reports_device_time ON location_reports (device_id, received_at);
CREATE INDEX IF NOT EXISTS idx_reports_vehicle_time ON location_reports (vehicle_id, received_at);

CREATE TABLE IF NOT EXISTS device_trust (
    device_id TEXT PRIMARY KEY,
    reputation_score DOUBLE PRECISION NOT NULL,
    trust_score DOUBLE PRECISION NOT NULL,
    total_contributions BIGINT NOT NULL,
    accurate_contributions BIGINT NOT NULL,
    clustering_affinity DOUBLE PRECISION NOT NULL,
    movement_consistency DOUBLE PRECISION NOT NULL,
    last_activity TIMESTAMPTZ NOT NULL,
    last_recalculated TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS tracking_sessions (
    session_id UUID PRIMARY KEY,
    device_id TEXT NOT NULL,
    vehicle_id TEXT NOT NULL,
    started_at TIMESTAMPTZ NOT NULL,
    last_activity TIMESTAMPTZ NOT NULL,
    ended_at TIMESTAMPTZ,
    is_active BOOLEAN NOT NULL,
    end_reason TEXT,
    trust_at_start DOUBLE PRECISION NOT NULL,
    locations_contributed BIGINT NOT NULL,
    valid_locations BIGINT NOT NULL,
    average_accuracy_m DOUBLE PRECISION NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_sessions_one_active
    ON tracking_sessions (device_id) WHERE is_active;

CREATE TABLE IF NOT EXISTS vehicle_positions (
    vehicle_id TEXT PRIMARY KEY,
    lat DOUBLE PRECISION,
    lon DOUBLE PRECISION,
    confidence DOUBLE PRECISION NOT NULL,
    active_trackers INT NOT NULL,
    trusted_trackers INT NOT NULL,
    status TEXT NOT NULL,
    source TEXT NOT NULL,
    last_updated TIMESTAMPTZ NOT NULL,
    last_known JSONB
);
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        info!("Postgres schema ready");
        Ok(())
    }
}

// ── Row mapping ───────────────────────────────────────────────────────────────

#[derive(FromRow)]
struct ReportRow {
    id: Uuid,
    device_id: String,
    vehicle_id: String,
    lat: f64,
    lon: f64,
    accuracy_m: f64,
    speed_kmh: Option<f64>,
    heading_deg: Option<f64>,
    client_timestamp: DateTime<Utc>,
    received_at: DateTime<Utc>,
    reputation_weight: f64,
    confidence: f64,
    is_validated: bool,
}

impl From<ReportRow> for LocationReport {
    fn from(r: ReportRow) -> Self {
        Self {
            id: r.id,
            device_id: r.device_id,
            vehicle_id: r.vehicle_id,
            lat: r.lat,
            lon: r.lon,
            accuracy_m: r.accuracy_m,
            speed_kmh: r.speed_kmh,
            heading_deg: r.heading_deg,
            client_timestamp: r.client_timestamp,
            received_at: r.received_at,
            reputation_weight: r.reputation_weight,
            confidence: r.confidence,
            is_validated: r.is_validated,
        }
    }
}

#[derive(FromRow)]
struct TrustRow {
    device_id: String,
    reputation_score: f64,
    trust_score: f64,
    total_contributions: i64,
    accurate_contributions: i64,
    clustering_affinity: f64,
    movement_consistency: f64,
    last_activity: DateTime<Utc>,
    last_recalculated: Option<DateTime<Utc>>,
}

impl From<TrustRow> for DeviceTrustRecord {
    fn from(r: TrustRow) -> Self {
        Self {
            device_id: r.device_id,
            reputation_score: r.reputation_score,
            trust_score: r.trust_score,
            total_contributions: r.total_contributions.max(0) as u64,
            accurate_contributions: r.accurate_contributions.max(0) as u64,
            clustering_affinity: r.clustering_affinity,
            movement_consistency: r.movement_consistency,
            last_activity: r.last_activity,
            last_recalculated: r.last_recalculated,
        }
        .clamped()
    }
}

#[derive(FromRow)]
struct SessionRow {
    session_id: Uuid,
    device_id: String,
    vehicle_id: String,
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    is_active: bool,
    end_reason: Option<String>,
    trust_at_start: f64,
    locations_contributed: i64,
    valid_locations: i64,
    average_accuracy_m: f64,
}

impl TryFrom<SessionRow> for TrackingSession {
    type Error = TrackingError;

    fn try_from(r: SessionRow) -> Result<Self> {
        let end_reason = match r.end_reason {
            Some(s) => Some(decode_enum::<SessionEndReason>(&s)?),
            None => None,
        };
        Ok(Self {
            session_id: r.session_id,
            device_id: r.device_id,
            vehicle_id: r.vehicle_id,
            started_at: r.started_at,
            last_activity: r.last_activity,
            ended_at: r.ended_at,
            is_active: r.is_active,
            end_reason,
            trust_at_start: r.trust_at_start,
            locations_contributed: r.locations_contributed.max(0) as u64,
            valid_locations: r.valid_locations.max(0) as u64,
            average_accuracy_m: r.average_accuracy_m,
        })
    }
}

#[derive(FromRow)]
struct PositionRow {
    vehicle_id: String,
    lat: Option<f64>,
    lon: Option<f64>,
    confidence: f64,
    active_trackers: i32,
    trusted_trackers: i32,
    status: String,
    source: String,
    last_updated: DateTime<Utc>,
    last_known: Option<serde_json::Value>,
}

impl TryFrom<PositionRow> for AggregatedPosition {
    type Error = TrackingError;

    fn try_from(r: PositionRow) -> Result<Self> {
        let last_known = match r.last_known {
            Some(v) => Some(serde_json::from_value::<LastKnownLocation>(v)?),
            None => None,
        };
        Ok(Self {
            vehicle_id: r.vehicle_id,
            lat: r.lat,
            lon: r.lon,
            confidence: r.confidence,
            active_trackers: r.active_trackers.max(0) as u32,
            trusted_trackers: r.trusted_trackers.max(0) as u32,
            status: decode_enum::<PositionStatus>(&r.status)?,
            source: decode_enum::<PositionSource>(&r.source)?,
            last_updated: r.last_updated,
            last_known,
        })
    }
}

/// Enums are stored as their snake_case serde names.
fn encode_enum<T: serde::Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(TrackingError::Store(format!("unexpected enum encoding {other}"))),
    }
}

fn decode_enum<T: serde::de::DeserializeOwned>(s: &str) -> Result<T> {
    Ok(serde_json::from_value(serde_json::Value::String(s.to_string()))?)
}

const REPORT_COLUMNS: &str = "id, device_id, vehicle_id, lat, lon, accuracy_m, speed_kmh, \
     heading_deg, client_timestamp, received_at, reputation_weight, confidence, is_validated";

const SESSION_COLUMNS: &str = "session_id, device_id, vehicle_id, started_at, last_activity, \
     ended_at, is_active, end_reason, trust_at_start, locations_contributed, valid_locations, \
     average_accuracy_m";

// ── Trait impls ───────────────────────────────────────────────────────────────

#[async_trait]
impl ReportStore for PgStore {
    async fn append(&self, r: &LocationReport) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO location_reports ({REPORT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(r.id)
        .bind(&r.device_id)
        .bind(&r.vehicle_id)
        .bind(r.lat)
        .bind(r.lon)
        .bind(r.accuracy_m)
        .bind(r.speed_kmh)
        .bind(r.heading_deg)
        .bind(r.client_timestamp)
        .bind(r.received_at)
        .bind(r.reputation_weight)
        .bind(r.confidence)
        .bind(r.is_validated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn last_accepted(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<LocationReport>> {
        let row: Option<ReportRow> = sqlx::query_as(&format!(
            "SELECT {REPORT_COLUMNS} FROM location_reports \
             WHERE device_id = $1 AND is_validated AND received_at >= $2 \
             ORDER BY received_at DESC LIMIT 1"
        ))
        .bind(device_id)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn device_history(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LocationReport>> {
        let rows: Vec<ReportRow> = sqlx::query_as(&format!(
            "SELECT {REPORT_COLUMNS} FROM location_reports \
             WHERE device_id = $1 AND is_validated AND received_at >= $2 \
             ORDER BY received_at DESC LIMIT $3"
        ))
        .bind(device_id)
        .bind(since)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        let mut out: Vec<LocationReport> = rows.into_iter().map(Into::into).collect();
        out.reverse();
        Ok(out)
    }

    async fn device_reports_since(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LocationReport>> {
        let rows: Vec<ReportRow> = sqlx::query_as(&format!(
            "SELECT {REPORT_COLUMNS} FROM location_reports \
             WHERE device_id = $1 AND received_at >= $2 ORDER BY received_at ASC"
        ))
        .bind(device_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn vehicle_reports_between(
        &self,
        vehicle_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        validated_only: bool,
    ) -> Result<Vec<LocationReport>> {
        let rows: Vec<ReportRow> = sqlx::query_as(&format!(
            "SELECT {REPORT_COLUMNS} FROM location_reports \
             WHERE vehicle_id = $1 AND received_at >= $2 AND received_at <= $3 \
             AND (is_validated OR NOT $4) ORDER BY received_at ASC"
        ))
        .bind(vehicle_id)
        .bind(from)
        .bind(to)
        .bind(validated_only)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn active_vehicles(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT vehicle_id FROM location_reports \
             WHERE received_at >= $1 ORDER BY vehicle_id",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }
}

#[async_trait]
impl TrustStore for PgStore {
    async fn get_trust(&self, device_id: &str) -> Result<Option<DeviceTrustRecord>> {
        let row: Option<TrustRow> = sqlx::query_as(
            "SELECT device_id, reputation_score, trust_score, total_contributions, \
             accurate_contributions, clustering_affinity, movement_consistency, \
             last_activity, last_recalculated FROM device_trust WHERE device_id = $1",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn put_trust(&self, record: &DeviceTrustRecord) -> Result<()> {
        let r = record.clone().clamped();
        sqlx::query(
            "INSERT INTO device_trust (device_id, reputation_score, trust_score, \
             total_contributions, accurate_contributions, clustering_affinity, \
             movement_consistency, last_activity, last_recalculated) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (device_id) DO UPDATE SET \
             reputation_score = EXCLUDED.reputation_score, \
             trust_score = EXCLUDED.trust_score, \
             total_contributions = EXCLUDED.total_contributions, \
             accurate_contributions = EXCLUDED.accurate_contributions, \
             clustering_affinity = EXCLUDED.clustering_affinity, \
             movement_consistency = EXCLUDED.movement_consistency, \
             last_activity = EXCLUDED.last_activity, \
             last_recalculated = EXCLUDED.last_recalculated",
        )
        .bind(&r.device_id)
        .bind(r.reputation_score)
        .bind(r.trust_score)
        .bind(r.total_contributions as i64)
        .bind(r.accurate_contributions as i64)
        .bind(r.clustering_affinity)
        .bind(r.movement_consistency)
        .bind(r.last_activity)
        .bind(r.last_recalculated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn start_session(
        &self,
        session: &TrackingSession,
    ) -> Result<Option<TrackingSession>> {
        let superseded = encode_enum(&SessionEndReason::Superseded)?;
        let mut tx = self.pool.begin().await?;

        let ended: Option<SessionRow> = sqlx::query_as(&format!(
            "UPDATE tracking_sessions SET is_active = FALSE, ended_at = $2, end_reason = $3 \
             WHERE device_id = $1 AND is_active RETURNING {SESSION_COLUMNS}"
        ))
        .bind(&session.device_id)
        .bind(session.started_at)
        .bind(&superseded)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "INSERT INTO tracking_sessions ({SESSION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(session.session_id)
        .bind(&session.device_id)
        .bind(&session.vehicle_id)
        .bind(session.started_at)
        .bind(session.last_activity)
        .bind(session.ended_at)
        .bind(session.is_active)
        .bind(session.end_reason.as_ref().map(encode_enum).transpose()?)
        .bind(session.trust_at_start)
        .bind(session.locations_contributed as i64)
        .bind(session.valid_locations as i64)
        .bind(session.average_accuracy_m)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        ended.map(TryInto::try_into).transpose()
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<TrackingSession>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM tracking_sessions WHERE session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn active_session_for_device(&self, device_id: &str) -> Result<Option<TrackingSession>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM tracking_sessions WHERE device_id = $1 AND is_active"
        ))
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn active_sessions_for_vehicle(&self, vehicle_id: &str) -> Result<Vec<TrackingSession>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM tracking_sessions WHERE vehicle_id = $1 AND is_active"
        ))
        .bind(vehicle_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn end_session(
        &self,
        session_id: Uuid,
        reason: SessionEndReason,
        at: DateTime<Utc>,
    ) -> Result<Option<TrackingSession>> {
        sqlx::query(
            "UPDATE tracking_sessions SET is_active = FALSE, ended_at = $2, end_reason = $3 \
             WHERE session_id = $1 AND is_active",
        )
        .bind(session_id)
        .bind(at)
        .bind(encode_enum(&reason)?)
        .execute(&self.pool)
        .await?;
        self.get_session(session_id).await
    }

    async fn record_contribution(
        &self,
        session_id: Uuid,
        valid: bool,
        accuracy_m: f64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE tracking_sessions SET \
             average_accuracy_m = (average_accuracy_m * locations_contributed + $2) \
                 / (locations_contributed + 1), \
             locations_contributed = locations_contributed + 1, \
             valid_locations = valid_locations + CASE WHEN $3 THEN 1 ELSE 0 END, \
             last_activity = GREATEST(last_activity, $4) \
             WHERE session_id = $1 AND is_active",
        )
        .bind(session_id)
        .bind(accuracy_m)
        .bind(valid)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stale_sessions(&self, before: DateTime<Utc>) -> Result<Vec<TrackingSession>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM tracking_sessions \
             WHERE is_active AND last_activity < $1"
        ))
        .bind(before)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[async_trait]
impl PositionStore for PgStore {
    async fn get_position(&self, vehicle_id: &str) -> Result<Option<AggregatedPosition>> {
        let row: Option<PositionRow> = sqlx::query_as(
            "SELECT vehicle_id, lat, lon, confidence, active_trackers, trusted_trackers, \
             status, source, last_updated, last_known FROM vehicle_positions \
             WHERE vehicle_id = $1",
        )
        .bind(vehicle_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn put_position(&self, p: &AggregatedPosition) -> Result<()> {
        let last_known = p.last_known.as_ref().map(serde_json::to_value).transpose()?;
        sqlx::query(
            "INSERT INTO vehicle_positions (vehicle_id, lat, lon, confidence, active_trackers, \
             trusted_trackers, status, source, last_updated, last_known) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (vehicle_id) DO UPDATE SET \
             lat = EXCLUDED.lat, lon = EXCLUDED.lon, confidence = EXCLUDED.confidence, \
             active_trackers = EXCLUDED.active_trackers, \
             trusted_trackers = EXCLUDED.trusted_trackers, \
             status = EXCLUDED.status, source = EXCLUDED.source, \
             last_updated = EXCLUDED.last_updated, last_known = EXCLUDED.last_known",
        )
        .bind(&p.vehicle_id)
        .bind(p.lat)
        .bind(p.lon)
        .bind(p.confidence)
        .bind(p.active_trackers as i32)
        .bind(p.trusted_trackers as i32)
        .bind(encode_enum(&p.status)?)
        .bind(encode_enum(&p.source)?)
        .bind(p.last_updated)
        .bind(last_known)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_text_encoding() {
        assert_eq!(encode_enum(&PositionStatus::NoTracking).unwrap(), "no_tracking");
        assert_eq!(encode_enum(&SessionEndReason::InactivityTimeout).unwrap(), "inactivity_timeout");
        let s: PositionSource = decode_enum("trusted_cluster").unwrap();
        assert_eq!(s, PositionSource::TrustedCluster);
        assert!(decode_enum::<PositionStatus>("bogus").is_err());
    }
}

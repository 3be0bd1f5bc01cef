//! # error
//!
//! Error type shared by the engine and its collaborator adapters.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Machine-readable reason for a hard reject. The report is discarded and the
/// client gets the code plus a human recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    OutsideServiceArea,
    InvalidCoordinates,
    TimestampOutOfTolerance,
    TimestampInFuture,
    ImplausibleTimestamp,
    VehicleNotScheduled,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::OutsideServiceArea => "outside_service_area",
            Self::InvalidCoordinates => "invalid_coordinates",
            Self::TimestampOutOfTolerance => "timestamp_out_of_tolerance",
            Self::TimestampInFuture => "timestamp_in_future",
            Self::ImplausibleTimestamp => "implausible_timestamp",
            Self::VehicleNotScheduled => "vehicle_not_scheduled",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("report rejected ({reason}): {recommendation}")]
    Rejected {
        reason: RejectReason,
        recommendation: String,
    },

    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for TrackingError {
    fn from(e: sqlx::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<redis::RedisError> for TrackingError {
    fn from(e: redis::RedisError) -> Self {
        Self::Cache(e.to_string())
    }
}

impl TrackingError {
    /// Transient infrastructure failures: skip this vehicle/device for the
    /// current cycle, never fail other vehicles.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Cache(_))
    }
}

pub type Result<T> = std::result::Result<T, TrackingError>;

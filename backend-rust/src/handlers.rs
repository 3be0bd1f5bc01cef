use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use crowdtrack_types::{PositionBroadcast, ReportSubmission};
use serde::Deserialize;
use serde_json::{json, Value};
use socketioxide::extract::{Data, SocketRef};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broadcast::{vehicle_room, POSITION_EVENT};
use crate::engine::TrackingEngine;
use crate::error::TrackingError;
use crate::identity::hash_device_id;

// ─── Shared State ─────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub engine: TrackingEngine,
    /// Salt for hashing raw device identifiers before they reach the engine
    pub device_salt: Arc<str>,
}

impl AppState {
    pub fn new(engine: TrackingEngine, device_salt: impl Into<Arc<str>>) -> Self {
        Self {
            engine,
            device_salt: device_salt.into(),
        }
    }

    fn device_id(&self, raw: &str) -> String {
        hash_device_id(&self.device_salt, raw)
    }
}

// ─── Errors ───────────────────────────────────────────────────────────────────

pub struct ApiError(TrackingError);

impl From<TrackingError> for ApiError {
    fn from(e: TrackingError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            TrackingError::Rejected {
                reason,
                recommendation,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({
                    "error": "rejected",
                    "reason": reason.code(),
                    "recommendation": recommendation,
                }),
            ),
            TrackingError::SessionNotFound(id) => (
                StatusCode::NOT_FOUND,
                json!({ "error": "session_not_found", "sessionId": id }),
            ),
            TrackingError::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "invalid_input", "message": msg }),
            ),
            e if e.is_transient() => {
                warn!("request failed on backing service: {e}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({
                        "error": "unavailable",
                        "recommendation": "Service is busy; try again in a few seconds",
                    }),
                )
            }
            e => {
                error!("request failed: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ─── Requests ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub device_id: String,
    pub vehicle_id: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(alias = "accuracy")]
    pub accuracy_m: f64,
    #[serde(default, alias = "speed")]
    pub speed_kmh: Option<f64>,
    #[serde(default, alias = "heading")]
    pub heading_deg: Option<f64>,
    #[serde(alias = "timestamp")]
    pub client_timestamp: DateTime<Utc>,
}

impl ReportRequest {
    fn into_submission(self, device_id: String, received_at: DateTime<Utc>) -> ReportSubmission {
        ReportSubmission {
            device_id,
            vehicle_id: self.vehicle_id,
            lat: self.lat,
            lon: self.lon,
            accuracy_m: self.accuracy_m,
            speed_kmh: self.speed_kmh,
            heading_deg: self.heading_deg,
            client_timestamp: self.client_timestamp,
            received_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub device_id: String,
    pub vehicle_id: String,
}

// ─── HTTP Handlers ────────────────────────────────────────────────────────────

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn submit_report(
    State(app): State<AppState>,
    Json(req): Json<ReportRequest>,
) -> ApiResult<Response> {
    let device_id = app.device_id(&req.device_id);
    let sub = req.into_submission(device_id, Utc::now());
    let receipt = app.engine.submit_report(&sub).await?;
    let status = if receipt.validation.valid {
        StatusCode::CREATED
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(receipt)).into_response())
}

pub async fn vehicle_position(
    State(app): State<AppState>,
    Path(vehicle_id): Path<String>,
) -> ApiResult<Response> {
    let position = app.engine.current_position(&vehicle_id).await?;
    Ok(Json(position).into_response())
}

pub async fn start_session(
    State(app): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> ApiResult<Response> {
    let device_id = app.device_id(&req.device_id);
    let session = app.engine.start_session(&device_id, &req.vehicle_id).await?;
    Ok((StatusCode::CREATED, Json(session)).into_response())
}

pub async fn get_session(
    State(app): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Response> {
    match app.engine.sessions().get(session_id).await? {
        Some(s) => Ok(Json(s).into_response()),
        None => Err(TrackingError::SessionNotFound(session_id).into()),
    }
}

pub async fn end_session(
    State(app): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Response> {
    let session = app.engine.end_session(session_id).await?;
    Ok(Json(session).into_response())
}

// ─── Socket.IO ────────────────────────────────────────────────────────────────

fn vehicle_id_of(data: &Value) -> Option<String> {
    data["vehicleId"]
        .as_str()
        .or_else(|| data.as_str())
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
}

pub async fn on_connect(socket: SocketRef, engine: TrackingEngine) {
    let socket_id = socket.id.to_string();
    info!("Client connected: {socket_id}");

    socket.on_disconnect({
        let sid = socket_id.clone();
        move |_: SocketRef| async move {
            info!("Client disconnected: {sid}");
        }
    });

    // ── subscribe ─────────────────────────────────────────────────────────────
    {
        let engine = engine.clone();
        socket.on("subscribe", move |s: SocketRef, Data::<Value>(data)| {
            let engine = engine.clone();
            async move {
                let Some(vehicle_id) = vehicle_id_of(&data) else {
                    warn!("Client {}: subscribe without vehicleId", s.id);
                    return;
                };
                let _ = s.join(vehicle_room(&vehicle_id));
                info!("Client {}: subscribed to {vehicle_id}", s.id);

                // Late joiners get the current position right away.
                match engine.current_position(&vehicle_id).await {
                    Ok(pos) => {
                        let _ = s.emit(POSITION_EVENT, &PositionBroadcast::from(&pos));
                    }
                    Err(e) => warn!(vehicle = %vehicle_id, "initial position unavailable: {e}"),
                }
            }
        });
    }

    // ── unsubscribe ───────────────────────────────────────────────────────────
    socket.on("unsubscribe", move |s: SocketRef, Data::<Value>(data)| async move {
        if let Some(vehicle_id) = vehicle_id_of(&data) {
            let _ = s.leave(vehicle_room(&vehicle_id));
            info!("Client {}: unsubscribed from {vehicle_id}", s.id);
        }
    });
}

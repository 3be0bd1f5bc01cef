//! http_tx.rs: Sends simulated reports and sessions to the backend
//!
//! Errors are logged, never fatal: the simulator keeps driving the bus
//! while the backend restarts.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::scenarios::Fix;

/// Request body for `POST /reports`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportBody<'a> {
    device_id: &'a str,
    vehicle_id: &'a str,
    lat: f64,
    lon: f64,
    accuracy_m: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed_kmh: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    heading_deg: Option<f64>,
    client_timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionBody<'a> {
    device_id: &'a str,
    vehicle_id: &'a str,
}

/// What the backend did with one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    Accepted,
    SoftRejected,
    Rejected,
    Failed,
}

impl Delivery {
    fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::CREATED => Delivery::Accepted,
            StatusCode::ACCEPTED => Delivery::SoftRejected,
            StatusCode::UNPROCESSABLE_ENTITY => Delivery::Rejected,
            _ => Delivery::Failed,
        }
    }
}

pub struct BackendClient {
    http: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(5)).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn start_session(&self, device_id: &str, vehicle_id: &str) -> bool {
        let url = format!("{}/sessions", self.base_url);
        let body = SessionBody {
            device_id,
            vehicle_id,
        };
        match self.http.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!("HTTP: session for {device_id} refused ({})", resp.status());
                false
            }
            Err(e) => {
                warn!("HTTP: session for {device_id} failed: {e}");
                false
            }
        }
    }

    pub async fn send_report(&self, device_id: &str, vehicle_id: &str, fix: &Fix) -> Delivery {
        let url = format!("{}/reports", self.base_url);
        let body = ReportBody {
            device_id,
            vehicle_id,
            lat: fix.point.lat,
            lon: fix.point.lon,
            accuracy_m: fix.accuracy_m,
            speed_kmh: fix.speed_kmh,
            heading_deg: fix.heading_deg,
            client_timestamp: fix.client_timestamp,
        };

        let resp = match self.http.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("HTTP: report from {device_id} failed: {e}");
                return Delivery::Failed;
            }
        };

        let delivery = Delivery::from_status(resp.status());
        if delivery == Delivery::Rejected {
            let reason = resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v["reason"].as_str().map(str::to_string))
                .unwrap_or_default();
            debug!("HTTP: {device_id} rejected ({reason})");
        } else {
            debug!(
                "HTTP → {url} {device_id} {:.5},{:.5} {delivery:?}",
                fix.point.lat, fix.point.lon
            );
        }
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_body_matches_backend_shape() {
        let body = ReportBody {
            device_id: "sim-rider-1",
            vehicle_id: "bus-1",
            lat: 9.0,
            lon: 38.75,
            accuracy_m: 8.0,
            speed_kmh: None,
            heading_deg: Some(90.0),
            client_timestamp: DateTime::parse_from_rfc3339("2025-03-04T08:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["deviceId"], "sim-rider-1");
        assert_eq!(v["accuracyM"], 8.0);
        assert_eq!(v["headingDeg"], 90.0);
        assert!(v.get("speedKmh").is_none());
        assert_eq!(v["clientTimestamp"], "2025-03-04T08:00:00Z");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(Delivery::from_status(StatusCode::CREATED), Delivery::Accepted);
        assert_eq!(Delivery::from_status(StatusCode::ACCEPTED), Delivery::SoftRejected);
        assert_eq!(Delivery::from_status(StatusCode::UNPROCESSABLE_ENTITY), Delivery::Rejected);
        assert_eq!(Delivery::from_status(StatusCode::SERVICE_UNAVAILABLE), Delivery::Failed);
    }
}

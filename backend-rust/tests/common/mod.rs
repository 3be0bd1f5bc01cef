//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use crowdtrack::broadcast::ChannelSink;
use crowdtrack::cache::MemoryCache;
use crowdtrack::schedule::{ScheduleGate, StaticSchedule};
use crowdtrack::store::{MemoryStore, TrustStore};
use crowdtrack::{Collaborators, EngineConfig, TrackingEngine};
use crowdtrack_types::{DeviceTrustRecord, GeoPoint, ReportSubmission, RouteStop};

pub const BUS: &str = "bus-1";
pub const ROUTE_LON: f64 = 38.75;

/// 2025-03-04 08:00:00 UTC
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 4, 8, 0, 0).unwrap()
}

pub fn secs(s: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(s)
}

/// A(1) B(2) C(3) heading north, ~1.1 km apart.
pub fn line_stops() -> Vec<RouteStop> {
    [("A", 9.00), ("B", 9.01), ("C", 9.02)]
        .iter()
        .enumerate()
        .map(|(i, (id, lat))| RouteStop {
            stop_id: id.to_string(),
            name: format!("Stop {id}"),
            order: i as u32 + 1,
            position: GeoPoint::new(*lat, ROUTE_LON),
            radius_m: 50.0,
        })
        .collect()
}

pub fn sub(device: &str, lat: f64, lon: f64, accuracy_m: f64, at: DateTime<Utc>) -> ReportSubmission {
    ReportSubmission {
        device_id: device.into(),
        vehicle_id: BUS.into(),
        lat,
        lon,
        accuracy_m,
        speed_kmh: None,
        heading_deg: None,
        client_timestamp: at,
        received_at: at,
    }
}

pub struct Harness {
    pub engine: TrackingEngine,
    pub store: MemoryStore,
    pub cache: MemoryCache,
    pub sink: ChannelSink,
}

/// Trust recalculation runs inline so every assertion sees its result.
pub fn test_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.trust.background_recalculation = false;
    cfg
}

pub fn harness_with(schedule: Arc<dyn ScheduleGate>) -> Harness {
    let store = MemoryStore::new();
    let cache = MemoryCache::new();
    let sink = ChannelSink::new(64);
    let engine = TrackingEngine::new(
        test_config(),
        Collaborators::in_memory(
            store.clone(),
            Arc::new(cache.clone()),
            schedule,
            Arc::new(sink.clone()),
        ),
    );
    Harness {
        engine,
        store,
        cache,
        sink,
    }
}

/// `bus-1` in service all day on the A-B-C line; other vehicles admitted
/// without route data.
pub fn harness() -> Harness {
    harness_with(Arc::new(StaticSchedule::open().with_vehicle(BUS, line_stops())))
}

impl Harness {
    /// Seeds a device's stored trust before anything has read it.
    pub async fn seed_trust(&self, device: &str, trust: f64) {
        let mut rec = DeviceTrustRecord::new(device, t0());
        rec.trust_score = trust;
        self.store.put_trust(&rec).await.unwrap();
    }

    pub async fn trust_of(&self, device: &str) -> f64 {
        self.store
            .get_trust(device)
            .await
            .unwrap()
            .map(|r| r.trust_score)
            .unwrap_or(crowdtrack_types::DEFAULT_TRUST)
    }
}

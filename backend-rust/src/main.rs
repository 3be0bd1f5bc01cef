use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use socketioxide::SocketIo;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crowdtrack::broadcast::SocketIoSink;
use crowdtrack::cache::{Cache, MemoryCache, RedisCache};
use crowdtrack::handlers::{self, on_connect, AppState};
use crowdtrack::schedule::{ScheduleGate, StaticSchedule};
use crowdtrack::store::{MemoryStore, PgStore};
use crowdtrack::{Collaborators, EngineConfig, TrackingEngine};

// ─── Time Sync Endpoint ───────────────────────────────────────────────────────

async fn time_sync() -> axum::Json<serde_json::Value> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    axum::Json(json!({ "serverTime": now }))
}

// ─── Background Loops ─────────────────────────────────────────────────────────

async fn run_aggregation_loop(engine: TrackingEngine) {
    let secs = engine.config().aggregation.cycle_secs.max(1);
    let mut interval = tokio::time::interval(Duration::from_secs(secs));
    loop {
        interval.tick().await;
        if let Err(e) = engine.run_all_cycles().await {
            warn!("Aggregation cycle skipped: {e}");
        }
    }
}

async fn run_session_reaper(engine: TrackingEngine) {
    let secs = engine.config().session.reaper_interval_secs.max(1);
    let mut interval = tokio::time::interval(Duration::from_secs(secs));
    loop {
        interval.tick().await;
        if let Err(e) = engine.reap_sessions().await {
            warn!("Session reaper skipped: {e}");
        }
    }
}

// ─── Collaborators ────────────────────────────────────────────────────────────

async fn build_collaborators(io: SocketIo) -> anyhow::Result<Collaborators> {
    let cache: Arc<dyn Cache> = match std::env::var("REDIS_URL") {
        Ok(url) => {
            let c = RedisCache::connect(&url)
                .await
                .context("connecting to Redis")?;
            info!("🧊 Cache: Redis");
            Arc::new(c)
        }
        Err(_) => {
            info!("🧊 Cache: in-process (set REDIS_URL for Redis)");
            Arc::new(MemoryCache::new())
        }
    };

    let schedule: Arc<dyn ScheduleGate> = match std::env::var("CROWDTRACK_SCHEDULE") {
        Ok(path) => Arc::new(StaticSchedule::load(&path).context("loading schedule")?),
        Err(_) => {
            warn!("No CROWDTRACK_SCHEDULE set, every vehicle is treated as in service");
            Arc::new(StaticSchedule::open())
        }
    };

    let sink = Arc::new(SocketIoSink::new(io));

    match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let pool_size = std::env::var("DATABASE_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10);
            let pg = PgStore::connect(&url, pool_size)
                .await
                .context("connecting to PostgreSQL")?;
            info!("🗄️ Store: PostgreSQL");
            Ok(Collaborators {
                reports: Arc::new(pg.clone()),
                trust: Arc::new(pg.clone()),
                sessions: Arc::new(pg.clone()),
                positions: Arc::new(pg),
                cache,
                schedule,
                sink,
            })
        }
        Err(_) => {
            warn!("🗄️ Store: in-memory, nothing survives a restart (set DATABASE_URL)");
            Ok(Collaborators::in_memory(MemoryStore::new(), cache, schedule, sink))
        }
    }
}

// ─── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "crowdtrack=info,crowdtrack_backend=info,socketioxide=warn".into()
            }),
        )
        .init();

    info!("🚌 CrowdTrack Backend starting...");

    // Config
    let config_path =
        std::env::var("CROWDTRACK_CONFIG").unwrap_or_else(|_| "crowdtrack.toml".to_string());
    let mut cfg = EngineConfig::load(&config_path)?;
    cfg.apply_env();
    cfg.validate()?;

    let device_salt = std::env::var("DEVICE_ID_SALT").unwrap_or_else(|_| {
        warn!("DEVICE_ID_SALT not set, device ids are hashed with an empty salt");
        String::new()
    });

    // Build Socket.IO layer
    let (socket_layer, io) = SocketIo::builder().build_layer();

    let collaborators = build_collaborators(io.clone()).await?;
    let engine = TrackingEngine::new(cfg, collaborators);

    let engine_sock = engine.clone();
    io.ns("/", move |socket: socketioxide::extract::SocketRef| {
        let engine = engine_sock.clone();
        async move {
            on_connect(socket, engine).await;
        }
    });

    // Background loops
    tokio::spawn(run_aggregation_loop(engine.clone()));
    tokio::spawn(run_session_reaper(engine.clone()));

    // CORS: riders and dashboards connect from anywhere
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/sync", get(time_sync))
        .route("/health", get(handlers::health))
        .route("/reports", post(handlers::submit_report))
        .route("/vehicles/:vehicle_id/position", get(handlers::vehicle_position))
        .route("/sessions", post(handlers::start_session))
        .route(
            "/sessions/:session_id",
            get(handlers::get_session).delete(handlers::end_session),
        )
        .with_state(AppState::new(engine, device_salt))
        .layer(socket_layer)
        .layer(cors);

    let port = std::env::var("PORT").unwrap_or_else(|_| "3001".to_string());
    let addr = format!("0.0.0.0:{port}");
    info!("🚀 Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

//! main.rs: Rider simulator entry point
//!
//! Drives one bus along its stops and has a handful of rider phones post
//! GPS reports for it to the CrowdTrack backend, optionally alongside a
//! scenario preset's misbehaving phones.

mod bus_sim;
mod http_tx;
mod scenarios;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use rand::Rng;
use serde::Deserialize;
use tokio::time::interval;
use tracing::{info, warn};

use bus_sim::{BusConfig, BusSim};
use http_tx::{BackendClient, Delivery};
use scenarios::{Phone, PhoneBehaviour};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rider-sim", about = "CrowdTrack synthetic rider simulator")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Backend base URL
    #[arg(long, default_value = "http://127.0.0.1:3001")]
    backend: String,
    /// Scenario preset (honest, static_spoofer, teleporter, clock_skew,
    /// poor_accuracy, off_route_cluster)
    #[arg(long, default_value = "honest")]
    scenario: String,
    /// Override the number of honest riders
    #[arg(long)]
    riders: Option<usize>,
}

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FullConfig {
    bus: BusConfig,
    riders: RidersConfig,
    simulation: SimulationConfig,
}

#[derive(Debug, Deserialize)]
struct RidersConfig {
    count: usize,
    noise_m: f64,
    accuracy_m: f64,
    report_interval_s: f64,
}

#[derive(Debug, Deserialize)]
struct SimulationConfig {
    tick_hz: f64,
    log_every_ticks: u64,
}

fn load_config(path: &str) -> anyhow::Result<FullConfig> {
    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => {
            info!("No {path}, using the embedded default config");
            include_str!("../config.toml").to_string()
        }
    };
    toml::from_str(&raw).with_context(|| format!("parsing {path}"))
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rider_sim=info".into()),
        )
        .init();

    let args = Args::parse();
    let cfg = load_config(&args.config)?;
    anyhow::ensure!(cfg.bus.stops.len() >= 2, "bus needs at least two stops");
    anyhow::ensure!(cfg.simulation.tick_hz > 0.0, "tick_hz must be positive");

    let mut bus = BusSim::new(&cfg.bus);
    let n_riders = args.riders.unwrap_or(cfg.riders.count);

    let mut phones: Vec<Phone> = (1..=n_riders)
        .map(|i| Phone::new(format!("sim-rider-{i}"), PhoneBehaviour::Honest))
        .collect();
    let adversaries = scenarios::preset(&args.scenario, bus.position).with_context(|| {
        format!(
            "unknown scenario '{}', expected one of {:?}",
            args.scenario,
            scenarios::PRESETS
        )
    })?;
    phones.extend(adversaries);

    info!(
        "🚌 Rider simulator starting: {} on {} stops, {} phones, scenario '{}'",
        cfg.bus.vehicle_id,
        cfg.bus.stops.len(),
        phones.len(),
        args.scenario
    );

    let route: Vec<&str> = cfg.bus.stops.iter().map(|s| s.name.as_str()).collect();
    info!("🗺 Route: {}", route.join(" → "));

    let client = BackendClient::new(&args.backend)?;
    for phone in &phones {
        client.start_session(&phone.device_id, &cfg.bus.vehicle_id).await;
    }

    run(&cfg, &mut bus, &mut phones, &client).await;
    Ok(())
}

// ── Simulation loop ───────────────────────────────────────────────────────────

async fn run(cfg: &FullConfig, bus: &mut BusSim, phones: &mut [Phone], client: &BackendClient) {
    let dt = 1.0 / cfg.simulation.tick_hz;
    let mut ticker = interval(Duration::from_secs_f64(dt));
    let mut rng = rand::thread_rng();
    let mut tick: u64 = 0;
    let mut tally: HashMap<Delivery, u64> = HashMap::new();

    // Stagger first reports so phones don't fire in lockstep.
    let period = cfg.riders.report_interval_s.max(dt);
    let mut due_in: Vec<f64> = phones.iter().map(|_| rng.gen_range(0.0..period)).collect();

    info!("⏱ Sim loop running at {} Hz", cfg.simulation.tick_hz);

    loop {
        ticker.tick().await;
        tick += 1;
        bus.tick(dt);

        for (phone, due) in phones.iter_mut().zip(due_in.iter_mut()) {
            *due -= dt;
            if *due > 0.0 {
                continue;
            }
            *due += period;

            let fix = phone.fix(
                bus,
                cfg.riders.noise_m,
                cfg.riders.accuracy_m,
                Utc::now(),
                &mut rng,
            );
            let delivery = client
                .send_report(&phone.device_id, &cfg.bus.vehicle_id, &fix)
                .await;
            *tally.entry(delivery).or_default() += 1;
        }

        if cfg.simulation.log_every_ticks > 0 && tick % cfg.simulation.log_every_ticks == 0 {
            info!(
                "🛰 {:.5},{:.5} {:.0} km/h | accepted={} soft={} rejected={} failed={}",
                bus.position.lat,
                bus.position.lon,
                bus.speed_kmh,
                tally.get(&Delivery::Accepted).copied().unwrap_or(0),
                tally.get(&Delivery::SoftRejected).copied().unwrap_or(0),
                tally.get(&Delivery::Rejected).copied().unwrap_or(0),
                tally.get(&Delivery::Failed).copied().unwrap_or(0),
            );
            let delivered: u64 = tally
                .iter()
                .filter(|(d, _)| **d != Delivery::Failed)
                .map(|(_, n)| n)
                .sum();
            if delivered == 0 {
                warn!("No report has reached the backend yet");
            }
        }
    }
}

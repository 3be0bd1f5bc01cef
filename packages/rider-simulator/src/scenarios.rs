//! scenarios.rs: Rider phone behaviours, honest and adversarial
//!
//! Each preset adds one or more misbehaving phones to the honest riders so
//! the backend's validation, trust and clustering can be watched reacting.

use chrono::{DateTime, Duration, Utc};
use crowdtrack_types::GeoPoint;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::bus_sim::{offset, BusSim};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhoneBehaviour {
    /// On the bus, reporting its GPS fix with normal noise
    Honest,
    /// Claims to be on the bus while sitting at a fixed point
    StaticSpoofer { lat: f64, lon: f64 },
    /// Every few reports jumps this far away from the bus
    Teleporter { jump_m: f64, every: u32 },
    /// Client clock off by this many seconds
    ClockSkew { offset_s: i64 },
    /// On the bus but with a terrible fix
    PoorAccuracy { accuracy_m: f64 },
    /// Tracks the bus from a parallel street this far east
    OffRoute { east_m: f64 },
}

/// One synthetic fix ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Fix {
    pub point: GeoPoint,
    pub accuracy_m: f64,
    pub speed_kmh: Option<f64>,
    pub heading_deg: Option<f64>,
    pub client_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Phone {
    pub device_id: String,
    pub behaviour: PhoneBehaviour,
    reports_sent: u32,
}

impl Phone {
    pub fn new(device_id: impl Into<String>, behaviour: PhoneBehaviour) -> Self {
        Self {
            device_id: device_id.into(),
            behaviour,
            reports_sent: 0,
        }
    }

    /// Produces this phone's next fix for the current bus state.
    pub fn fix<R: Rng>(
        &mut self,
        bus: &BusSim,
        noise_m: f64,
        accuracy_m: f64,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Fix {
        self.reports_sent += 1;
        let (dn, de) = (gaussian(rng, noise_m), gaussian(rng, noise_m));
        let on_bus = offset(bus.position, dn, de);

        let mut fix = Fix {
            point: on_bus,
            accuracy_m,
            speed_kmh: Some(bus.speed_kmh),
            heading_deg: (bus.speed_kmh > 0.0).then_some(bus.heading_deg),
            client_timestamp: now,
        };

        match &self.behaviour {
            PhoneBehaviour::Honest => {}
            PhoneBehaviour::StaticSpoofer { lat, lon } => {
                fix.point = offset(GeoPoint::new(*lat, *lon), dn * 0.1, de * 0.1);
                fix.speed_kmh = Some(0.0);
                fix.heading_deg = None;
            }
            PhoneBehaviour::Teleporter { jump_m, every } => {
                if *every > 0 && self.reports_sent % every == 0 {
                    let angle = rng.gen_range(0.0..std::f64::consts::TAU);
                    fix.point = offset(on_bus, jump_m * angle.cos(), jump_m * angle.sin());
                }
            }
            PhoneBehaviour::ClockSkew { offset_s } => {
                fix.client_timestamp = now + Duration::seconds(*offset_s);
            }
            PhoneBehaviour::PoorAccuracy { accuracy_m } => {
                fix.accuracy_m = *accuracy_m;
                let sigma = accuracy_m / 2.0;
                fix.point = offset(bus.position, gaussian(rng, sigma), gaussian(rng, sigma));
            }
            PhoneBehaviour::OffRoute { east_m } => {
                fix.point = offset(on_bus, 0.0, *east_m);
            }
        }
        fix
    }
}

/// Zero-mean normal draw with standard deviation `sigma` meters.
fn gaussian<R: Rng>(rng: &mut R, sigma: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    z * sigma.abs()
}

// ── Presets ───────────────────────────────────────────────────────────────────

/// Adversarial phones added on top of the honest riders for a named preset.
/// `None` for an unknown name.
pub fn preset(name: &str, first_stop: GeoPoint) -> Option<Vec<Phone>> {
    let phones = match name {
        "honest" => vec![],
        "static_spoofer" => vec![Phone::new(
            "sim-spoofer",
            PhoneBehaviour::StaticSpoofer {
                lat: first_stop.lat,
                lon: first_stop.lon,
            },
        )],
        "teleporter" => vec![Phone::new(
            "sim-teleporter",
            PhoneBehaviour::Teleporter {
                jump_m: 3_000.0,
                every: 3,
            },
        )],
        "clock_skew" => vec![Phone::new(
            "sim-skewed",
            PhoneBehaviour::ClockSkew { offset_s: 600 },
        )],
        "poor_accuracy" => vec![Phone::new(
            "sim-sloppy",
            PhoneBehaviour::PoorAccuracy { accuracy_m: 150.0 },
        )],
        // Several colluding phones, enough to form their own cluster.
        "off_route_cluster" => (1..=3)
            .map(|i| {
                Phone::new(
                    format!("sim-offroute-{i}"),
                    PhoneBehaviour::OffRoute { east_m: 400.0 },
                )
            })
            .collect(),
        _ => return None,
    };
    Some(phones)
}

pub const PRESETS: &[&str] = &[
    "honest",
    "static_spoofer",
    "teleporter",
    "clock_skew",
    "poor_accuracy",
    "off_route_cluster",
];

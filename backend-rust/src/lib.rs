//! # crowdtrack
//!
//! Crowdsourced bus positioning: rider phones report GPS fixes for the bus
//! they are on, and the engine turns that noisy, possibly adversarial stream
//! into one confidence-scored position per vehicle.
//!
//! Pure components:
//! - [`validator`] scores each report (with [`route_gate`] and [`movement`])
//! - [`trust`] keeps a slowly-moving reliability score per device
//! - [`clustering`] groups concurrent reports per vehicle
//! - [`aggregator`] turns the main cluster into a position, with fallbacks
//!
//! [`engine::TrackingEngine`] wires them to the collaborator seams in
//! [`store`], [`cache`], [`schedule`] and [`broadcast`].

pub mod aggregator;
pub mod broadcast;
pub mod cache;
pub mod clustering;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod handlers;
pub mod identity;
pub mod locks;
pub mod movement;
pub mod route_gate;
pub mod schedule;
pub mod sessions;
pub mod store;
pub mod trust;
pub mod validator;

pub use config::EngineConfig;
pub use engine::{Collaborators, CycleOutcome, ReportReceipt, TrackingEngine};
pub use error::{RejectReason, Result, TrackingError};

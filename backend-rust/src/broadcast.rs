//! # broadcast
//!
//! Fire-and-forget publication of per-vehicle positions to real-time
//! subscribers. Sinks log their own failures; nothing here is ever surfaced
//! as an ingestion or aggregation error.

use async_trait::async_trait;
use crowdtrack_types::PositionBroadcast;
use socketioxide::SocketIo;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub const POSITION_EVENT: &str = "vehicle-position";

pub fn vehicle_room(vehicle_id: &str) -> String {
    format!("vehicle:{vehicle_id}")
}

#[async_trait]
pub trait BroadcastSink: Send + Sync {
    async fn publish(&self, update: &PositionBroadcast);
}

/// Emits to the vehicle's room only. Clients join it with `subscribe`.
#[derive(Clone)]
pub struct SocketIoSink {
    io: SocketIo,
}

impl SocketIoSink {
    pub fn new(io: SocketIo) -> Self {
        Self { io }
    }
}

#[async_trait]
impl BroadcastSink for SocketIoSink {
    async fn publish(&self, update: &PositionBroadcast) {
        let room = vehicle_room(&update.vehicle_id);
        if let Err(e) = self.io.to(room).emit(POSITION_EVENT, update) {
            warn!(vehicle = %update.vehicle_id, "room broadcast failed: {e}");
        }
    }
}

/// In-process fan-out over a tokio broadcast channel.
#[derive(Clone)]
pub struct ChannelSink {
    tx: broadcast::Sender<PositionBroadcast>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PositionBroadcast> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl BroadcastSink for ChannelSink {
    async fn publish(&self, update: &PositionBroadcast) {
        // No receivers is not an error.
        if self.tx.send(update.clone()).is_err() {
            debug!(vehicle = %update.vehicle_id, "no position subscribers");
        }
    }
}

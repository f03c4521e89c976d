//! Core module - event bus, ring buffer, and the composition root

mod engine;
mod event_bus;
mod ring;

pub use engine::Engine;
pub use event_bus::{Event, EventBus, EventKind, Handler, SubscriptionId};
pub use ring::RingBuffer;

use serde::{Deserialize, Serialize};

/// System-wide state snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineState {
    pub running: bool,
    pub nodes_total: usize,
    pub nodes_online: usize,
    pub active_incidents: usize,
    pub active_leaks: usize,
    pub missions_total: usize,
    pub telemetry_samples: usize,
    pub anomalies_detected: usize,
    pub events_published: u64,
}

// Copyright (c) 2026 flowsentry
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/flowsentry/flowsentry

//! Event bus for inter-component communication

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::incidents::{Alert, AlertSeverity};
use crate::registry::{NodeHealth, NodeType};
use crate::telemetry::{AnomalyKind, TelemetrySample};

/// Every event type flowing through the system.
///
/// A closed sum type: subscribers match exhaustively, and adding a variant
/// is a compile-time signal to every consumer. Events are immutable once
/// published and are published exactly once, at the moment the state
/// mutation they describe is committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// Periodic liveness heartbeat so idle stream subscribers can detect a
    /// live connection.
    #[serde(rename = "telemetry.tick")]
    TelemetryTick { at: DateTime<Utc> },

    /// A telemetry sample was accepted into the flow history.
    #[serde(rename = "flow.metrics.updated")]
    FlowMetricsUpdated { metrics: TelemetrySample },

    /// The anomaly detector flagged a sample.
    #[serde(rename = "anomaly.detected")]
    AnomalyDetected {
        asset_id: String,
        anomaly_type: AnomalyKind,
        confidence: f64,
        at: DateTime<Utc>,
    },

    /// A raw alert was raised by one of the detectors.
    #[serde(rename = "alert.created")]
    AlertCreated(Alert),

    #[serde(rename = "alert.acknowledged")]
    AlertAcknowledged { alert_id: String, at: DateTime<Utc> },

    #[serde(rename = "incident.created")]
    IncidentCreated {
        incident_id: String,
        severity: AlertSeverity,
        at: DateTime<Utc>,
    },

    #[serde(rename = "incident.updated")]
    IncidentUpdated { incident_id: String, at: DateTime<Utc> },

    #[serde(rename = "node.discovered")]
    NodeDiscovered {
        node_id: String,
        node_type: NodeType,
        at: DateTime<Utc>,
    },

    #[serde(rename = "node.offline")]
    NodeOffline {
        node_id: String,
        previous_health: NodeHealth,
        at: DateTime<Utc>,
    },

    /// A registered node delivered a telemetry sample on a topic.
    #[serde(rename = "node.telemetry")]
    NodeTelemetry {
        node_id: String,
        topic: String,
        sample: TelemetrySample,
    },

    /// Periodic per-node status report alongside telemetry delivery.
    #[serde(rename = "device.status")]
    DeviceStatus {
        node_id: String,
        health: NodeHealth,
        at: DateTime<Utc>,
    },

    #[serde(rename = "command.sent")]
    CommandSent {
        command_id: String,
        node_id: String,
        at: DateTime<Utc>,
    },

    #[serde(rename = "command.acked")]
    CommandAcked {
        command_id: String,
        node_id: String,
        at: DateTime<Utc>,
    },

    #[serde(rename = "mission.started")]
    MissionStarted { mission_id: String, at: DateTime<Utc> },

    #[serde(rename = "mission.completed")]
    MissionCompleted { mission_id: String, at: DateTime<Utc> },

    #[serde(rename = "valve.actuation.requested")]
    ActuationRequested { valve_id: String, at: DateTime<Utc> },

    #[serde(rename = "valve.actuation.completed")]
    ActuationCompleted {
        valve_id: String,
        torque_nm: f64,
        at: DateTime<Utc>,
    },
}

/// Discriminant of [`Event`], used for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    TelemetryTick,
    FlowMetricsUpdated,
    AnomalyDetected,
    AlertCreated,
    AlertAcknowledged,
    IncidentCreated,
    IncidentUpdated,
    NodeDiscovered,
    NodeOffline,
    NodeTelemetry,
    DeviceStatus,
    CommandSent,
    CommandAcked,
    MissionStarted,
    MissionCompleted,
    ActuationRequested,
    ActuationCompleted,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::TelemetryTick { .. } => EventKind::TelemetryTick,
            Event::FlowMetricsUpdated { .. } => EventKind::FlowMetricsUpdated,
            Event::AnomalyDetected { .. } => EventKind::AnomalyDetected,
            Event::AlertCreated(_) => EventKind::AlertCreated,
            Event::AlertAcknowledged { .. } => EventKind::AlertAcknowledged,
            Event::IncidentCreated { .. } => EventKind::IncidentCreated,
            Event::IncidentUpdated { .. } => EventKind::IncidentUpdated,
            Event::NodeDiscovered { .. } => EventKind::NodeDiscovered,
            Event::NodeOffline { .. } => EventKind::NodeOffline,
            Event::NodeTelemetry { .. } => EventKind::NodeTelemetry,
            Event::DeviceStatus { .. } => EventKind::DeviceStatus,
            Event::CommandSent { .. } => EventKind::CommandSent,
            Event::CommandAcked { .. } => EventKind::CommandAcked,
            Event::MissionStarted { .. } => EventKind::MissionStarted,
            Event::MissionCompleted { .. } => EventKind::MissionCompleted,
            Event::ActuationRequested { .. } => EventKind::ActuationRequested,
            Event::ActuationCompleted { .. } => EventKind::ActuationCompleted,
        }
    }
}

/// Subscriber callback. Returning an error marks the delivery failed for
/// this subscriber only; dispatch to the others continues.
pub type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: u64,
    /// `None` subscribes to every event (wildcard).
    filter: Option<EventKind>,
    handler: Handler,
}

/// Central publish/subscribe dispatcher.
///
/// Producers publish; registered callbacks run synchronously in
/// registration order, and a broadcast channel mirrors every event to live
/// stream subscribers (the push channel the external API layer bridges to
/// its transport).
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    stream_tx: broadcast::Sender<Event>,
    next_sub_id: AtomicU64,
    published: AtomicU64,
}

impl EventBus {
    pub fn new(stream_capacity: usize) -> Self {
        let (stream_tx, _) = broadcast::channel(stream_capacity);
        Self {
            subscribers: RwLock::new(Vec::new()),
            stream_tx,
            next_sub_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
        }
    }

    /// Register a callback for one event kind, or for all events when
    /// `filter` is `None`.
    pub fn subscribe<F>(&self, filter: Option<EventKind>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push(Subscriber {
            id,
            filter,
            handler: Arc::new(handler),
        });
        SubscriptionId(id)
    }

    /// Remove a subscription. Returns false if the handle is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.write();
        let before = subs.len();
        subs.retain(|s| s.id != id.0);
        subs.len() != before
    }

    /// Mirror an event onto the live stream, then deliver it to every
    /// matching subscriber in registration order.
    ///
    /// The mirror send comes first so stream subscribers see events in
    /// emission order even when a callback publishes again. Callback
    /// dispatch is depth-first for those re-entrant publishes: the
    /// subscriber snapshot is cloned out of the lock before any callback
    /// runs, so a handler that publishes (the correlator reacting to an
    /// alert, for example) recurses immediately without deadlocking. A
    /// handler that fails is logged and skipped; the remaining handlers
    /// still run.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        self.published.fetch_add(1, Ordering::Relaxed);
        // No stream subscribers is fine; the send result is irrelevant.
        let _ = self.stream_tx.send(event.clone());

        let matching: Vec<Handler> = {
            let subs = self.subscribers.read();
            subs.iter()
                .filter(|s| s.filter.is_none() || s.filter == Some(kind))
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };

        for handler in matching {
            if let Err(e) = handler(&event) {
                warn!("subscriber failed handling {:?}: {:#}", kind, e);
            }
        }
    }

    /// Live, ordered stream of every published event.
    pub fn subscribe_stream(&self) -> broadcast::Receiver<Event> {
        self.stream_tx.subscribe()
    }

    /// Total events published since construction.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

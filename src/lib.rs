// Copyright (c) 2026 flowsentry
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/flowsentry/flowsentry

//! FlowSentry - Field Telemetry Pipeline Core
//!
//! Ingests periodic telemetry samples and discrete events from
//! distributed field devices, detects statistical anomalies, tracks
//! device liveness, correlates raw alerts into incidents, and exposes a
//! live ordered event stream:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    FlowSentry Engine                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐  ┌──────────┐  ┌───────────┐  ┌───────────┐  │
//! │  │ Registry │  │Telemetry │  │ Pipeline  │  │  Valves   │  │
//! │  │ + Feeds  │  │ Monitor  │  │   Guard   │  │           │  │
//! │  └────┬─────┘  └────┬─────┘  └─────┬─────┘  └─────┬─────┘  │
//! │       ↓             ↓              ↓              ↓        │
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │                      Event Bus                      │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! │       ↓             ↓              ↓              ↓        │
//! │  ┌──────────┐  ┌──────────┐  ┌───────────┐  ┌───────────┐  │
//! │  │ Incident │  │ Missions │  │ Snapshot  │  │  Stream   │  │
//! │  │Correlator│  │          │  │   Store   │  │Subscribers│  │
//! │  └──────────┘  └──────────┘  └───────────┘  └───────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Dashboards and REST surfaces are thin views over this pipeline: they
//! push raw samples and commands in, and subscribe to the event stream or
//! query the derived read models.

#![allow(dead_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod incidents;
pub mod missions;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod telemetry;
pub mod valves;

// Re-exports for convenience
pub use crate::core::{Engine, Event, EventBus, EventKind};
pub use config::Config;
pub use error::Error;
pub use incidents::{Alert, AlertCorrelator, Incident};
pub use missions::MissionManager;
pub use pipeline::LeakMonitor;
pub use registry::NodeRegistry;
pub use store::{JsonFileStore, MemoryStore, SnapshotStore};
pub use telemetry::{FlowMonitor, TelemetrySample};
pub use valves::ValveManager;

/// FlowSentry version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// FlowSentry name
pub const NAME: &str = "FlowSentry";

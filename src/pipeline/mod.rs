// Copyright (c) 2026 flowsentry
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/flowsentry/flowsentry

//! Pipeline leak monitoring - simulated detection and alerting

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{interval, Duration};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::core::{Event, EventBus, RingBuffer};
use crate::error::{Error, Result};
use crate::incidents::{Alert, AlertSeverity};

/// Monitored pipeline sections.
pub const SECTIONS: [&str; 5] = ["A-North", "B-Central", "C-South", "D-East", "E-West"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeakSeverity {
    Minor,
    Major,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeakStatus {
    Active,
    Repaired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub section: String,
}

/// A detected (simulated) leak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leak {
    pub id: String,
    pub severity: LeakSeverity,
    pub location: LeakLocation,
    pub volume_estimate_l: f64,
    pub detected_at: DateTime<Utc>,
    pub status: LeakStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Per-section detail for the dashboard layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionReport {
    pub section: String,
    pub active_leaks: Vec<Leak>,
    pub risk_level: RiskLevel,
    pub last_incident: Option<Leak>,
}

/// Snapshot of alerting state across the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeakReport {
    pub active_count: usize,
    pub critical_count: usize,
    pub active_leaks: Vec<Leak>,
    pub recent_history: Vec<Leak>,
    pub integrity: u32,
}

/// Watches the pipeline for leaks and raises alerts onto the bus.
///
/// Detection is simulated: each check interval a leak appears with the
/// configured probability, in a random section with a severity-scaled
/// volume estimate.
pub struct LeakMonitor {
    bus: Arc<EventBus>,
    history: Mutex<RingBuffer<Leak>>,
    rng: Mutex<StdRng>,
    check_interval: Duration,
    leak_probability: f64,
}

impl LeakMonitor {
    pub fn new(config: &PipelineConfig, bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            history: Mutex::new(RingBuffer::new(config.history_capacity)),
            rng: Mutex::new(StdRng::from_entropy()),
            check_interval: Duration::from_secs(config.check_interval_secs),
            leak_probability: config.leak_probability,
        }
    }

    fn simulate_leak(&self) -> Option<Leak> {
        let mut rng = self.rng.lock();
        if rng.gen::<f64>() > self.leak_probability {
            return None;
        }

        let section = SECTIONS[rng.gen_range(0..SECTIONS.len())];
        let severity = match rng.gen_range(0..3) {
            0 => LeakSeverity::Minor,
            1 => LeakSeverity::Major,
            _ => LeakSeverity::Critical,
        };
        let volume_estimate_l = match severity {
            LeakSeverity::Critical => 500.0 + rng.gen::<f64>() * 1000.0,
            LeakSeverity::Major => 100.0 + rng.gen::<f64>() * 200.0,
            LeakSeverity::Minor => 10.0 + rng.gen::<f64>() * 30.0,
        };

        Some(Leak {
            id: Uuid::new_v4().to_string(),
            severity,
            location: LeakLocation {
                latitude: 40.0 + rng.gen::<f64>() * 2.0,
                longitude: -120.0 + rng.gen::<f64>() * 2.0,
                section: section.to_string(),
            },
            volume_estimate_l,
            detected_at: Utc::now(),
            status: LeakStatus::Active,
        })
    }

    /// Record a detected leak and raise its alert.
    pub fn record(&self, leak: Leak) {
        self.history.lock().push(leak.clone());
        warn!(
            "{:?} leak detected in {} ({:.1}L)",
            leak.severity, leak.location.section, leak.volume_estimate_l
        );

        let severity = if leak.severity == LeakSeverity::Critical {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        };
        let message = format!(
            "{:?} leak in {}. Volume: {:.1}L",
            leak.severity, leak.location.section, leak.volume_estimate_l
        );
        let alert = Alert::new(severity, &message, "pipeline-guard")
            .at_location(leak.location.latitude, leak.location.longitude);
        self.bus.publish(Event::AlertCreated(alert));
    }

    /// Detection loop; one probability roll per check interval.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = interval(self.check_interval);
        info!("leak monitor running");

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Some(leak) = self.simulate_leak() {
                        self.record(leak);
                    }
                }
                _ = shutdown.recv() => {
                    info!("leak monitor shutting down");
                    break;
                }
            }
        }
    }

    /// Mark a leak repaired and acknowledge its alert.
    pub fn resolve(&self, leak_id: &str) -> Result<Leak> {
        let leak = {
            let mut history = self.history.lock();
            let leak = history
                .iter_mut()
                .find(|l| l.id == leak_id)
                .ok_or_else(|| Error::LeakNotFound(leak_id.to_string()))?;
            leak.status = LeakStatus::Repaired;
            leak.clone()
        };

        self.bus.publish(Event::AlertAcknowledged {
            alert_id: leak.id.clone(),
            at: Utc::now(),
        });
        Ok(leak)
    }

    /// Active and recent leaks with the integrity score.
    pub fn report(&self) -> LeakReport {
        let history = self.history.lock();
        let active: Vec<Leak> = history
            .query(|l| l.status == LeakStatus::Active)
            .cloned()
            .collect();
        let critical = active
            .iter()
            .filter(|l| l.severity == LeakSeverity::Critical)
            .count();
        let recent: Vec<Leak> = history.tail(10).cloned().collect();

        let integrity =
            (100_i64 - active.len() as i64 * 10 - critical as i64 * 30).max(0) as u32;

        LeakReport {
            active_count: active.len(),
            critical_count: critical,
            active_leaks: active,
            recent_history: recent,
            integrity,
        }
    }

    /// Section-scoped view with a simple risk classification.
    pub fn section_report(&self, section: &str) -> SectionReport {
        let history = self.history.lock();
        let active: Vec<Leak> = history
            .query(|l| l.location.section == section && l.status == LeakStatus::Active)
            .cloned()
            .collect();
        let last_incident = history
            .iter()
            .filter(|l| l.location.section == section)
            .last()
            .cloned();

        let risk_level = if active.len() > 5 {
            RiskLevel::High
        } else if active.len() > 2 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        SectionReport {
            section: section.to_string(),
            active_leaks: active,
            risk_level,
            last_incident,
        }
    }
}

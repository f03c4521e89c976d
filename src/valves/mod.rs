// Copyright (c) 2026 flowsentry
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/flowsentry/flowsentry

//! Valve operations - inventory health and actuation

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::{Event, EventBus};
use crate::error::{Error, Result};
use crate::incidents::{Alert, AlertSeverity};
use crate::store::{SnapshotStore, ValveState};

/// Health thresholds for the valve inventory.
pub const TEMP_WARNING_C: f64 = 60.0;
pub const TEMP_CRITICAL_C: f64 = 75.0;
pub const PRESSURE_WARNING_PA: f64 = 2_800_000.0;
pub const PRESSURE_CRITICAL_PA: f64 = 3_000_000.0;
pub const BASE_TORQUE_NM: f64 = 50.0;
pub const TORQUE_VARIANCE_NM: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValveStatus {
    Ok,
    Warning,
    Offline,
    Maintenance,
}

/// One valve in the fixed inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valve {
    pub id: String,
    pub name: String,
    pub status: ValveStatus,
    pub temperature_c: f64,
    pub pressure_pa: f64,
    pub last_torque_nm: Option<f64>,
    pub last_actuation: Option<DateTime<Utc>>,
    pub estimated_maintenance: DateTime<Utc>,
}

/// Detailed per-valve health view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValveHealthReport {
    pub valve_id: String,
    pub status: ValveStatus,
    pub temperature_c: f64,
    pub pressure_pa: f64,
    pub last_torque_nm: Option<f64>,
    pub last_actuation: Option<DateTime<Utc>>,
    pub estimated_maintenance: DateTime<Utc>,
    pub health_score: u32,
}

/// Manages the valve inventory: health evaluation against thresholds,
/// actuation with simulated completion latency, and store-backed
/// actuation state.
pub struct ValveManager {
    bus: Arc<EventBus>,
    store: Arc<dyn SnapshotStore>,
    valves: Mutex<Vec<Valve>>,
    rng: Mutex<StdRng>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ValveManager {
    pub fn new(bus: Arc<EventBus>, store: Arc<dyn SnapshotStore>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let manager = Self {
            bus,
            store,
            valves: Mutex::new(Self::default_inventory()),
            rng: Mutex::new(StdRng::from_entropy()),
            shutdown_tx,
        };
        manager.load_persisted_state();
        manager
    }

    fn default_inventory() -> Vec<Valve> {
        let now = Utc::now();
        vec![
            Valve {
                id: "v-101".into(),
                name: "Wellhead A1".into(),
                status: ValveStatus::Ok,
                temperature_c: 45.0,
                pressure_pa: 2_500_000.0,
                last_torque_nm: None,
                last_actuation: None,
                estimated_maintenance: now + ChronoDuration::days(120),
            },
            Valve {
                id: "v-102".into(),
                name: "Manifold B2".into(),
                status: ValveStatus::Warning,
                temperature_c: 62.0,
                pressure_pa: 2_800_000.0,
                last_torque_nm: Some(48.0),
                last_actuation: None,
                estimated_maintenance: now + ChronoDuration::days(40),
            },
            Valve {
                id: "v-103".into(),
                name: "Isolation C3".into(),
                status: ValveStatus::Ok,
                temperature_c: 42.0,
                pressure_pa: 2_400_000.0,
                last_torque_nm: None,
                last_actuation: None,
                estimated_maintenance: now + ChronoDuration::days(160),
            },
        ]
    }

    fn load_persisted_state(&self) {
        let persisted = self.store.load_valves();
        if persisted.is_empty() {
            return;
        }
        let mut valves = self.valves.lock();
        for valve in valves.iter_mut() {
            if let Some(state) = persisted.get(&valve.id) {
                if state.last_torque_nm.is_some() {
                    valve.last_torque_nm = state.last_torque_nm;
                }
                if state.last_actuation.is_some() {
                    valve.last_actuation = state.last_actuation;
                }
            }
        }
        info!("restored valve state for {} valves", persisted.len());
    }

    /// Classify a valve against the thresholds; returns the new status and
    /// the alert messages explaining it.
    fn evaluate(valve: &Valve) -> (ValveStatus, Vec<String>) {
        let mut status = ValveStatus::Ok;
        let mut alerts = Vec::new();

        if valve.temperature_c > TEMP_CRITICAL_C {
            status = ValveStatus::Offline;
            alerts.push(format!("Critical temperature: {:.1}C", valve.temperature_c));
        } else if valve.temperature_c > TEMP_WARNING_C {
            status = ValveStatus::Warning;
            alerts.push(format!("High temperature: {:.1}C", valve.temperature_c));
        }

        if valve.pressure_pa > PRESSURE_CRITICAL_PA {
            status = ValveStatus::Offline;
            alerts.push(format!(
                "Critical pressure: {:.1} bar",
                valve.pressure_pa / 1e5
            ));
        } else if valve.pressure_pa > PRESSURE_WARNING_PA {
            if status != ValveStatus::Offline {
                status = ValveStatus::Warning;
            }
            alerts.push(format!("High pressure: {:.1} bar", valve.pressure_pa / 1e5));
        }

        if valve.estimated_maintenance <= Utc::now() {
            status = ValveStatus::Maintenance;
            alerts.push("Maintenance overdue".to_string());
        }

        (status, alerts)
    }

    /// Re-evaluate one valve in place and raise an alert if its status
    /// changed.
    fn refresh_valve(&self, valve: &mut Valve) {
        let (status, alerts) = Self::evaluate(valve);
        if status != valve.status && !alerts.is_empty() {
            let severity = if status == ValveStatus::Offline {
                AlertSeverity::Critical
            } else {
                AlertSeverity::Warning
            };
            let alert = Alert::new(severity, &alerts.join("; "), "valve-ops");
            self.bus.publish(Event::AlertCreated(alert));
        }
        valve.status = status;
    }

    /// Current inventory with simulated sensor drift applied.
    pub fn list(&self) -> Vec<Valve> {
        {
            let mut valves = self.valves.lock();
            let mut rng = self.rng.lock();
            for valve in valves.iter_mut() {
                if rng.gen::<f64>() < 0.3 {
                    valve.temperature_c += (rng.gen::<f64>() - 0.5) * 2.0;
                }
            }
        }

        let ids: Vec<String> = self.valves.lock().iter().map(|v| v.id.clone()).collect();
        ids.iter().filter_map(|id| self.get(id).ok()).collect()
    }

    pub fn get(&self, valve_id: &str) -> Result<Valve> {
        let mut valve = self
            .valves
            .lock()
            .iter()
            .find(|v| v.id == valve_id)
            .cloned()
            .ok_or_else(|| Error::ValveNotFound(valve_id.to_string()))?;

        // Health evaluation may publish; keep it outside the inventory
        // lock, then commit the new status.
        self.refresh_valve(&mut valve);
        if let Some(stored) = self.valves.lock().iter_mut().find(|v| v.id == valve.id) {
            stored.status = valve.status;
        }
        Ok(valve)
    }

    /// Request an actuation. Completion is simulated at 1.0-1.4s, after
    /// which the measured torque and actuation time are committed,
    /// persisted, and announced.
    pub fn actuate(self: &Arc<Self>, valve_id: &str) -> Result<String> {
        if !self.valves.lock().iter().any(|v| v.id == valve_id) {
            return Err(Error::ValveNotFound(valve_id.to_string()));
        }

        let actuation_id = Uuid::new_v4().to_string();
        self.bus.publish(Event::ActuationRequested {
            valve_id: valve_id.to_string(),
            at: Utc::now(),
        });

        let (delay_ms, torque) = {
            let mut rng = self.rng.lock();
            (
                1000 + (rng.gen::<f64>() * 400.0) as u64,
                BASE_TORQUE_NM + (rng.gen::<f64>() - 0.5) * TORQUE_VARIANCE_NM,
            )
        };

        let manager = Arc::clone(self);
        let id = valve_id.to_string();
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(Duration::from_millis(delay_ms)) => {
                    manager.complete_actuation(&id, torque);
                }
                _ = shutdown.recv() => {}
            }
        });

        debug!("actuation {} requested for {}", actuation_id, valve_id);
        Ok(actuation_id)
    }

    fn complete_actuation(&self, valve_id: &str, torque_nm: f64) {
        let completed_at = Utc::now();
        {
            let mut valves = self.valves.lock();
            if let Some(valve) = valves.iter_mut().find(|v| v.id == valve_id) {
                valve.last_torque_nm = Some(torque_nm);
                valve.last_actuation = Some(completed_at);
            }
        }
        self.store.persist_valve(
            valve_id,
            &ValveState {
                last_torque_nm: Some(torque_nm),
                last_actuation: Some(completed_at),
                updated_at: Some(completed_at),
            },
        );
        self.bus.publish(Event::ActuationCompleted {
            valve_id: valve_id.to_string(),
            torque_nm,
            at: completed_at,
        });
    }

    /// Detailed health report with a simple deduction score.
    pub fn health_report(&self, valve_id: &str) -> Result<ValveHealthReport> {
        let valve = self.get(valve_id)?;

        let mut score: i32 = 100;
        if valve.temperature_c > TEMP_WARNING_C {
            score -= 20;
        }
        if valve.pressure_pa > PRESSURE_WARNING_PA {
            score -= 20;
        }
        if valve.estimated_maintenance <= Utc::now() {
            score -= 30;
        }

        Ok(ValveHealthReport {
            valve_id: valve.id,
            status: valve.status,
            temperature_c: valve.temperature_c,
            pressure_pa: valve.pressure_pa,
            last_torque_nm: valve.last_torque_nm,
            last_actuation: valve.last_actuation,
            estimated_maintenance: valve.estimated_maintenance,
            health_score: score.max(0) as u32,
        })
    }

    /// Cancel in-flight actuation tasks. Called on engine teardown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EventKind;
    use crate::store::MemoryStore;

    fn manager() -> (Arc<ValveManager>, Arc<EventBus>, Arc<MemoryStore>) {
        let bus = Arc::new(EventBus::new(64));
        let store = Arc::new(MemoryStore::new());
        let manager = Arc::new(ValveManager::new(bus.clone(), store.clone()));
        (manager, bus, store)
    }

    #[test]
    fn test_inventory_and_initial_health() {
        let (manager, _bus, _store) = manager();
        let valves = manager.list();
        assert_eq!(valves.len(), 3);

        let v102 = manager.get("v-102").unwrap();
        assert_eq!(v102.status, ValveStatus::Warning);
        assert_eq!(v102.last_torque_nm, Some(48.0));
    }

    #[test]
    fn test_evaluate_thresholds() {
        let mut valve = ValveManager::default_inventory().remove(0);

        valve.temperature_c = 80.0;
        let (status, alerts) = ValveManager::evaluate(&valve);
        assert_eq!(status, ValveStatus::Offline);
        assert!(alerts[0].contains("Critical temperature"));

        valve.temperature_c = 65.0;
        let (status, _) = ValveManager::evaluate(&valve);
        assert_eq!(status, ValveStatus::Warning);

        valve.temperature_c = 45.0;
        valve.pressure_pa = 3_100_000.0;
        let (status, _) = ValveManager::evaluate(&valve);
        assert_eq!(status, ValveStatus::Offline);

        valve.pressure_pa = 2_500_000.0;
        valve.estimated_maintenance = Utc::now() - ChronoDuration::days(1);
        let (status, alerts) = ValveManager::evaluate(&valve);
        assert_eq!(status, ValveStatus::Maintenance);
        assert!(alerts.iter().any(|a| a == "Maintenance overdue"));
    }

    #[test]
    fn test_actuate_unknown_valve() {
        let (manager, _bus, _store) = manager();
        assert_eq!(
            manager.actuate("v-999").unwrap_err(),
            Error::ValveNotFound("v-999".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_actuation_completes_and_persists() {
        let (manager, bus, store) = manager();
        let mut rx = bus.subscribe_stream();

        manager.actuate("v-101").unwrap();
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::ActuationRequested);

        // Completion latency is at most 1.4s.
        tokio::time::sleep(Duration::from_secs(2)).await;

        let event = rx.recv().await.unwrap();
        match event {
            Event::ActuationCompleted {
                valve_id,
                torque_nm,
                ..
            } => {
                assert_eq!(valve_id, "v-101");
                assert!((torque_nm - BASE_TORQUE_NM).abs() <= TORQUE_VARIANCE_NM / 2.0);
            }
            other => panic!("expected actuation.completed, got {:?}", other.kind()),
        }

        let valve = manager.get("v-101").unwrap();
        assert!(valve.last_torque_nm.is_some());
        assert!(valve.last_actuation.is_some());

        let persisted = store.load_valves();
        assert!(persisted["v-101"].last_torque_nm.is_some());
    }

    #[test]
    fn test_persisted_state_restored_on_construction() {
        let bus = Arc::new(EventBus::new(64));
        let store = Arc::new(MemoryStore::new());
        store.persist_valve(
            "v-103",
            &ValveState {
                last_torque_nm: Some(51.2),
                last_actuation: Some(Utc::now()),
                updated_at: Some(Utc::now()),
            },
        );

        let manager = ValveManager::new(bus, store);
        let valve = manager.get("v-103").unwrap();
        assert_eq!(valve.last_torque_nm, Some(51.2));
    }

    #[test]
    fn test_health_report_score() {
        let (manager, _bus, _store) = manager();
        // v-102 runs hot and at the pressure threshold boundary.
        let report = manager.health_report("v-102").unwrap();
        assert!(report.health_score <= 80);
        assert_eq!(
            manager.health_report("v-999").unwrap_err(),
            Error::ValveNotFound("v-999".into())
        );
    }
}

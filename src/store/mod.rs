// Copyright (c) 2026 flowsentry
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/flowsentry/flowsentry

//! Snapshot persistence for incidents and valve state
//!
//! The core only needs two primitives from its persistence collaborator:
//! read the current snapshot at startup and persist a mutated snapshot
//! after each change. Durability beyond that is out of scope, so writes
//! are best-effort and failures are logged, never propagated.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::incidents::Incident;

/// The slice of valve state that survives restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValveState {
    pub last_torque_nm: Option<f64>,
    pub last_actuation: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Read-snapshot / persist-snapshot primitives the core requires from
/// its persistence collaborator.
pub trait SnapshotStore: Send + Sync {
    fn load_incidents(&self) -> Vec<Incident>;
    fn persist_incident(&self, incident: &Incident);
    fn load_valves(&self) -> HashMap<String, ValveState>;
    fn persist_valve(&self, valve_id: &str, state: &ValveState);
}

/// JSON files under the data directory, created on first use.
pub struct JsonFileStore {
    incidents_path: PathBuf,
    valves_path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(data_dir)?;
        let store = Self {
            incidents_path: data_dir.join("incidents.json"),
            valves_path: data_dir.join("valves.json"),
            lock: Mutex::new(()),
        };
        if !store.incidents_path.exists() {
            fs::write(&store.incidents_path, "[]")?;
        }
        if !store.valves_path.exists() {
            fs::write(&store.valves_path, "{}")?;
        }
        info!("snapshot store opened at {:?}", data_dir);
        Ok(store)
    }

    fn read_json<T: for<'de> Deserialize<'de>>(path: &Path, fallback: T) -> T {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or(fallback),
            Err(_) => fallback,
        }
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) {
        let serialized = match serde_json::to_string_pretty(value) {
            Ok(s) => s,
            Err(e) => {
                warn!("snapshot serialization failed for {:?}: {}", path, e);
                return;
            }
        };
        if let Err(e) = fs::write(path, serialized) {
            warn!("snapshot write failed for {:?}: {}", path, e);
        }
    }
}

impl SnapshotStore for JsonFileStore {
    fn load_incidents(&self) -> Vec<Incident> {
        let _guard = self.lock.lock();
        Self::read_json(&self.incidents_path, Vec::new())
    }

    fn persist_incident(&self, incident: &Incident) {
        let _guard = self.lock.lock();
        let mut all: Vec<Incident> = Self::read_json(&self.incidents_path, Vec::new());
        match all.iter_mut().find(|i| i.id == incident.id) {
            Some(existing) => *existing = incident.clone(),
            None => all.push(incident.clone()),
        }
        Self::write_json(&self.incidents_path, &all);
    }

    fn load_valves(&self) -> HashMap<String, ValveState> {
        let _guard = self.lock.lock();
        Self::read_json(&self.valves_path, HashMap::new())
    }

    fn persist_valve(&self, valve_id: &str, state: &ValveState) {
        let _guard = self.lock.lock();
        let mut all: HashMap<String, ValveState> = Self::read_json(&self.valves_path, HashMap::new());
        let mut state = state.clone();
        state.updated_at = Some(state.updated_at.unwrap_or_else(Utc::now));
        all.insert(valve_id.to_string(), state);
        Self::write_json(&self.valves_path, &all);
    }
}

/// Volatile store for tests and demo runs.
#[derive(Default)]
pub struct MemoryStore {
    incidents: Mutex<Vec<Incident>>,
    valves: Mutex<HashMap<String, ValveState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn load_incidents(&self) -> Vec<Incident> {
        self.incidents.lock().clone()
    }

    fn persist_incident(&self, incident: &Incident) {
        let mut all = self.incidents.lock();
        match all.iter_mut().find(|i| i.id == incident.id) {
            Some(existing) => *existing = incident.clone(),
            None => all.push(incident.clone()),
        }
    }

    fn load_valves(&self) -> HashMap<String, ValveState> {
        self.valves.lock().clone()
    }

    fn persist_valve(&self, valve_id: &str, state: &ValveState) {
        self.valves
            .lock()
            .insert(valve_id.to_string(), state.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incidents::{AlertSeverity, IncidentStatus};

    fn sample_incident(id: &str) -> Incident {
        Incident {
            id: id.to_string(),
            title: "test".into(),
            severity: AlertSeverity::Warning,
            status: IncidentStatus::Active,
            started_at: Utc::now(),
            resolved_at: None,
            affected_modules: vec!["valve-ops".into()],
            alert_ids: vec![],
            detection_ids: vec![],
            root_cause: None,
            resolution: None,
            timeline: vec![],
        }
    }

    #[test]
    fn test_json_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("flowsentry-test-{}", uuid::Uuid::new_v4()));
        let store = JsonFileStore::open(&dir).unwrap();

        assert!(store.load_incidents().is_empty());
        store.persist_incident(&sample_incident("i-1"));
        store.persist_incident(&sample_incident("i-2"));

        let mut updated = sample_incident("i-1");
        updated.status = IncidentStatus::Resolved;
        store.persist_incident(&updated);

        let loaded = store.load_incidents();
        assert_eq!(loaded.len(), 2);
        assert_eq!(
            loaded.iter().find(|i| i.id == "i-1").unwrap().status,
            IncidentStatus::Resolved
        );

        store.persist_valve(
            "v-101",
            &ValveState {
                last_torque_nm: Some(49.5),
                last_actuation: Some(Utc::now()),
                updated_at: None,
            },
        );
        let valves = store.load_valves();
        assert_eq!(valves["v-101"].last_torque_nm, Some(49.5));
        assert!(valves["v-101"].updated_at.is_some());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_memory_store_upserts() {
        let store = MemoryStore::new();
        store.persist_incident(&sample_incident("i-1"));
        store.persist_incident(&sample_incident("i-1"));
        assert_eq!(store.load_incidents().len(), 1);
    }
}

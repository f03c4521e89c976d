// Copyright (c) 2026 flowsentry
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/flowsentry/flowsentry

//! Mission playback - per-mission state machine and speed control

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::MissionConfig;
use crate::core::{Event, EventBus};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionType {
    Replay,
    Scenario,
}

/// One step in a mission's playback timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionStep {
    pub offset_ms: u64,
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A replay or scenario mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub title: String,
    pub mission_type: MissionType,
    pub status: MissionStatus,
    pub timeline: Vec<MissionStep>,
    pub playback_speed: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Payload for creating a mission. Always starts in draft.
#[derive(Debug, Clone, Deserialize)]
pub struct MissionSpec {
    pub title: String,
    pub mission_type: MissionType,
    #[serde(default)]
    pub timeline: Vec<MissionStep>,
    pub playback_speed: Option<f64>,
}

/// Overrides applied when branching a mission into a new scenario.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MissionOverrides {
    pub title: Option<String>,
    pub playback_speed: Option<f64>,
}

struct MissionState {
    missions: Vec<Mission>,
    /// The single process-wide "current mission". Starting another
    /// mission replaces this pointer without stopping the previous one,
    /// which stays active in storage but is no longer tracked.
    active: Option<String>,
}

/// Drives mission lifecycle: draft -> active -> {paused, completed},
/// paused -> active, and a force-stop into completed from any
/// non-completed state.
pub struct MissionManager {
    bus: Arc<EventBus>,
    state: Mutex<MissionState>,
    speed_bounds: (f64, f64),
}

impl MissionManager {
    pub fn new(config: &MissionConfig, bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            state: Mutex::new(MissionState {
                missions: Vec::new(),
                active: None,
            }),
            speed_bounds: (config.min_speed, config.max_speed),
        }
    }

    fn clamp_speed(&self, speed: f64) -> f64 {
        speed.clamp(self.speed_bounds.0, self.speed_bounds.1)
    }

    pub fn create(&self, spec: MissionSpec) -> Mission {
        let mission = Mission {
            id: Uuid::new_v4().to_string(),
            title: spec.title,
            mission_type: spec.mission_type,
            status: MissionStatus::Draft,
            timeline: spec.timeline,
            playback_speed: self.clamp_speed(spec.playback_speed.unwrap_or(1.0)),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.state.lock().missions.push(mission.clone());
        debug!("mission {} created ({})", mission.id, mission.title);
        mission
    }

    /// Activate a mission and take the active-mission pointer.
    pub fn start(&self, mission_id: &str) -> Result<Mission> {
        let mission = {
            let mut state = self.state.lock();
            let mission = Self::find(&mut state.missions, mission_id)?;
            if mission.status == MissionStatus::Completed {
                return Err(Error::InvalidTransition(format!(
                    "mission {mission_id} is completed"
                )));
            }
            mission.status = MissionStatus::Active;
            if mission.started_at.is_none() {
                mission.started_at = Some(Utc::now());
            }
            let snapshot = mission.clone();
            state.active = Some(snapshot.id.clone());
            snapshot
        };

        info!("mission {} started", mission.id);
        self.bus.publish(Event::MissionStarted {
            mission_id: mission.id.clone(),
            at: Utc::now(),
        });
        Ok(mission)
    }

    pub fn pause(&self, mission_id: &str) -> Result<Mission> {
        let mut state = self.state.lock();
        let mission = Self::find(&mut state.missions, mission_id)?;
        if mission.status != MissionStatus::Active {
            return Err(Error::InvalidTransition(format!(
                "mission {mission_id} is not active"
            )));
        }
        mission.status = MissionStatus::Paused;
        Ok(mission.clone())
    }

    pub fn resume(&self, mission_id: &str) -> Result<Mission> {
        let mut state = self.state.lock();
        let mission = Self::find(&mut state.missions, mission_id)?;
        if mission.status != MissionStatus::Paused {
            return Err(Error::InvalidTransition(format!(
                "mission {mission_id} was never paused"
            )));
        }
        mission.status = MissionStatus::Active;
        Ok(mission.clone())
    }

    /// Force-complete from any non-completed state; clears the active
    /// pointer when it points here.
    pub fn stop(&self, mission_id: &str) -> Result<Mission> {
        let mission = {
            let mut state = self.state.lock();
            let mission = Self::find(&mut state.missions, mission_id)?;
            if mission.status == MissionStatus::Completed {
                return Err(Error::InvalidTransition(format!(
                    "mission {mission_id} is already completed"
                )));
            }
            mission.status = MissionStatus::Completed;
            mission.completed_at = Some(Utc::now());
            let snapshot = mission.clone();
            if state.active.as_deref() == Some(mission_id) {
                state.active = None;
            }
            snapshot
        };

        info!("mission {} completed", mission.id);
        self.bus.publish(Event::MissionCompleted {
            mission_id: mission.id.clone(),
            at: Utc::now(),
        });
        Ok(mission)
    }

    /// Set playback speed, clamped to the configured bounds rather than
    /// rejected.
    pub fn set_speed(&self, mission_id: &str, speed: f64) -> Result<Mission> {
        let clamped = self.clamp_speed(speed);
        let mut state = self.state.lock();
        let mission = Self::find(&mut state.missions, mission_id)?;
        mission.playback_speed = clamped;
        Ok(mission.clone())
    }

    /// Copy a mission's timeline into a new scenario-typed draft.
    pub fn branch(&self, mission_id: &str, overrides: MissionOverrides) -> Result<Mission> {
        let mut state = self.state.lock();
        let source = state
            .missions
            .iter()
            .find(|m| m.id == mission_id)
            .cloned()
            .ok_or_else(|| Error::MissionNotFound(mission_id.to_string()))?;

        let branched = Mission {
            id: Uuid::new_v4().to_string(),
            title: overrides
                .title
                .unwrap_or_else(|| format!("{} (branch)", source.title)),
            mission_type: MissionType::Scenario,
            status: MissionStatus::Draft,
            timeline: source.timeline,
            playback_speed: self.clamp_speed(
                overrides.playback_speed.unwrap_or(source.playback_speed),
            ),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        state.missions.push(branched.clone());
        Ok(branched)
    }

    pub fn get(&self, mission_id: &str) -> Result<Mission> {
        self.state
            .lock()
            .missions
            .iter()
            .find(|m| m.id == mission_id)
            .cloned()
            .ok_or_else(|| Error::MissionNotFound(mission_id.to_string()))
    }

    pub fn list(&self) -> Vec<Mission> {
        self.state.lock().missions.clone()
    }

    /// Id of the currently tracked mission, if any.
    pub fn active_mission(&self) -> Option<String> {
        self.state.lock().active.clone()
    }

    fn find<'a>(missions: &'a mut [Mission], mission_id: &str) -> Result<&'a mut Mission> {
        missions
            .iter_mut()
            .find(|m| m.id == mission_id)
            .ok_or_else(|| Error::MissionNotFound(mission_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EventKind;

    fn manager() -> (MissionManager, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new(64));
        (MissionManager::new(&MissionConfig::default(), bus.clone()), bus)
    }

    fn spec(title: &str) -> MissionSpec {
        MissionSpec {
            title: title.into(),
            mission_type: MissionType::Replay,
            timeline: vec![MissionStep {
                offset_ms: 0,
                action: "open-valve".into(),
                params: serde_json::Value::Null,
            }],
            playback_speed: None,
        }
    }

    #[test]
    fn test_create_starts_in_draft() {
        let (manager, _bus) = manager();
        let mission = manager.create(spec("replay-1"));
        assert_eq!(mission.status, MissionStatus::Draft);
        assert_eq!(mission.playback_speed, 1.0);
        assert!(mission.started_at.is_none());
    }

    #[tokio::test]
    async fn test_start_activates_and_publishes() {
        let (manager, bus) = manager();
        let mut rx = bus.subscribe_stream();
        let mission = manager.create(spec("replay-1"));

        let started = manager.start(&mission.id).unwrap();
        assert_eq!(started.status, MissionStatus::Active);
        assert!(started.started_at.is_some());
        assert_eq!(manager.active_mission(), Some(mission.id.clone()));
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::MissionStarted);
    }

    #[test]
    fn test_second_start_replaces_pointer_without_stopping_first() {
        let (manager, _bus) = manager();
        let first = manager.create(spec("first"));
        let second = manager.create(spec("second"));

        manager.start(&first.id).unwrap();
        manager.start(&second.id).unwrap();

        assert_eq!(manager.active_mission(), Some(second.id));
        // The replaced mission stays active in storage.
        assert_eq!(manager.get(&first.id).unwrap().status, MissionStatus::Active);
    }

    #[test]
    fn test_pause_resume_cycle() {
        let (manager, _bus) = manager();
        let mission = manager.create(spec("m"));
        manager.start(&mission.id).unwrap();

        assert_eq!(
            manager.pause(&mission.id).unwrap().status,
            MissionStatus::Paused
        );
        assert_eq!(
            manager.resume(&mission.id).unwrap().status,
            MissionStatus::Active
        );
    }

    #[test]
    fn test_resume_never_paused_is_invalid() {
        let (manager, _bus) = manager();
        let mission = manager.create(spec("m"));
        let err = manager.resume(&mission.id).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_stop_completes_and_clears_pointer() {
        let (manager, bus) = manager();
        let mission = manager.create(spec("m"));
        manager.start(&mission.id).unwrap();
        let mut rx = bus.subscribe_stream();

        let stopped = manager.stop(&mission.id).unwrap();
        assert_eq!(stopped.status, MissionStatus::Completed);
        assert!(stopped.completed_at.is_some());
        assert_eq!(manager.active_mission(), None);
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::MissionCompleted);

        // Completed is terminal.
        assert!(matches!(
            manager.stop(&mission.id).unwrap_err(),
            Error::InvalidTransition(_)
        ));
        assert!(matches!(
            manager.start(&mission.id).unwrap_err(),
            Error::InvalidTransition(_)
        ));
    }

    #[test]
    fn test_stop_from_draft_is_allowed() {
        let (manager, _bus) = manager();
        let mission = manager.create(spec("m"));
        let stopped = manager.stop(&mission.id).unwrap();
        assert_eq!(stopped.status, MissionStatus::Completed);
    }

    #[test]
    fn test_set_speed_clamps_instead_of_rejecting() {
        let (manager, _bus) = manager();
        let mission = manager.create(spec("m"));

        assert_eq!(manager.set_speed(&mission.id, 50.0).unwrap().playback_speed, 10.0);
        assert_eq!(manager.set_speed(&mission.id, 0.01).unwrap().playback_speed, 0.1);
        assert_eq!(manager.set_speed(&mission.id, 2.5).unwrap().playback_speed, 2.5);
    }

    #[test]
    fn test_branch_copies_timeline_into_scenario_draft() {
        let (manager, _bus) = manager();
        let source = manager.create(spec("source"));
        manager.start(&source.id).unwrap();

        let branch = manager
            .branch(&source.id, MissionOverrides::default())
            .unwrap();
        assert_eq!(branch.mission_type, MissionType::Scenario);
        assert_eq!(branch.status, MissionStatus::Draft);
        assert_eq!(branch.timeline, source.timeline);
        assert_ne!(branch.id, source.id);
        assert!(branch.started_at.is_none());
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let (manager, _bus) = manager();
        assert_eq!(
            manager.start("ghost").unwrap_err(),
            Error::MissionNotFound("ghost".into())
        );
        assert_eq!(
            manager.branch("ghost", MissionOverrides::default()).unwrap_err(),
            Error::MissionNotFound("ghost".into())
        );
    }
}

// Copyright (c) 2026 flowsentry
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/flowsentry/flowsentry

//! Alert correlator - groups raw alerts into incidents

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::CorrelationConfig;
use crate::core::{Event, EventBus, EventKind, SubscriptionId};
use crate::error::{Error, Result};
use crate::store::SnapshotStore;

use super::{Alert, Incident, IncidentStatus, TimelineEvent, TimelineEventKind};

/// Fields an explicit incident update may carry. A `resolution` forces the
/// incident to resolved and stamps `resolved_at`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncidentUpdate {
    pub status: Option<IncidentStatus>,
    pub root_cause: Option<String>,
    pub resolution: Option<String>,
}

/// Aggregate incident statistics for the dashboard layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentSummary {
    pub total: usize,
    pub active: usize,
    pub critical: usize,
    pub avg_resolution_minutes: i64,
    pub system_health: u32,
}

/// Consumes `alert.created` events and maintains the incident set.
///
/// Correlation rule: a new alert joins the first non-resolved incident
/// started within the correlation window; otherwise it seeds a new
/// incident. Geographic proximity is deliberately not considered even
/// though alerts carry coordinates.
pub struct AlertCorrelator {
    bus: Arc<EventBus>,
    store: Arc<dyn SnapshotStore>,
    window: ChronoDuration,
    incidents: Mutex<Vec<Incident>>,
}

impl AlertCorrelator {
    pub fn new(
        config: &CorrelationConfig,
        bus: Arc<EventBus>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            bus,
            store,
            window: ChronoDuration::seconds(config.window_secs as i64),
            incidents: Mutex::new(Vec::new()),
        }
    }

    /// Restore the incident set persisted by a previous run.
    pub fn bootstrap(&self) {
        let restored = self.store.load_incidents();
        if !restored.is_empty() {
            info!("restored {} incidents from snapshot", restored.len());
        }
        *self.incidents.lock() = restored;
    }

    /// Wire this correlator to the bus. Returns the subscription handle.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> SubscriptionId {
        let correlator = Arc::clone(self);
        bus.subscribe(Some(EventKind::AlertCreated), move |event| {
            if let Event::AlertCreated(alert) = event {
                correlator.on_alert(alert);
            }
            Ok(())
        })
    }

    /// Correlate one alert: append to a recent open incident or create a
    /// new one.
    pub fn on_alert(&self, alert: &Alert) {
        let cutoff = Utc::now() - self.window;

        enum Outcome {
            Appended(Incident),
            Created(Incident),
        }

        let outcome = {
            let mut incidents = self.incidents.lock();
            match incidents
                .iter_mut()
                .find(|i| i.status != IncidentStatus::Resolved && i.started_at > cutoff)
            {
                Some(existing) => {
                    existing.alert_ids.push(alert.id.clone());
                    existing.timeline.push(
                        TimelineEvent::new(
                            TimelineEventKind::Alert,
                            "New alert",
                            &format!(
                                "{}: {}",
                                alert.severity.as_str().to_uppercase(),
                                alert.message
                            ),
                        )
                        .with_metadata(serde_json::to_value(alert).unwrap_or_default()),
                    );
                    Outcome::Appended(existing.clone())
                }
                None => {
                    let incident = Incident {
                        id: Uuid::new_v4().to_string(),
                        title: alert.message.clone(),
                        severity: alert.severity,
                        status: IncidentStatus::Active,
                        started_at: Utc::now(),
                        resolved_at: None,
                        affected_modules: vec![alert.module_key.clone()],
                        alert_ids: vec![alert.id.clone()],
                        detection_ids: Vec::new(),
                        root_cause: None,
                        resolution: None,
                        timeline: vec![TimelineEvent::new(
                            TimelineEventKind::Alert,
                            "Incident Started",
                            &alert.message,
                        )
                        .with_metadata(serde_json::to_value(alert).unwrap_or_default())],
                    };
                    incidents.push(incident.clone());
                    Outcome::Created(incident)
                }
            }
        };

        // Persist and publish outside the lock; subscribers may query us.
        match outcome {
            Outcome::Appended(incident) => {
                debug!("alert {} appended to incident {}", alert.id, incident.id);
                self.store.persist_incident(&incident);
                self.bus.publish(Event::IncidentUpdated {
                    incident_id: incident.id,
                    at: Utc::now(),
                });
            }
            Outcome::Created(incident) => {
                info!("incident {} opened: {}", incident.id, incident.title);
                self.store.persist_incident(&incident);
                self.bus.publish(Event::IncidentCreated {
                    incident_id: incident.id,
                    severity: incident.severity,
                    at: Utc::now(),
                });
            }
        }
    }

    /// Apply an explicit status / root-cause / resolution update.
    ///
    /// A resolved incident accepts no further updates.
    pub fn update(&self, incident_id: &str, update: IncidentUpdate) -> Result<Incident> {
        let updated = {
            let mut incidents = self.incidents.lock();
            let incident = incidents
                .iter_mut()
                .find(|i| i.id == incident_id)
                .ok_or_else(|| Error::IncidentNotFound(incident_id.to_string()))?;

            if incident.status == IncidentStatus::Resolved {
                return Err(Error::InvalidTransition(format!(
                    "incident {incident_id} is already resolved"
                )));
            }

            if let Some(status) = update.status {
                incident.status = status;
            }
            if let Some(root_cause) = update.root_cause {
                incident.timeline.push(TimelineEvent::new(
                    TimelineEventKind::Update,
                    "Root Cause Identified",
                    &root_cause,
                ));
                incident.root_cause = Some(root_cause);
            }
            if let Some(resolution) = update.resolution {
                incident.status = IncidentStatus::Resolved;
                incident.resolved_at = Some(Utc::now());
                incident.timeline.push(TimelineEvent::new(
                    TimelineEventKind::Action,
                    "Incident Resolved",
                    &resolution,
                ));
                incident.resolution = Some(resolution);
            }
            incident.clone()
        };

        self.store.persist_incident(&updated);
        self.bus.publish(Event::IncidentUpdated {
            incident_id: updated.id.clone(),
            at: Utc::now(),
        });
        Ok(updated)
    }

    pub fn get(&self, incident_id: &str) -> Result<Incident> {
        self.incidents
            .lock()
            .iter()
            .find(|i| i.id == incident_id)
            .cloned()
            .ok_or_else(|| Error::IncidentNotFound(incident_id.to_string()))
    }

    pub fn list_active(&self) -> Vec<Incident> {
        self.incidents
            .lock()
            .iter()
            .filter(|i| i.status == IncidentStatus::Active)
            .cloned()
            .collect()
    }

    /// Incidents started within the window, newest first, capped at 20.
    pub fn list_recent(&self, window_hours: i64) -> Vec<Incident> {
        let cutoff = Utc::now() - ChronoDuration::hours(window_hours);
        let mut recent: Vec<Incident> = self
            .incidents
            .lock()
            .iter()
            .filter(|i| i.started_at > cutoff)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        recent.truncate(20);
        recent
    }

    /// Timeline sorted newest-first for reading; storage keeps insertion
    /// order.
    pub fn timeline(&self, incident_id: &str) -> Result<Vec<TimelineEvent>> {
        let incident = self.get(incident_id)?;
        let mut timeline = incident.timeline;
        timeline.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(timeline)
    }

    pub fn summary(&self) -> IncidentSummary {
        let incidents = self.incidents.lock();
        let total = incidents.len();
        let active = incidents
            .iter()
            .filter(|i| i.status == IncidentStatus::Active)
            .count();
        let critical = incidents
            .iter()
            .filter(|i| i.severity == super::AlertSeverity::Critical)
            .count();

        let resolved: Vec<(DateTime<Utc>, DateTime<Utc>)> = incidents
            .iter()
            .filter_map(|i| i.resolved_at.map(|r| (i.started_at, r)))
            .collect();
        let avg_resolution_minutes = if resolved.is_empty() {
            0
        } else {
            resolved
                .iter()
                .map(|(start, end)| (*end - *start).num_minutes())
                .sum::<i64>()
                / resolved.len() as i64
        };

        IncidentSummary {
            total,
            active,
            critical,
            avg_resolution_minutes,
            system_health: if active == 0 {
                100
            } else {
                (100_i64 - active as i64 * 10).max(0) as u32
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incidents::AlertSeverity;
    use crate::store::MemoryStore;

    fn correlator_with_window(window_secs: u64) -> (Arc<AlertCorrelator>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new(256));
        let store = Arc::new(MemoryStore::new());
        let config = CorrelationConfig {
            window_secs,
            ..Default::default()
        };
        let correlator = Arc::new(AlertCorrelator::new(&config, bus.clone(), store));
        correlator.attach(&bus);
        (correlator, bus)
    }

    fn alert(message: &str) -> Alert {
        Alert::new(AlertSeverity::Warning, message, "pipeline-guard")
    }

    #[test]
    fn test_alerts_within_window_share_one_incident() {
        let (correlator, bus) = correlator_with_window(120);

        bus.publish(Event::AlertCreated(alert("leak in B-Central")));
        bus.publish(Event::AlertCreated(alert("pressure excursion")));

        let active = correlator.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].alert_ids.len(), 2);
        assert_eq!(active[0].timeline.len(), 2);
        assert_eq!(active[0].title, "leak in B-Central");
    }

    #[test]
    fn test_alert_outside_window_opens_new_incident() {
        // Zero-length window: nothing ever correlates.
        let (correlator, bus) = correlator_with_window(0);

        bus.publish(Event::AlertCreated(alert("first")));
        bus.publish(Event::AlertCreated(alert("second")));

        assert_eq!(correlator.list_active().len(), 2);
    }

    #[test]
    fn test_resolved_incident_never_correlates() {
        let (correlator, bus) = correlator_with_window(120);
        bus.publish(Event::AlertCreated(alert("first")));
        let id = correlator.list_active()[0].id.clone();
        correlator
            .update(
                &id,
                IncidentUpdate {
                    resolution: Some("replaced gasket".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        bus.publish(Event::AlertCreated(alert("second")));
        let active = correlator.list_active();
        assert_eq!(active.len(), 1);
        assert_ne!(active[0].id, id);
    }

    #[test]
    fn test_update_with_root_cause_keeps_incident_open() {
        let (correlator, bus) = correlator_with_window(120);
        bus.publish(Event::AlertCreated(alert("leak")));
        let id = correlator.list_active()[0].id.clone();

        let updated = correlator
            .update(
                &id,
                IncidentUpdate {
                    status: Some(IncidentStatus::Investigating),
                    root_cause: Some("corroded flange".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.status, IncidentStatus::Investigating);
        assert_eq!(updated.root_cause.as_deref(), Some("corroded flange"));
        assert!(updated.resolved_at.is_none());
        assert!(updated
            .timeline
            .iter()
            .any(|e| e.kind == TimelineEventKind::Update));
    }

    #[test]
    fn test_resolution_forces_resolved_and_stamps_time() {
        let (correlator, bus) = correlator_with_window(120);
        bus.publish(Event::AlertCreated(alert("leak")));
        let id = correlator.list_active()[0].id.clone();

        let updated = correlator
            .update(
                &id,
                IncidentUpdate {
                    resolution: Some("valve isolated".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.status, IncidentStatus::Resolved);
        assert!(updated.resolved_at.is_some());

        // No transitions back out of resolved.
        let err = correlator
            .update(
                &id,
                IncidentUpdate {
                    status: Some(IncidentStatus::Active),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition(_)));
    }

    #[test]
    fn test_update_unknown_id_mutates_nothing() {
        let (correlator, _bus) = correlator_with_window(120);
        let err = correlator
            .update("ghost", IncidentUpdate::default())
            .unwrap_err();
        assert_eq!(err, Error::IncidentNotFound("ghost".into()));
        assert_eq!(correlator.summary().total, 0);
    }

    #[test]
    fn test_timeline_reads_newest_first() {
        let (correlator, bus) = correlator_with_window(120);
        bus.publish(Event::AlertCreated(alert("first")));
        std::thread::sleep(std::time::Duration::from_millis(5));
        bus.publish(Event::AlertCreated(alert("second")));

        let id = correlator.list_active()[0].id.clone();
        let timeline = correlator.timeline(&id).unwrap();
        assert_eq!(timeline.len(), 2);
        assert!(timeline[0].timestamp >= timeline[1].timestamp);
        assert_eq!(timeline[0].title, "New alert");

        // Storage keeps insertion order.
        let stored = correlator.get(&id).unwrap();
        assert_eq!(stored.timeline[0].title, "Incident Started");
    }

    #[test]
    fn test_bootstrap_restores_persisted_incidents() {
        let bus = Arc::new(EventBus::new(256));
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let config = CorrelationConfig::default();

        let first = AlertCorrelator::new(&config, bus.clone(), store.clone());
        first.on_alert(&alert("persisted leak"));
        let id = first.list_active()[0].id.clone();

        let second = AlertCorrelator::new(&config, bus, store);
        second.bootstrap();
        assert_eq!(second.get(&id).unwrap().title, "persisted leak");
    }

    #[tokio::test]
    async fn test_incident_events_published() {
        let (correlator, bus) = correlator_with_window(120);
        let mut rx = bus.subscribe_stream();

        bus.publish(Event::AlertCreated(alert("leak")));
        // First the alert itself, then the depth-first incident.created.
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::AlertCreated);
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::IncidentCreated);

        bus.publish(Event::AlertCreated(alert("another")));
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::AlertCreated);
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::IncidentUpdated);

        let _ = correlator;
    }
}

//! Alerts, incidents and their correlation

mod correlator;

pub use correlator::{AlertCorrelator, IncidentSummary, IncidentUpdate};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

/// A raw alert raised by any detector (leak, anomaly, valve health).
///
/// Alerts live on the bus; the correlator derives its own incident-scoped
/// records from them, so they are not separately persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub message: String,
    pub module_key: String,
    pub timestamp: DateTime<Utc>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl Alert {
    pub fn new(severity: AlertSeverity, message: &str, module_key: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            severity,
            status: AlertStatus::Active,
            message: message.to_string(),
            module_key: module_key.to_string(),
            timestamp: Utc::now(),
            lat: None,
            lon: None,
        }
    }

    pub fn at_location(mut self, lat: f64, lon: f64) -> Self {
        self.lat = Some(lat);
        self.lon = Some(lon);
        self
    }
}

/// Incident lifecycle: active -> investigating -> mitigated -> resolved.
/// There is no transition back out of resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Active,
    Investigating,
    Mitigated,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineEventKind {
    Detection,
    Alert,
    Action,
    Update,
}

/// One entry in an incident's chronological record. Strictly append-only,
/// insertion-ordered in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: TimelineEventKind,
    pub title: String,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
}

impl TimelineEvent {
    pub fn new(kind: TimelineEventKind, title: &str, description: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            title: title.to_string(),
            description: description.to_string(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A higher-level record grouping correlated alerts.
///
/// Incidents are never deleted, only transitioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub title: String,
    pub severity: AlertSeverity,
    pub status: IncidentStatus,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub affected_modules: Vec<String>,
    pub alert_ids: Vec<String>,
    pub detection_ids: Vec<String>,
    pub root_cause: Option<String>,
    pub resolution: Option<String>,
    pub timeline: Vec<TimelineEvent>,
}

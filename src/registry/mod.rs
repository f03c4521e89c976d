//! Device registry - remote nodes, their topics, liveness and commands

mod manager;

pub use manager::NodeRegistry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of remote field devices the registry tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Robot,
    Sensor,
    Gateway,
    Stationary,
}

/// Node liveness as judged by the heartbeat monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    Ok,
    Degraded,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

/// Topic sets a node declares at registration. Telemetry subscriptions
/// are validated against `subscribe`, commands against `publish`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicSet {
    pub subscribe: Vec<String>,
    pub publish: Vec<String>,
}

/// A registered remote node, keyed by `namespace/name`.
///
/// Nodes are never deleted; an offline node remains queryable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub namespace: String,
    pub name: String,
    pub node_type: NodeType,
    pub location: Option<Location>,
    pub topics: TopicSet,
    pub last_seen: DateTime<Utc>,
    pub health: NodeHealth,
}

impl Node {
    pub fn node_id(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Registration payload: everything but the registry-owned fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub namespace: String,
    pub name: String,
    pub node_type: NodeType,
    pub location: Option<Location>,
    #[serde(default)]
    pub topics: TopicSet,
}

/// Optional constraints for [`NodeRegistry::discover_nodes`].
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub node_type: Option<NodeType>,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandPriority {
    Low,
    Normal,
    High,
}

/// A command addressed at a node's published topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub node_id: String,
    pub topic: String,
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub priority: CommandPriority,
}

/// Lifecycle of a dispatched command. `Failed` and `Timeout` exist in the
/// taxonomy but are never driven: in-flight commands always resolve to
/// `Acked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Sent,
    Acked,
    Failed,
    Timeout,
}

/// Result record for a dispatched command, resolved asynchronously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command_id: String,
    pub node_id: String,
    pub status: CommandStatus,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

/// Aggregate fleet liveness, for the dashboard layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetHealth {
    pub total: usize,
    pub online: usize,
    pub degraded: usize,
    pub offline: usize,
    pub health_score: u32,
}

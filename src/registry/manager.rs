// Copyright (c) 2026 flowsentry
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/flowsentry/flowsentry

//! Node registry - registration, telemetry feeds, commands, liveness

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RegistryConfig;
use crate::core::{Event, EventBus, RingBuffer};
use crate::error::{Error, Result};
use crate::telemetry::{BaselineSampler, Sampler};

use super::{
    Command, CommandResult, CommandStatus, FleetHealth, Node, NodeFilter, NodeHealth, NodeSpec,
};

/// Tracks remote nodes, validates their declared topics, runs their
/// telemetry feeds, and watches liveness.
///
/// Nodes register once and are never deleted; the heartbeat monitor marks
/// silent nodes offline after the configured threshold, and any telemetry
/// delivery brings them back.
pub struct NodeRegistry {
    bus: Arc<EventBus>,
    nodes: RwLock<HashMap<String, Node>>,
    commands: Mutex<RingBuffer<CommandResult>>,
    feeds: Mutex<HashMap<String, JoinHandle<()>>>,
    feed_shutdown: broadcast::Sender<()>,
    telemetry_interval: Duration,
    monitor_interval: Duration,
    offline_after: ChronoDuration,
    ack_delay_ms: (u64, u64),
}

impl NodeRegistry {
    pub fn new(config: &RegistryConfig, bus: Arc<EventBus>) -> Self {
        let (feed_shutdown, _) = broadcast::channel(1);
        Self {
            bus,
            nodes: RwLock::new(HashMap::new()),
            commands: Mutex::new(RingBuffer::new(config.command_capacity)),
            feeds: Mutex::new(HashMap::new()),
            feed_shutdown,
            telemetry_interval: Duration::from_secs(config.telemetry_interval_secs),
            monitor_interval: Duration::from_secs(config.monitor_interval_secs),
            offline_after: ChronoDuration::seconds(config.offline_after_secs as i64),
            ack_delay_ms: (config.ack_delay_min_ms, config.ack_delay_max_ms),
        }
    }

    /// Register (or re-register) a node and announce its discovery.
    pub fn register_node(&self, spec: NodeSpec) -> Node {
        let node = Node {
            namespace: spec.namespace,
            name: spec.name,
            node_type: spec.node_type,
            location: spec.location,
            topics: spec.topics,
            last_seen: Utc::now(),
            health: NodeHealth::Ok,
        };
        let node_id = node.node_id();
        self.nodes.write().insert(node_id.clone(), node.clone());
        info!("registered node {} ({:?})", node_id, node.node_type);

        self.bus.publish(Event::NodeDiscovered {
            node_id,
            node_type: node.node_type,
            at: node.last_seen,
        });
        node
    }

    pub fn get_node(&self, node_id: &str) -> Option<Node> {
        self.nodes.read().get(node_id).cloned()
    }

    /// Nodes matching the filter, in no particular order.
    pub fn discover_nodes(&self, filter: &NodeFilter) -> Vec<Node> {
        self.nodes
            .read()
            .values()
            .filter(|n| {
                filter.node_type.map_or(true, |t| n.node_type == t)
                    && filter
                        .namespace
                        .as_deref()
                        .map_or(true, |ns| n.namespace == ns)
            })
            .cloned()
            .collect()
    }

    /// Begin a periodic telemetry feed for `node_id` on `topic`.
    ///
    /// The topic must be in the node's declared subscribe set. The feed
    /// runs until the node is deregistered or the registry shuts down;
    /// every delivery refreshes the node's `last_seen` and health.
    pub fn subscribe_telemetry(self: &Arc<Self>, node_id: &str, topic: &str) -> Result<()> {
        {
            let nodes = self.nodes.read();
            let node = nodes
                .get(node_id)
                .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;
            if !node.topics.subscribe.iter().any(|t| t == topic) {
                return Err(Error::TopicNotSubscribed {
                    node: node_id.to_string(),
                    topic: topic.to_string(),
                });
            }
        }

        let feed_key = format!("{node_id}:{topic}");
        let registry = Arc::clone(self);
        let id = node_id.to_string();
        let feed_topic = topic.to_string();
        let mut shutdown = self.feed_shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let mut sampler = BaselineSampler::new(&id);
            let mut tick = interval(registry.telemetry_interval);
            debug!("telemetry feed started for {} on {}", id, feed_topic);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let sample = sampler.sample().await;
                        let delivered = {
                            let mut nodes = registry.nodes.write();
                            match nodes.get_mut(&id) {
                                Some(node) => {
                                    node.last_seen = sample.timestamp;
                                    node.health = NodeHealth::Ok;
                                    true
                                }
                                None => false,
                            }
                        };
                        if !delivered {
                            break;
                        }
                        registry.bus.publish(Event::NodeTelemetry {
                            node_id: id.clone(),
                            topic: feed_topic.clone(),
                            sample: sample.clone(),
                        });
                        registry.bus.publish(Event::DeviceStatus {
                            node_id: id.clone(),
                            health: NodeHealth::Ok,
                            at: sample.timestamp,
                        });
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });

        let mut feeds = self.feeds.lock();
        if let Some(previous) = feeds.insert(feed_key, handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Dispatch a command to a node's published topic.
    ///
    /// Creates a pending result record, announces `command.sent`, and
    /// resolves to acked after a randomized 0.5-2.5s delay. There is no
    /// timeout-to-failure path; in-flight commands always resolve.
    pub fn publish_command(self: &Arc<Self>, cmd: Command) -> Result<CommandResult> {
        {
            let nodes = self.nodes.read();
            let node = nodes
                .get(&cmd.node_id)
                .ok_or_else(|| Error::NodeNotFound(cmd.node_id.clone()))?;
            if !node.topics.publish.iter().any(|t| t == &cmd.topic) {
                return Err(Error::TopicNotPublished {
                    node: cmd.node_id.clone(),
                    topic: cmd.topic.clone(),
                });
            }
        }

        let command_id = Uuid::new_v4().to_string();
        let result = CommandResult {
            command_id: command_id.clone(),
            node_id: cmd.node_id.clone(),
            status: CommandStatus::Pending,
            timestamp: Utc::now(),
            error: None,
        };
        self.commands.lock().push(result.clone());

        self.bus.publish(Event::CommandSent {
            command_id: command_id.clone(),
            node_id: cmd.node_id.clone(),
            at: Utc::now(),
        });
        self.set_command_status(&command_id, CommandStatus::Sent);

        let delay_ms = rand::thread_rng().gen_range(self.ack_delay_ms.0..=self.ack_delay_ms.1);
        let registry = Arc::clone(self);
        let node_id = cmd.node_id.clone();
        let ack_id = command_id;
        let mut shutdown = self.feed_shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(Duration::from_millis(delay_ms)) => {
                    registry.set_command_status(&ack_id, CommandStatus::Acked);
                    registry.bus.publish(Event::CommandAcked {
                        command_id: ack_id,
                        node_id,
                        at: Utc::now(),
                    });
                }
                _ = shutdown.recv() => {}
            }
        });

        Ok(result)
    }

    fn set_command_status(&self, command_id: &str, status: CommandStatus) {
        let mut commands = self.commands.lock();
        if let Some(record) = commands.iter_mut().find(|c| c.command_id == command_id) {
            record.status = status;
            record.timestamp = Utc::now();
        };
    }

    /// Current result record for a dispatched command.
    pub fn command_result(&self, command_id: &str) -> Result<CommandResult> {
        self.commands
            .lock()
            .iter()
            .find(|c| c.command_id == command_id)
            .cloned()
            .ok_or_else(|| Error::CommandNotFound(command_id.to_string()))
    }

    /// Force a node offline and announce it.
    pub fn mark_node_offline(&self, node_id: &str) -> Result<()> {
        let previous = {
            let mut nodes = self.nodes.write();
            let node = nodes
                .get_mut(node_id)
                .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;
            let previous = node.health;
            node.health = NodeHealth::Offline;
            previous
        };

        warn!("node {} marked offline", node_id);
        self.bus.publish(Event::NodeOffline {
            node_id: node_id.to_string(),
            previous_health: previous,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Stop a node's telemetry feeds and take it offline. The record
    /// remains queryable; nodes are never deleted.
    pub fn deregister_node(&self, node_id: &str) -> Result<()> {
        {
            let mut feeds = self.feeds.lock();
            let prefix = format!("{node_id}:");
            feeds.retain(|key, handle| {
                if key.starts_with(&prefix) {
                    handle.abort();
                    false
                } else {
                    true
                }
            });
        }

        let already_offline = self
            .get_node(node_id)
            .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?
            .health
            == NodeHealth::Offline;
        if !already_offline {
            self.mark_node_offline(node_id)?;
        }
        Ok(())
    }

    pub fn fleet_health(&self) -> FleetHealth {
        let nodes = self.nodes.read();
        let total = nodes.len();
        let online = nodes
            .values()
            .filter(|n| n.health == NodeHealth::Ok)
            .count();
        let degraded = nodes
            .values()
            .filter(|n| n.health == NodeHealth::Degraded)
            .count();
        let offline = nodes
            .values()
            .filter(|n| n.health == NodeHealth::Offline)
            .count();
        FleetHealth {
            total,
            online,
            degraded,
            offline,
            health_score: if total == 0 {
                100
            } else {
                (online * 100 / total) as u32
            },
        }
    }

    /// Heartbeat monitor loop: marks nodes offline once their `last_seen`
    /// exceeds the configured threshold.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = interval(self.monitor_interval);
        info!("heartbeat monitor running");

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let cutoff = Utc::now() - self.offline_after;
                    let stale: Vec<String> = self
                        .nodes
                        .read()
                        .values()
                        .filter(|n| n.health != NodeHealth::Offline && n.last_seen < cutoff)
                        .map(|n| n.node_id())
                        .collect();
                    for node_id in stale {
                        let _ = self.mark_node_offline(&node_id);
                    }
                }
                _ = shutdown.recv() => {
                    info!("heartbeat monitor shutting down");
                    break;
                }
            }
        }
    }

    /// Cancel every feed and pending ack task. Called on engine teardown.
    pub fn shutdown(&self) {
        let _ = self.feed_shutdown.send(());
        let mut feeds = self.feeds.lock();
        for (_, handle) in feeds.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EventKind;
    use crate::registry::{CommandPriority, NodeType, TopicSet};

    fn sensor_spec(name: &str) -> NodeSpec {
        NodeSpec {
            namespace: "field".into(),
            name: name.into(),
            node_type: NodeType::Sensor,
            location: None,
            topics: TopicSet {
                subscribe: vec!["flow".into()],
                publish: vec!["cmd_vel".into()],
            },
        }
    }

    fn registry() -> Arc<NodeRegistry> {
        let bus = Arc::new(EventBus::new(256));
        Arc::new(NodeRegistry::new(&RegistryConfig::default(), bus))
    }

    #[tokio::test]
    async fn test_register_and_discover_with_filter() {
        let reg = registry();
        reg.register_node(sensor_spec("n1"));
        reg.register_node(NodeSpec {
            node_type: NodeType::Gateway,
            ..sensor_spec("gw1")
        });

        assert_eq!(reg.discover_nodes(&NodeFilter::default()).len(), 2);
        let sensors = reg.discover_nodes(&NodeFilter {
            node_type: Some(NodeType::Sensor),
            ..Default::default()
        });
        assert_eq!(sensors.len(), 1);
        assert_eq!(sensors[0].node_id(), "field/n1");
        assert_eq!(sensors[0].health, NodeHealth::Ok);
    }

    #[tokio::test]
    async fn test_subscribe_telemetry_validates_node_and_topic() {
        let reg = registry();
        reg.register_node(sensor_spec("n1"));

        assert_eq!(
            reg.subscribe_telemetry("field/ghost", "flow"),
            Err(Error::NodeNotFound("field/ghost".into()))
        );
        assert_eq!(
            reg.subscribe_telemetry("field/n1", "steam"),
            Err(Error::TopicNotSubscribed {
                node: "field/n1".into(),
                topic: "steam".into()
            })
        );
        assert!(reg.subscribe_telemetry("field/n1", "flow").is_ok());
        reg.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_feed_delivers_and_refreshes_last_seen() {
        let bus = Arc::new(EventBus::new(256));
        let reg = Arc::new(NodeRegistry::new(&RegistryConfig::default(), bus.clone()));
        reg.register_node(sensor_spec("n1"));
        let registered_at = reg.get_node("field/n1").unwrap().last_seen;

        let mut rx = bus.subscribe_stream();
        reg.subscribe_telemetry("field/n1", "flow").unwrap();

        tokio::time::sleep(Duration::from_secs(26)).await;

        let mut telemetry = 0;
        while let Ok(event) = rx.try_recv() {
            if event.kind() == EventKind::NodeTelemetry {
                telemetry += 1;
            }
        }
        assert!(telemetry >= 2, "expected several deliveries, got {telemetry}");

        let node = reg.get_node("field/n1").unwrap();
        assert_eq!(node.health, NodeHealth::Ok);
        assert!(node.last_seen > registered_at);
        reg.shutdown();
    }

    #[tokio::test]
    async fn test_publish_command_validates_topic() {
        let reg = registry();
        reg.register_node(sensor_spec("n1"));

        let bad = Command {
            node_id: "field/n1".into(),
            topic: "flow".into(),
            action: "stop".into(),
            params: serde_json::Value::Null,
            priority: CommandPriority::Normal,
        };
        assert_eq!(
            reg.publish_command(bad).unwrap_err(),
            Error::TopicNotPublished {
                node: "field/n1".into(),
                topic: "flow".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_resolves_to_acked() {
        let bus = Arc::new(EventBus::new(256));
        let reg = Arc::new(NodeRegistry::new(&RegistryConfig::default(), bus.clone()));
        reg.register_node(sensor_spec("n1"));
        let mut rx = bus.subscribe_stream();

        let result = reg
            .publish_command(Command {
                node_id: "field/n1".into(),
                topic: "cmd_vel".into(),
                action: "halt".into(),
                params: serde_json::json!({"speed": 0}),
                priority: CommandPriority::High,
            })
            .unwrap();
        assert_eq!(result.status, CommandStatus::Pending);

        // Ack delay is at most 2.5s.
        tokio::time::sleep(Duration::from_secs(3)).await;

        let resolved = reg.command_result(&result.command_id).unwrap();
        assert_eq!(resolved.status, CommandStatus::Acked);

        let kinds: Vec<EventKind> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.kind())
            .collect();
        assert!(kinds.contains(&EventKind::CommandSent));
        assert!(kinds.contains(&EventKind::CommandAcked));
        reg.shutdown();
    }

    #[tokio::test]
    async fn test_monitor_marks_silent_node_offline() {
        // Liveness is judged on wall-clock timestamps, so this test runs
        // in real time against scaled-down thresholds.
        let config = RegistryConfig {
            monitor_interval_secs: 1,
            offline_after_secs: 1,
            ..Default::default()
        };
        let bus = Arc::new(EventBus::new(256));
        let reg = Arc::new(NodeRegistry::new(&config, bus.clone()));
        reg.register_node(sensor_spec("n1"));

        let (shutdown_tx, _) = broadcast::channel(1);
        let monitor = reg.clone().run(shutdown_tx.subscribe());
        let handle = tokio::spawn(monitor);

        // Before the silence threshold the node is still ok.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(reg.get_node("field/n1").unwrap().health, NodeHealth::Ok);

        tokio::time::sleep(Duration::from_millis(2200)).await;
        assert_eq!(
            reg.get_node("field/n1").unwrap().health,
            NodeHealth::Offline
        );

        let _ = shutdown_tx.send(());
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_deregister_keeps_record_queryable() {
        let reg = registry();
        reg.register_node(sensor_spec("n1"));
        reg.subscribe_telemetry("field/n1", "flow").unwrap();

        reg.deregister_node("field/n1").unwrap();
        let node = reg.get_node("field/n1").unwrap();
        assert_eq!(node.health, NodeHealth::Offline);
        assert_eq!(
            reg.deregister_node("field/ghost"),
            Err(Error::NodeNotFound("field/ghost".into()))
        );
    }

    #[tokio::test]
    async fn test_mark_offline_performs_no_mutation_on_unknown() {
        let reg = registry();
        assert!(reg.mark_node_offline("nope").is_err());
        assert_eq!(reg.fleet_health().total, 0);
    }
}

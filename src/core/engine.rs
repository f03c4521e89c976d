//! Composition root - constructs and wires every pipeline component

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::info;

use crate::config::Config;
use crate::incidents::AlertCorrelator;
use crate::missions::MissionManager;
use crate::pipeline::LeakMonitor;
use crate::registry::NodeRegistry;
use crate::store::{JsonFileStore, MemoryStore, SnapshotStore};
use crate::telemetry::{BaselineSampler, FlowMonitor};
use crate::valves::ValveManager;

use super::{Event, EventBus, PipelineState};

/// Owns every pipeline component and their background loops.
///
/// Components are constructed here and passed explicit references; there
/// is no ambient global state. `start` wires the correlator onto the bus
/// and spawns the timers; `stop` tears everything down through the
/// shutdown channel.
pub struct Engine {
    pub config: Arc<Config>,
    bus: Arc<EventBus>,
    store: Arc<dyn SnapshotStore>,
    telemetry: Arc<FlowMonitor>,
    registry: Arc<NodeRegistry>,
    correlator: Arc<AlertCorrelator>,
    leaks: Arc<LeakMonitor>,
    valves: Arc<ValveManager>,
    missions: Arc<MissionManager>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn SnapshotStore> = if config.persistence_enabled {
            Arc::new(JsonFileStore::open(&config.data_dir)?)
        } else {
            Arc::new(MemoryStore::new())
        };
        Ok(Self::with_store(config, store))
    }

    /// Build against an explicit store; used by tests and embedders.
    pub fn with_store(config: Config, store: Arc<dyn SnapshotStore>) -> Self {
        let config = Arc::new(config);
        let bus = Arc::new(EventBus::new(config.bus.stream_capacity));
        let (shutdown_tx, _) = broadcast::channel(1);

        let telemetry = Arc::new(FlowMonitor::new(&config.telemetry, bus.clone()));
        let registry = Arc::new(NodeRegistry::new(&config.registry, bus.clone()));
        let correlator = Arc::new(AlertCorrelator::new(
            &config.correlation,
            bus.clone(),
            store.clone(),
        ));
        let leaks = Arc::new(LeakMonitor::new(&config.pipeline, bus.clone()));
        let valves = Arc::new(ValveManager::new(bus.clone(), store.clone()));
        let missions = Arc::new(MissionManager::new(&config.missions, bus.clone()));

        Self {
            config,
            bus,
            store,
            telemetry,
            registry,
            correlator,
            leaks,
            valves,
            missions,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Wire subscriptions and spawn the background loops.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("starting pipeline engine...");

        self.correlator.bootstrap();
        self.correlator.attach(&self.bus);

        let mut tasks = self.tasks.lock();

        // Heartbeat tick for idle stream subscribers.
        let bus = self.bus.clone();
        let heartbeat_interval = Duration::from_secs(self.config.bus.heartbeat_interval_secs);
        let mut shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut tick = interval(heartbeat_interval);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        bus.publish(Event::TelemetryTick { at: Utc::now() });
                    }
                    _ = shutdown.recv() => break,
                }
            }
        }));

        let telemetry = self.telemetry.clone();
        let asset_id = self.config.telemetry.asset_id.clone();
        let shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            telemetry
                .run(Box::new(BaselineSampler::new(&asset_id)), shutdown)
                .await;
        }));

        let leaks = self.leaks.clone();
        let shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            leaks.run(shutdown).await;
        }));

        let registry = self.registry.clone();
        let shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(registry.run(shutdown)));

        info!("pipeline engine started");
        Ok(())
    }

    /// Signal every loop to stop and wait for them to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("stopping pipeline engine...");

        let _ = self.shutdown_tx.send(());
        self.registry.shutdown();
        self.valves.shutdown();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        info!("pipeline engine stopped");
    }

    pub fn state(&self) -> PipelineState {
        let fleet = self.registry.fleet_health();
        PipelineState {
            running: self.running.load(Ordering::SeqCst),
            nodes_total: fleet.total,
            nodes_online: fleet.online,
            active_incidents: self.correlator.list_active().len(),
            active_leaks: self.leaks.report().active_count,
            missions_total: self.missions.list().len(),
            telemetry_samples: self.telemetry.sample_count(),
            anomalies_detected: self.telemetry.anomaly_count(),
            events_published: self.bus.published_count(),
        }
    }

    /// Live, ordered stream of everything published on the bus.
    pub fn subscribe_stream(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe_stream()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn telemetry(&self) -> &Arc<FlowMonitor> {
        &self.telemetry
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn incidents(&self) -> &Arc<AlertCorrelator> {
        &self.correlator
    }

    pub fn leaks(&self) -> &Arc<LeakMonitor> {
        &self.leaks
    }

    pub fn valves(&self) -> &Arc<ValveManager> {
        &self.valves
    }

    pub fn missions(&self) -> &Arc<MissionManager> {
        &self.missions
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EventKind;
    use crate::incidents::{Alert, AlertSeverity};
    use crate::registry::{NodeFilter, NodeHealth, NodeSpec, NodeType, TopicSet};

    fn engine() -> Engine {
        let mut config = Config::default();
        config.persistence_enabled = false;
        Engine::with_store(config, Arc::new(MemoryStore::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_tick_published_on_interval() {
        let engine = engine();
        engine.start().await.unwrap();
        let mut rx = engine.subscribe_stream();

        tokio::time::sleep(Duration::from_secs(11)).await;

        let mut ticks = 0;
        while let Ok(event) = rx.try_recv() {
            if event.kind() == EventKind::TelemetryTick {
                ticks += 1;
            }
        }
        assert!(ticks >= 2, "expected heartbeat ticks, got {ticks}");
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_node_telemetry_scenario() {
        let engine = engine();
        engine.start().await.unwrap();

        engine.registry().register_node(NodeSpec {
            namespace: "field".into(),
            name: "N1".into(),
            node_type: NodeType::Sensor,
            location: None,
            topics: TopicSet {
                subscribe: vec!["flow".into()],
                publish: vec![],
            },
        });
        let registered_at = engine.registry().get_node("field/N1").unwrap().last_seen;

        let mut rx = engine.subscribe_stream();
        engine
            .registry()
            .subscribe_telemetry("field/N1", "flow")
            .unwrap();

        // Five to six feed ticks.
        tokio::time::sleep(Duration::from_secs(28)).await;

        let mut node_telemetry = 0;
        while let Ok(event) = rx.try_recv() {
            if event.kind() == EventKind::NodeTelemetry {
                node_telemetry += 1;
            }
        }
        assert!(node_telemetry >= 1);

        let node = engine.registry().get_node("field/N1").unwrap();
        assert_eq!(node.health, NodeHealth::Ok);
        assert!(node.last_seen > registered_at);

        let state = engine.state();
        assert!(state.running);
        assert_eq!(state.nodes_total, 1);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_alert_flows_into_incident() {
        let engine = engine();
        engine.start().await.unwrap();

        engine.bus().publish(Event::AlertCreated(Alert::new(
            AlertSeverity::Critical,
            "major leak in C-South",
            "pipeline-guard",
        )));

        let active = engine.incidents().list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].severity, AlertSeverity::Critical);
        assert_eq!(engine.state().active_incidents, 1);
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_generator_feeds_telemetry_history() {
        let engine = engine();
        engine.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(26)).await;
        assert!(engine.telemetry().sample_count() >= 4);
        assert!(!engine.telemetry().live_source());

        // External ingest flips the source flag engine-wide.
        engine
            .telemetry()
            .ingest(crate::telemetry::TelemetrySample::new(150.0, 2_500_000.0, 45.0));
        assert!(engine.telemetry().live_source());
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_discover_nodes_via_engine() {
        let engine = engine();
        engine.registry().register_node(NodeSpec {
            namespace: "field".into(),
            name: "gw".into(),
            node_type: NodeType::Gateway,
            location: None,
            topics: TopicSet::default(),
        });
        assert_eq!(
            engine.registry().discover_nodes(&NodeFilter::default()).len(),
            1
        );
    }
}

// Copyright (c) 2026 flowsentry
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/flowsentry/flowsentry

//! Flow monitor - rolling-window statistics and anomaly classification

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{interval, Duration};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::TelemetryConfig;
use crate::core::{Event, EventBus, RingBuffer};

use super::{Anomaly, AnomalyKind, AnomalySeverity, ExpectedRange, Sampler, TelemetrySample};

/// Min/max/avg over the retained history for one metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Aggregate statistics across all three metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowStats {
    pub flow: MetricStats,
    pub pressure: MetricStats,
    pub temperature: MetricStats,
}

/// Snapshot answering "how is the flow system doing right now".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowHealth {
    pub timestamp: DateTime<Utc>,
    pub current: Option<TelemetrySample>,
    pub anomaly_count: usize,
    pub recent_anomalies: Vec<Anomaly>,
    pub health_score: u32,
}

/// Filter for anomaly history queries. Empty filter returns everything.
#[derive(Debug, Clone, Default)]
pub struct AnomalyFilter {
    pub severity: Option<AnomalySeverity>,
    pub kind: Option<AnomalyKind>,
    pub since: Option<DateTime<Utc>>,
}

struct MonitorState {
    history: RingBuffer<TelemetrySample>,
    anomalies: RingBuffer<Anomaly>,
    /// Set once external telemetry arrives; the generator stops
    /// contributing from that point so the two sources never interleave.
    live_source: bool,
}

/// Consumes telemetry samples, maintains the rolling history, and flags
/// deviations from the recent baseline.
///
/// Detection needs at least three retained samples; the window is the
/// most recent ten, including the sample under test. Until a live source
/// ingests, a generator loop feeds simulated samples.
pub struct FlowMonitor {
    bus: Arc<EventBus>,
    state: Mutex<MonitorState>,
    window: usize,
    min_samples: usize,
    generator_interval: Duration,
    asset_id: String,
}

impl FlowMonitor {
    pub fn new(config: &TelemetryConfig, bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            state: Mutex::new(MonitorState {
                history: RingBuffer::new(config.history_capacity),
                anomalies: RingBuffer::new(config.anomaly_capacity),
                live_source: false,
            }),
            window: config.window,
            min_samples: config.min_samples,
            generator_interval: Duration::from_secs(config.generator_interval_secs),
            asset_id: config.asset_id.clone(),
        }
    }

    /// Ingest an externally produced sample. The first call permanently
    /// mutes the simulated generator.
    pub fn ingest(&self, sample: TelemetrySample) -> Vec<Anomaly> {
        {
            let mut state = self.state.lock();
            if !state.live_source {
                info!("external telemetry source active, muting generator");
                state.live_source = true;
            }
        }
        self.record(sample)
    }

    /// Append a sample to the history, classify it against the rolling
    /// window, and publish the resulting events.
    pub(crate) fn record(&self, sample: TelemetrySample) -> Vec<Anomaly> {
        let anomalies = {
            let mut state = self.state.lock();
            state.history.push(sample.clone());

            if state.history.len() < self.min_samples {
                Vec::new()
            } else {
                let found = self.classify(state.history.tail(self.window), &sample);
                for anomaly in &found {
                    state.anomalies.push(anomaly.clone());
                }
                found
            }
        };

        // Publish outside the lock; subscribers may query us re-entrantly.
        for anomaly in &anomalies {
            debug!(
                "anomaly detected: {:?} {:?} actual={}",
                anomaly.kind, anomaly.severity, anomaly.actual_value
            );
            self.bus.publish(Event::AnomalyDetected {
                asset_id: self.asset_id.clone(),
                anomaly_type: anomaly.kind,
                confidence: anomaly.confidence(),
                at: anomaly.detected_at,
            });
        }
        self.bus.publish(Event::FlowMetricsUpdated { metrics: sample });

        anomalies
    }

    fn classify<'a>(
        &self,
        window: impl Iterator<Item = &'a TelemetrySample>,
        current: &TelemetrySample,
    ) -> Vec<Anomaly> {
        let recent: Vec<&TelemetrySample> = window.collect();
        let n = recent.len() as f64;
        let avg_flow = recent.iter().map(|s| s.flow_rate_lpm).sum::<f64>() / n;
        let avg_pressure = recent.iter().map(|s| s.pressure_pa).sum::<f64>() / n;
        let avg_temp = recent.iter().map(|s| s.temperature_c).sum::<f64>() / n;

        let mut anomalies = Vec::new();
        let now = Utc::now();

        let flow_dev = (current.flow_rate_lpm - avg_flow).abs();
        if flow_dev > avg_flow * 0.25 {
            anomalies.push(Anomaly {
                id: Uuid::new_v4(),
                kind: AnomalyKind::FlowRateDeviation,
                severity: if flow_dev > avg_flow * 0.5 {
                    AnomalySeverity::High
                } else {
                    AnomalySeverity::Medium
                },
                detected_at: now,
                expected_range: ExpectedRange {
                    min: avg_flow * 0.75,
                    max: avg_flow * 1.25,
                },
                actual_value: current.flow_rate_lpm,
            });
        }

        let pressure_dev = (current.pressure_pa - avg_pressure).abs();
        if pressure_dev > 100_000.0 {
            anomalies.push(Anomaly {
                id: Uuid::new_v4(),
                kind: AnomalyKind::PressureDeviation,
                severity: if pressure_dev > 200_000.0 {
                    AnomalySeverity::High
                } else {
                    AnomalySeverity::Low
                },
                detected_at: now,
                expected_range: ExpectedRange {
                    min: avg_pressure - 100_000.0,
                    max: avg_pressure + 100_000.0,
                },
                actual_value: current.pressure_pa,
            });
        }

        let temp_dev = (current.temperature_c - avg_temp).abs();
        if temp_dev > 10.0 {
            anomalies.push(Anomaly {
                id: Uuid::new_v4(),
                kind: AnomalyKind::TemperatureSpike,
                severity: if temp_dev > 20.0 {
                    AnomalySeverity::High
                } else {
                    AnomalySeverity::Medium
                },
                detected_at: now,
                expected_range: ExpectedRange {
                    min: avg_temp - 5.0,
                    max: avg_temp + 5.0,
                },
                actual_value: current.temperature_c,
            });
        }

        anomalies
    }

    /// Generator loop: feeds simulated samples until a live source takes
    /// over or shutdown is signalled.
    pub async fn run(&self, mut sampler: Box<dyn Sampler>, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = interval(self.generator_interval);
        info!("telemetry generator running ({})", sampler.id());

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if !self.live_source() {
                        let sample = sampler.sample().await;
                        self.record(sample);
                    }
                }
                _ = shutdown.recv() => {
                    info!("telemetry generator shutting down");
                    break;
                }
            }
        }
    }

    /// Whether an external source has taken over from the generator.
    pub fn live_source(&self) -> bool {
        self.state.lock().live_source
    }

    pub fn current(&self) -> Option<TelemetrySample> {
        self.state.lock().history.latest().cloned()
    }

    /// The most recent `n` samples, oldest first.
    pub fn history(&self, n: usize) -> Vec<TelemetrySample> {
        self.state.lock().history.tail(n).cloned().collect()
    }

    pub fn sample_count(&self) -> usize {
        self.state.lock().history.len()
    }

    pub fn anomaly_count(&self) -> usize {
        self.state.lock().anomalies.len()
    }

    pub fn stats(&self) -> FlowStats {
        let state = self.state.lock();
        FlowStats {
            flow: Self::metric_stats(state.history.iter().map(|s| s.flow_rate_lpm)),
            pressure: Self::metric_stats(state.history.iter().map(|s| s.pressure_pa)),
            temperature: Self::metric_stats(state.history.iter().map(|s| s.temperature_c)),
        }
    }

    fn metric_stats(values: impl Iterator<Item = f64>) -> MetricStats {
        let values: Vec<f64> = values.collect();
        if values.is_empty() {
            return MetricStats::default();
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = values.iter().sum::<f64>() / values.len() as f64;
        MetricStats { min, max, avg }
    }

    /// Anomaly history matching the filter, oldest first, capped at 50.
    pub fn anomalies(&self, filter: &AnomalyFilter) -> Vec<Anomaly> {
        let state = self.state.lock();
        let matching: Vec<Anomaly> = state
            .anomalies
            .query(|a| {
                filter.severity.map_or(true, |s| a.severity == s)
                    && filter.kind.map_or(true, |k| a.kind == k)
                    && filter.since.map_or(true, |t| a.detected_at > t)
            })
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(50);
        matching.into_iter().skip(skip).collect()
    }

    /// Health snapshot over the last hour of anomalies.
    pub fn health(&self) -> FlowHealth {
        let one_hour_ago = Utc::now() - ChronoDuration::hours(1);
        let recent = self.anomalies(&AnomalyFilter {
            since: Some(one_hour_ago),
            ..Default::default()
        });

        let mut score: i32 = 100;
        if recent.len() > 3 {
            score -= 20;
        }
        if recent.iter().any(|a| a.severity == AnomalySeverity::High) {
            score -= 30;
        }

        let tail = recent.len().saturating_sub(5);
        FlowHealth {
            timestamp: Utc::now(),
            current: self.current(),
            anomaly_count: recent.len(),
            recent_anomalies: recent.into_iter().skip(tail).collect(),
            health_score: score.max(0) as u32,
        }
    }
}

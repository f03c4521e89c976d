//! Telemetry ingestion and anomaly detection

mod monitor;
mod sampler;

pub use monitor::{AnomalyFilter, FlowHealth, FlowMonitor, FlowStats, MetricStats};
pub use sampler::{BaselineSampler, Sampler};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One timestamped reading of the monitored flow metrics.
///
/// Units are fixed: volumetric flow in litres per minute, absolute
/// pressure in pascal, temperature in degrees Celsius. Samples are never
/// mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub flow_rate_lpm: f64,
    pub pressure_pa: f64,
    pub temperature_c: f64,
    pub timestamp: DateTime<Utc>,
}

impl TelemetrySample {
    pub fn new(flow_rate_lpm: f64, pressure_pa: f64, temperature_c: f64) -> Self {
        Self {
            flow_rate_lpm,
            pressure_pa,
            temperature_c,
            timestamp: Utc::now(),
        }
    }
}

/// Classified anomaly kinds, one per monitored metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    FlowRateDeviation,
    PressureDeviation,
    TemperatureSpike,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
}

/// Range a metric was expected to stay inside when it was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedRange {
    pub min: f64,
    pub max: f64,
}

/// A sample that deviated from the rolling window baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: Uuid,
    pub kind: AnomalyKind,
    pub severity: AnomalySeverity,
    pub detected_at: DateTime<Utc>,
    pub expected_range: ExpectedRange,
    pub actual_value: f64,
}

impl Anomaly {
    /// Synthetic confidence carried on the published event.
    pub fn confidence(&self) -> f64 {
        if self.severity == AnomalySeverity::High {
            0.95
        } else {
            0.7
        }
    }
}

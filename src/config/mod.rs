// Copyright (c) 2026 flowsentry
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/flowsentry/flowsentry

//! Configuration module

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application name
    pub app_name: String,

    /// Application version
    pub version: String,

    /// Data directory (snapshot store lives here)
    pub data_dir: PathBuf,

    /// Log level
    pub log_level: String,

    /// Persist incident and valve snapshots to disk
    pub persistence_enabled: bool,

    /// Event bus configuration
    pub bus: BusConfig,

    /// Telemetry ingestion and anomaly detection
    pub telemetry: TelemetryConfig,

    /// Device registry and heartbeat monitor
    pub registry: RegistryConfig,

    /// Alert correlation
    pub correlation: CorrelationConfig,

    /// Pipeline leak monitoring
    pub pipeline: PipelineConfig,

    /// Mission playback
    pub missions: MissionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "FlowSentry".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            persistence_enabled: true,
            bus: BusConfig::default(),
            telemetry: TelemetryConfig::default(),
            registry: RegistryConfig::default(),
            correlation: CorrelationConfig::default(),
            pipeline: PipelineConfig::default(),
            missions: MissionConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("flowsentry"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Capacity of the live stream channel
    pub stream_capacity: usize,

    /// Heartbeat tick interval in seconds
    pub heartbeat_interval_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            stream_capacity: 256,
            heartbeat_interval_secs: 5,
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Generator cadence in seconds
    pub generator_interval_secs: u64,

    /// Retained telemetry samples
    pub history_capacity: usize,

    /// Retained anomalies (tunable per detector instance)
    pub anomaly_capacity: usize,

    /// Rolling window size in samples
    pub window: usize,

    /// Minimum retained samples before detection runs
    pub min_samples: usize,

    /// Asset id carried on anomaly events
    pub asset_id: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            generator_interval_secs: 5,
            history_capacity: 100,
            anomaly_capacity: 500,
            window: 10,
            min_samples: 3,
            asset_id: "flow-system".to_string(),
        }
    }
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Per-node telemetry feed cadence in seconds
    pub telemetry_interval_secs: u64,

    /// Heartbeat monitor cadence in seconds
    pub monitor_interval_secs: u64,

    /// Silence threshold before a node is marked offline
    pub offline_after_secs: u64,

    /// Command ack delay bounds in milliseconds
    pub ack_delay_min_ms: u64,
    pub ack_delay_max_ms: u64,

    /// Retained command result records
    pub command_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            telemetry_interval_secs: 5,
            monitor_interval_secs: 30,
            offline_after_secs: 60,
            ack_delay_min_ms: 500,
            ack_delay_max_ms: 2500,
            command_capacity: 100,
        }
    }
}

/// Correlation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Correlation window in seconds
    pub window_secs: u64,

    /// Default window for recent-incident listings in hours
    pub recent_window_hours: i64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_secs: 120,
            recent_window_hours: 24,
        }
    }
}

/// Pipeline leak monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Leak check cadence in seconds
    pub check_interval_secs: u64,

    /// Probability of a simulated leak per check
    pub leak_probability: f64,

    /// Retained leak records
    pub history_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 10,
            leak_probability: 0.1,
            history_capacity: 100,
        }
    }
}

/// Mission playback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionConfig {
    /// Playback speed bounds; out-of-range requests are clamped
    pub min_speed: f64,
    pub max_speed: f64,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            min_speed: 0.1,
            max_speed: 10.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_cadences() {
        let config = Config::default();
        assert_eq!(config.bus.heartbeat_interval_secs, 5);
        assert_eq!(config.telemetry.window, 10);
        assert_eq!(config.telemetry.history_capacity, 100);
        assert_eq!(config.registry.offline_after_secs, 60);
        assert_eq!(config.correlation.window_secs, 120);
        assert_eq!(config.missions.max_speed, 10.0);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.telemetry.anomaly_capacity, config.telemetry.anomaly_capacity);
        assert_eq!(parsed.registry.ack_delay_max_ms, 2500);
    }
}

// Copyright (c) 2026 flowsentry
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/flowsentry/flowsentry

//! Telemetry sources - simulated baseline generator and the trait seam

use async_trait::async_trait;
use rand::prelude::*;

use super::TelemetrySample;

/// Baseline operating point the generator hovers around.
pub const BASELINE_FLOW_LPM: f64 = 150.0;
pub const BASELINE_PRESSURE_PA: f64 = 2_500_000.0;
pub const BASELINE_TEMPERATURE_C: f64 = 45.0;

/// A source of telemetry samples.
///
/// The engine drives one sampler per generation loop; simulated and
/// hardware-fed implementations are interchangeable behind this seam.
#[async_trait]
pub trait Sampler: Send + Sync {
    /// Source identifier, used as the asset id on emitted events.
    fn id(&self) -> &str;

    /// Produce the next sample.
    async fn sample(&mut self) -> TelemetrySample;
}

/// Produces noisy samples around the fixed baseline.
///
/// Noise bands and floors match the monitored plant's nominal envelope:
/// flow stays above 100 L/min, pressure above 2.3 MPa, temperature above
/// 20 C.
pub struct BaselineSampler {
    id: String,
    rng: StdRng,
}

impl BaselineSampler {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            rng: StdRng::from_entropy(),
        }
    }

    fn generate(&mut self) -> TelemetrySample {
        let flow = BASELINE_FLOW_LPM + self.rng.gen_range(-5.0..5.0);
        let pressure = BASELINE_PRESSURE_PA + self.rng.gen_range(-25_000.0..25_000.0);
        let temperature = BASELINE_TEMPERATURE_C + self.rng.gen_range(-1.5..1.5);

        TelemetrySample::new(
            flow.max(100.0),
            pressure.max(2_300_000.0),
            temperature.max(20.0),
        )
    }
}

#[async_trait]
impl Sampler for BaselineSampler {
    fn id(&self) -> &str {
        &self.id
    }

    async fn sample(&mut self) -> TelemetrySample {
        self.generate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generated_samples_stay_in_envelope() {
        let mut sampler = BaselineSampler::new("flow-system");

        for _ in 0..50 {
            let s = sampler.sample().await;
            assert!(s.flow_rate_lpm >= 100.0);
            assert!((s.flow_rate_lpm - BASELINE_FLOW_LPM).abs() <= 5.0);
            assert!(s.pressure_pa >= 2_300_000.0);
            assert!(s.temperature_c >= 20.0);
        }
    }
}

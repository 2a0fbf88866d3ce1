use anyhow::Context;
use sensor_drivers::DriverConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Retry schedule for bringing the barometer back during recalibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff_ms: 100,
            max_backoff_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, doubling from the initial backoff up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

/// LTR390 interrupt window programmed at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub low: u32,
    pub high: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { low: 5, high: 20 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub publish_interval_ms: u64,
    pub light_interval_ms: u64,
    pub baro_interval_ms: u64,
    /// When set, the formaldehyde sensor runs in query mode and is asked this often.
    pub formaldehyde_query_interval_ms: Option<u64>,
    pub poll_timeout_ms: u64,
    pub calibration_retry: RetryPolicy,
    pub thresholds: Thresholds,
    pub uv: DriverConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            publish_interval_ms: 5000,
            light_interval_ms: 1000,
            baro_interval_ms: 30_000,
            formaldehyde_query_interval_ms: None,
            poll_timeout_ms: 5000,
            calibration_retry: RetryPolicy::default(),
            thresholds: Thresholds::default(),
            uv: DriverConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    pub fn light_interval(&self) -> Duration {
        Duration::from_millis(self.light_interval_ms)
    }

    pub fn baro_interval(&self) -> Duration {
        Duration::from_millis(self.baro_interval_ms)
    }

    pub fn formaldehyde_query_interval(&self) -> Option<Duration> {
        self.formaldehyde_query_interval_ms.map(Duration::from_millis)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

pub fn load_config_file(path: impl AsRef<Path>) -> anyhow::Result<PipelineConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config: {}", path.display()))?;
    let cfg: PipelineConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing yaml: {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensor_drivers::{Gain, MeasurementRate, Resolution};

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = r#"
publish_interval_ms: 1000
uv:
  gain: 3
  resolution: "18"
  rate: 100ms
  wfac: 1.5
calibration_retry:
  max_attempts: 3
"#;
        let cfg: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.publish_interval(), Duration::from_secs(1));
        assert_eq!(cfg.light_interval_ms, 1000);
        assert_eq!(cfg.uv.gain, Gain::X3);
        assert_eq!(cfg.uv.resolution, Resolution::Bits18);
        assert_eq!(cfg.uv.rate, MeasurementRate::Ms100);
        assert_eq!(cfg.uv.wfac, 1.5);
        assert_eq!(cfg.uv.sensitivity_max, 2300.0);
        assert_eq!(cfg.calibration_retry.max_attempts, 3);
        assert_eq!(cfg.calibration_retry.initial_backoff_ms, 100);
        assert_eq!(cfg.thresholds, Thresholds { low: 5, high: 20 });
    }

    #[test]
    fn unknown_uv_label_fails_to_load() {
        let yaml = "uv:\n  gain: 4\n";
        assert!(serde_yaml::from_str::<PipelineConfig>(yaml).is_err());
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let p = RetryPolicy::default();
        let steps: Vec<u64> = (1..=7).map(|a| p.backoff(a).as_millis() as u64).collect();
        assert_eq!(steps, vec![100, 200, 400, 800, 1600, 2000, 2000]);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = load_config_file("/nonexistent/sensord.yaml").unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }
}

use super::{Gain, MeasurementRate, Resolution};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Live measurement parameters of the UV/light driver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub gain: Gain,
    pub resolution: Resolution,
    pub rate: MeasurementRate,
    /// Window factor applied to both channels, 1.0 for an uncovered sensor.
    pub wfac: f64,
    pub sensitivity_max: f64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            gain: Gain::X18,
            resolution: Resolution::Bits20,
            rate: MeasurementRate::Ms500,
            wfac: 1.0,
            sensitivity_max: 2300.0,
        }
    }
}

/// Shared handle to a driver's [`DriverConfig`].
///
/// Writers replace individual fields; the driver takes one whole-struct snapshot per
/// poll cycle, so a cycle never mixes old and new values.
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<Mutex<DriverConfig>>,
}

impl ConfigHandle {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(config)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DriverConfig> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> DriverConfig {
        *self.lock()
    }

    pub fn update(&self, f: impl FnOnce(&mut DriverConfig)) {
        f(&mut self.lock());
    }

    pub fn set_gain(&self, gain: Gain) {
        self.update(|c| c.gain = gain);
    }

    pub fn set_resolution(&self, resolution: Resolution) {
        self.update(|c| c.resolution = resolution);
    }

    pub fn set_rate(&self, rate: MeasurementRate) {
        self.update(|c| c.rate = rate);
    }

    pub fn set_wfac(&self, wfac: f64) {
        self.update(|c| c.wfac = wfac);
    }

    pub fn set_sensitivity_max(&self, sensitivity_max: f64) {
        self.update(|c| c.sensitivity_max = sensitivity_max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let a = ConfigHandle::default();
        let b = a.clone();
        b.set_gain(Gain::X3);
        b.set_wfac(1.25);
        let snap = a.snapshot();
        assert_eq!(snap.gain, Gain::X3);
        assert_eq!(snap.wfac, 1.25);
        assert_eq!(snap.resolution, Resolution::Bits20);
    }

    #[test]
    fn snapshot_is_detached() {
        let handle = ConfigHandle::default();
        let before = handle.snapshot();
        handle.set_rate(MeasurementRate::Ms25);
        assert_eq!(before.rate, MeasurementRate::Ms500);
    }
}

use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};

/// Metric names published by the drivers in this crate.
pub mod metric {
    pub const CO2: &str = "co2";
    pub const CH2O: &str = "ch2o";
    pub const CH2O_MG: &str = "ch2o_mg";
    pub const VOC: &str = "voc";
    pub const PM25: &str = "pm25";
    pub const PM10: &str = "pm10";
    pub const TEMPERATURE: &str = "temperature";
    pub const HUMIDITY: &str = "humidity";
    pub const LIGHT: &str = "light";
    pub const UV: &str = "uv";
    pub const UVS_GAIN: &str = "uvs_gain";
    pub const UVS_RESOLUTION: &str = "uvs_resolution";
    pub const UVS_RATE: &str = "uvs_rate";
    pub const WFAC: &str = "Wfac";
    pub const PRESSURE: &str = "pressure";
    pub const ALTITUDE: &str = "altitude";
    pub const BARO_TEMPERATURE: &str = "baro_temperature";
}

/// One decode or poll cycle worth of values, keyed by metric name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reading {
    values: BTreeMap<String, f64>,
}

impl Reading {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, metric: impl Into<String>, value: f64) -> Self {
        self.insert(metric, value);
        self
    }

    pub fn insert(&mut self, metric: impl Into<String>, value: f64) {
        self.values.insert(metric.into(), value);
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Fold another reading into this one. Keys present in both take `other`'s value.
    pub fn extend(&mut self, other: Reading) {
        self.values.extend(other.values);
    }
}

impl IntoIterator for Reading {
    type Item = (String, f64);
    type IntoIter = btree_map::IntoIter<String, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl FromIterator<(String, f64)> for Reading {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

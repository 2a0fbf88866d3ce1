//! Inbound configuration commands.
//!
//! A command is a JSON object carrying any subset of the recognised keys. Enum
//! selectors accept their label as a string or a bare number; an unrecognised label
//! fails the whole message. Keys that are not recognised are ignored.

use crate::CommandError;
use sensor_drivers::{Gain, MeasurementRate, Resolution};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Command {
    pub uvs_resolution: Option<Resolution>,
    pub uvs_rate: Option<MeasurementRate>,
    pub uvs_gain: Option<Gain>,
    #[serde(rename = "Wfac")]
    pub wfac: Option<f64>,
    pub uvs_sensitivity_max: Option<f64>,
    /// Known altitude in metres. Triggers barometer re-initialisation and calibration.
    pub altitude: Option<f64>,
    #[serde(default, deserialize_with = "flag")]
    pub reset: bool,
    #[serde(default, deserialize_with = "flag")]
    pub verify: bool,
    pub file: Option<String>,
    pub content: Option<String>,
    pub url: Option<String>,
    pub bin: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub ota: bool,
}

/// Trigger keys are set by any value except `false`, `0` and `null`.
fn flag<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_f64().map_or(true, |v| v != 0.0),
        Some(_) => true,
    })
}

/// Side effects handed to the maintenance collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaintenanceAction {
    Restart,
    VerifyFile { file: String },
    WriteFile { file: String, content: String },
    DownloadFile { file: String, url: String },
    WriteBinary { file: String, data: String },
    FirmwareUpdate { url: String },
}

impl Command {
    pub fn parse(raw: &[u8]) -> Result<Self, CommandError> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// True when no recognised key was present.
    pub fn is_empty(&self) -> bool {
        self == &Command::default()
    }

    /// Maintenance requests in the order they should run. Restart always comes last.
    pub fn maintenance_actions(&self) -> Vec<MaintenanceAction> {
        let mut out = Vec::new();
        if let Some(file) = &self.file {
            if self.verify {
                out.push(MaintenanceAction::VerifyFile { file: file.clone() });
            }
            if let Some(content) = &self.content {
                out.push(MaintenanceAction::WriteFile {
                    file: file.clone(),
                    content: content.clone(),
                });
            }
            if let Some(data) = &self.bin {
                out.push(MaintenanceAction::WriteBinary {
                    file: file.clone(),
                    data: data.clone(),
                });
            }
            if let (Some(url), false) = (&self.url, self.ota) {
                out.push(MaintenanceAction::DownloadFile {
                    file: file.clone(),
                    url: url.clone(),
                });
            }
        }
        if let (true, Some(url)) = (self.ota, &self.url) {
            out.push(MaintenanceAction::FirmwareUpdate { url: url.clone() });
        }
        if self.reset {
            out.push(MaintenanceAction::Restart);
        }
        out
    }
}

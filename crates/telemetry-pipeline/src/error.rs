use sensor_drivers::DriverError;
use thiserror::Error;

pub type Result<T, E = PipelineError> = core::result::Result<T, E>;

/// Failures that stop a task, and with it the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("serial stream failed: {0}")]
    Stream(#[from] std::io::Error),
    #[error("task `{task}` failed: {source}")]
    TaskFailed {
        task: String,
        #[source]
        source: Box<PipelineError>,
    },
    #[error("task `{0}` panicked or was cancelled")]
    TaskAborted(String),
    #[error("metrics registry: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl PipelineError {
    /// Name of the task that failed, if the error came out of a running pipeline.
    pub fn task(&self) -> Option<&str> {
        match self {
            PipelineError::TaskFailed { task, .. } | PipelineError::TaskAborted(task) => {
                Some(task)
            }
            _ => None,
        }
    }
}

/// Per-message failures. Logged and dropped, never fatal.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("malformed command: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("no barometer attached")]
    NoBarometer,
    #[error("barometer did not come back after {attempts} attempts: {last}")]
    CalibrationExhausted { attempts: u32, last: DriverError },
    #[error("calibration failed: {0}")]
    Calibration(DriverError),
    #[error("maintenance action failed: {0}")]
    Maintenance(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("sink unavailable: {0}")]
pub struct SinkError(pub String);

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
use thiserror::Error;

pub type Result<T, E = BusError> = core::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("device 0x{0:02X} did not acknowledge")]
    Nack(u8),
    #[error("bus arbitration lost")]
    ArbitrationLoss,
    #[error("port not found: {0}")]
    PortNotFound(String),
    #[error("operation not supported on this backend: {0}")]
    Unsupported(&'static str),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("timeout")]
    Timeout,
}

impl embedded_hal::i2c::Error for BusError {
    fn kind(&self) -> ErrorKind {
        match self {
            BusError::Nack(_) => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            BusError::ArbitrationLoss => ErrorKind::ArbitrationLoss,
            _ => ErrorKind::Other,
        }
    }
}

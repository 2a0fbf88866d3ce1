use crate::ltr390::Resolution;
use embedded_hal::i2c::ErrorKind;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = DriverError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DriverError {
    /// Bus transfer failed. The register space can no longer be trusted.
    #[error("bus error: {0:?}")]
    Bus(ErrorKind),
    #[error("data-ready bit not set within {0:?}")]
    DataReadyTimeout(Duration),
    #[error("no integration multiplier defined for resolution {0:?}")]
    UnsupportedResolution(Resolution),
    #[error("register 0x{register:02X} holds unexpected value 0x{value:02X}")]
    UnexpectedRegister { register: u8, value: u8 },
    #[error("{0} used before init")]
    NotInitialised(&'static str),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    pub(crate) fn bus<E: embedded_hal::i2c::Error>(err: E) -> Self {
        DriverError::Bus(err.kind())
    }
}

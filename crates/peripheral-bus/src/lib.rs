//! peripheral-bus: bus and pin abstractions for onboard sensor peripherals
//!
//! Register peripherals are driven through `embedded_hal_async::i2c::I2c`; this crate
//! supplies the error type those drivers see, the GPIO pair used by echo ranging, and
//! feature-gated backends. The default build enables a `mock` backend so the
//! pipeline can run on any host without hardware.

mod types;
pub use types::{PortInfo, SerialSettings};

mod error;
pub use error::{BusError, Result};

mod traits;
pub use traits::EchoPin;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{I2cTransaction, MockEchoPin, MockI2c};

#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use serial::{list_ports, open_serial};

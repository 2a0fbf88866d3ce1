//! sensor-drivers: frame decoders and register drivers for the onboard sensors
//!
//! Stream peripherals (the air-quality module and the formaldehyde sensor) are
//! decoded from fixed-length checksummed frames. Register peripherals (LTR390 and
//! BMP280) are driven over any `embedded_hal_async::i2c::I2c` bus. Every driver
//! produces a [`Reading`], a flat metric-name to value map.

mod error;
pub use error::{DriverError, Result};

mod reading;
pub use reading::{metric, Reading};

pub mod frame;
pub use frame::{
    AirQualityFrame, DecodeStats, FormaldehydeControl, FormaldehydeFrame, FormaldehydeMode,
    FrameDecoder, FrameError, FrameFormat,
};

pub mod ltr390;
pub use ltr390::{ConfigHandle, DriverConfig, Gain, LightKind, Ltr390, MeasurementRate, Resolution};

pub mod bmp280;
pub use bmp280::{Bmp280, Calibration as Bmp280Calibration};

mod ranging;
pub use ranging::{HcSr04, SPEED_OF_SOUND_M_S};

//! LTR390 ambient light / UV sensor.
//!
//! The driver owns the bus; runtime reconfiguration goes through a shared
//! [`ConfigHandle`] that the driver snapshots at the start of every poll cycle and
//! programs into the device before measuring.

mod config;
pub use config::{ConfigHandle, DriverConfig};

mod driver;
pub use driver::{scale, Ltr390};

mod settings;
pub use settings::{Gain, LightKind, MeasurementRate, Resolution};

pub const ADDRESS: u8 = 0x53;
pub const PART_ID: u8 = 0xB2;

pub(crate) mod reg {
    pub const MAIN_CTRL: u8 = 0x00;
    pub const MEAS_RATE: u8 = 0x04;
    pub const GAIN: u8 = 0x05;
    pub const PART_ID: u8 = 0x06;
    pub const MAIN_STATUS: u8 = 0x07;
    pub const ALS_DATA: u8 = 0x0D;
    pub const UVS_DATA: u8 = 0x10;
    pub const INT_CFG: u8 = 0x19;
    pub const THRESH_UP: u8 = 0x21;
    pub const THRESH_LOW: u8 = 0x24;

    pub const STATUS_DATA_READY: u8 = 0x08;
}

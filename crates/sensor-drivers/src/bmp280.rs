//! BMP280 barometric pressure sensor.

use crate::{metric, DriverError, Reading, Result};
use embedded_hal_async::i2c::I2c;
use std::time::Duration;
use tokio::time::sleep;

pub const DEFAULT_ADDRESS: u8 = 0x76;
pub const CHIP_ID: u8 = 0x58;
pub const STANDARD_SEA_LEVEL_PA: f64 = 101_325.0;

const REG_CALIB: u8 = 0x88;
const REG_CHIP_ID: u8 = 0xD0;
const REG_RESET: u8 = 0xE0;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_CONFIG: u8 = 0xF5;
const REG_PRESS: u8 = 0xF7;

const RESET_WORD: u8 = 0xB6;
// Standby 1000 ms, IIR filter x4.
const CONFIG: u8 = 0b101 << 5 | 0b010 << 2;
// Temperature x2, pressure x16, normal mode.
const CTRL_MEAS: u8 = 0b010 << 5 | 0b101 << 2 | 0b11;
const STARTUP: Duration = Duration::from_millis(10);

/// Factory trim values from registers 0x88..0xA0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub t1: u16,
    pub t2: i16,
    pub t3: i16,
    pub p1: u16,
    pub p2: i16,
    pub p3: i16,
    pub p4: i16,
    pub p5: i16,
    pub p6: i16,
    pub p7: i16,
    pub p8: i16,
    pub p9: i16,
}

impl Calibration {
    pub fn parse(raw: &[u8; 24]) -> Self {
        let u = |i: usize| u16::from_le_bytes([raw[i], raw[i + 1]]);
        let s = |i: usize| i16::from_le_bytes([raw[i], raw[i + 1]]);
        Self {
            t1: u(0),
            t2: s(2),
            t3: s(4),
            p1: u(6),
            p2: s(8),
            p3: s(10),
            p4: s(12),
            p5: s(14),
            p6: s(16),
            p7: s(18),
            p8: s(20),
            p9: s(22),
        }
    }

    /// Floating point compensation from the datasheet.
    ///
    /// Returns degrees Celsius and pascal. A zero `p1` yields zero pressure.
    pub fn compensate(&self, adc_t: i32, adc_p: i32) -> (f64, f64) {
        let adc_t = f64::from(adc_t);
        let t1 = f64::from(self.t1);
        let var1 = (adc_t / 16384.0 - t1 / 1024.0) * f64::from(self.t2);
        let d = adc_t / 131_072.0 - t1 / 8192.0;
        let var2 = d * d * f64::from(self.t3);
        let t_fine = var1 + var2;
        let temperature = t_fine / 5120.0;

        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * f64::from(self.p6) / 32768.0;
        var2 += var1 * f64::from(self.p5) * 2.0;
        var2 = var2 / 4.0 + f64::from(self.p4) * 65536.0;
        var1 = (f64::from(self.p3) * var1 * var1 / 524_288.0 + f64::from(self.p2) * var1)
            / 524_288.0;
        var1 = (1.0 + var1 / 32768.0) * f64::from(self.p1);
        if var1 == 0.0 {
            return (temperature, 0.0);
        }
        let mut p = 1_048_576.0 - f64::from(adc_p);
        p = (p - var2 / 4096.0) * 6250.0 / var1;
        let var1 = f64::from(self.p9) * p * p / 2_147_483_648.0;
        let var2 = p * f64::from(self.p8) / 32768.0;
        p += (var1 + var2 + f64::from(self.p7)) / 16.0;
        (temperature, p)
    }
}

/// Barometric altitude for `pressure_pa` given the sea-level reference.
pub fn altitude(pressure_pa: f64, sea_level_pa: f64) -> f64 {
    44330.0 * (1.0 - (pressure_pa / sea_level_pa).powf(1.0 / 5.255))
}

/// Sea-level pressure that places `pressure_pa` at `altitude_m`.
pub fn sea_level_for(pressure_pa: f64, altitude_m: f64) -> f64 {
    pressure_pa / (1.0 - altitude_m / 44330.0).powf(5.255)
}

pub struct Bmp280<I> {
    i2c: I,
    address: u8,
    calibration: Option<Calibration>,
    sea_level_pa: f64,
}

impl<I: I2c> Bmp280<I> {
    pub fn new(i2c: I) -> Self {
        Self {
            i2c,
            address: DEFAULT_ADDRESS,
            calibration: None,
            sea_level_pa: STANDARD_SEA_LEVEL_PA,
        }
    }

    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    pub fn sea_level_pa(&self) -> f64 {
        self.sea_level_pa
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    async fn write_reg(&mut self, register: u8, value: u8) -> Result<()> {
        self.i2c
            .write(self.address, &[register, value])
            .await
            .map_err(DriverError::bus)
    }

    async fn read_regs<const N: usize>(&mut self, register: u8) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.i2c
            .write_read(self.address, &[register], &mut buf)
            .await
            .map_err(DriverError::bus)?;
        Ok(buf)
    }

    /// Soft reset, load trim values and start continuous conversion.
    ///
    /// Safe to call again on a running device.
    pub async fn init(&mut self) -> Result<()> {
        let [id] = self.read_regs::<1>(REG_CHIP_ID).await?;
        if id != CHIP_ID {
            tracing::warn!(chip_id = format_args!("0x{id:02X}"), "unexpected BMP280 chip id");
        }
        self.write_reg(REG_RESET, RESET_WORD).await?;
        sleep(STARTUP).await;
        let raw = self.read_regs::<24>(REG_CALIB).await?;
        self.calibration = Some(Calibration::parse(&raw));
        self.write_reg(REG_CONFIG, CONFIG).await?;
        self.write_reg(REG_CTRL_MEAS, CTRL_MEAS).await?;
        tracing::debug!(address = self.address, "BMP280 initialised");
        Ok(())
    }

    /// Temperature in degrees Celsius and pressure in pascal.
    pub async fn sample(&mut self) -> Result<(f64, f64)> {
        let cal = self.calibration.ok_or(DriverError::NotInitialised("BMP280"))?;
        let [pm, pl, px, tm, tl, tx] = self.read_regs::<6>(REG_PRESS).await?;
        let adc = |m: u8, l: u8, x: u8| i32::from(m) << 12 | i32::from(l) << 4 | i32::from(x) >> 4;
        Ok(cal.compensate(adc(tm, tl, tx), adc(pm, pl, px)))
    }

    pub async fn measure(&mut self) -> Result<Reading> {
        let (temperature, pressure) = self.sample().await?;
        Ok(Reading::new()
            .with(metric::PRESSURE, pressure / 100.0)
            .with(metric::ALTITUDE, altitude(pressure, self.sea_level_pa))
            .with(metric::BARO_TEMPERATURE, temperature))
    }

    /// Re-anchor the altitude reference so the current pressure reads as `altitude_m`.
    pub async fn calibrate(&mut self, altitude_m: f64) -> Result<f64> {
        let (_, pressure) = self.sample().await?;
        self.sea_level_pa = sea_level_for(pressure, altitude_m);
        tracing::info!(
            altitude_m,
            sea_level_pa = self.sea_level_pa,
            "barometer calibrated"
        );
        Ok(self.sea_level_pa)
    }
}

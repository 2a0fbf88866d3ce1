use super::{be_u16, check_len, FrameError, FrameFormat};
use crate::{metric, Reading};

/// Seven-in-one air-quality module frame (17 bytes, `3C 02` header).
///
/// | offset | field |
/// |---|---|
/// | 2..4 | CO2 ppm |
/// | 4..6 | CH2O ug/m3 |
/// | 6..8 | TVOC ug/m3 |
/// | 8..10 | PM2.5 |
/// | 10..12 | PM10 |
/// | 12, 13 | temperature, sign in bit 7, tenths in 13 |
/// | 14, 15 | humidity, tenths in 15 |
/// | 16 | sum of bytes 0..16, low 8 bits |
#[derive(Debug, Clone, Copy, Default)]
pub struct AirQualityFrame;

impl AirQualityFrame {
    pub const HEADER: [u8; 2] = [0x3C, 0x02];

    pub fn checksum(bytes: &[u8]) -> u8 {
        bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
    }
}

fn signed_tenths(whole: u8, tenths: u8) -> f64 {
    let magnitude = f64::from(whole & 0x7F) + f64::from(tenths) / 10.0;
    if whole & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

impl FrameFormat for AirQualityFrame {
    const LEN: usize = 17;
    const NAME: &'static str = "air-quality";

    fn decode(&self, f: &[u8]) -> Result<Reading, FrameError> {
        check_len(f, Self::LEN)?;
        if f[0] != Self::HEADER[0] {
            return Err(FrameError::BadHeader(f[0]));
        }
        if f[1] != Self::HEADER[1] {
            return Err(FrameError::BadHeader(f[1]));
        }
        let computed = Self::checksum(&f[..16]);
        if computed != f[16] {
            return Err(FrameError::BadChecksum {
                computed,
                carried: f[16],
            });
        }
        Ok(Reading::new()
            .with(metric::CO2, f64::from(be_u16(f, 2)))
            .with(metric::CH2O, f64::from(be_u16(f, 4)))
            .with(metric::VOC, f64::from(be_u16(f, 6)))
            .with(metric::PM25, f64::from(be_u16(f, 8)))
            .with(metric::PM10, f64::from(be_u16(f, 10)))
            .with(metric::TEMPERATURE, signed_tenths(f[12], f[13]))
            .with(
                metric::HUMIDITY,
                f64::from(f[14]) + f64::from(f[15]) / 10.0,
            ))
    }
}

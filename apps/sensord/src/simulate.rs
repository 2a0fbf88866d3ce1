//! Simulated peripherals so the daemon runs on a host without the sensor board.

use peripheral_bus::MockI2c;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sensor_drivers::{AirQualityFrame, FormaldehydeFrame};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream};

const LTR390: u8 = 0x53;
const BMP280: u8 = 0x76;
const TICK: Duration = Duration::from_secs(1);

/// Datasheet trim block of the BMP280 at 0x88.
const BMP280_TRIM: [u8; 24] = [
    0x70, 0x6B, 0x43, 0x67, 0x18, 0xFC, 0x7D, 0x8E, 0x43, 0xD6, 0xD0, 0x0B, 0x27, 0x0B, 0x8C,
    0x00, 0xF9, 0xFF, 0x8C, 0x3C, 0xF8, 0xC6, 0x70, 0x17,
];
const BMP280_ADC_P: i32 = 415_148;
const BMP280_ADC_T: i32 = 519_888;

pub struct Board {
    i2c: MockI2c,
    rng: StdRng,
    air_quality: Option<DuplexStream>,
    formaldehyde: Option<DuplexStream>,
    /// Every this-many-th air-quality frame goes out with a bad checksum.
    corrupt_every: u32,
    frames_sent: u32,
}

impl Board {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let i2c = MockI2c::new();
        i2c.set_register(LTR390, 0x06, 0xB2);
        i2c.set_register(LTR390, 0x07, 0x08);
        i2c.set_register(BMP280, 0xD0, 0x58);
        i2c.set_registers(BMP280, 0x88, &BMP280_TRIM);
        let mut board = Self {
            i2c,
            rng,
            air_quality: None,
            formaldehyde: None,
            corrupt_every: 20,
            frames_sent: 0,
        };
        board.update_registers();
        board
    }

    /// Shared handle on the simulated I2C bus.
    pub fn i2c(&self) -> MockI2c {
        self.i2c.clone()
    }

    /// Byte stream carrying synthetic air-quality frames.
    pub fn air_quality_port(&mut self) -> DuplexStream {
        let (device, host) = tokio::io::duplex(256);
        self.air_quality = Some(device);
        host
    }

    /// Byte stream carrying synthetic active-mode formaldehyde frames.
    pub fn formaldehyde_port(&mut self) -> DuplexStream {
        let (device, host) = tokio::io::duplex(256);
        self.formaldehyde = Some(device);
        host
    }

    fn update_registers(&mut self) {
        let uv: u32 = self.rng.gen_range(0..4_000);
        let als: u32 = self.rng.gen_range(200..3_000);
        self.i2c.set_registers(LTR390, 0x0D, &le24(als));
        self.i2c.set_registers(LTR390, 0x10, &le24(uv));

        let adc_p = BMP280_ADC_P + self.rng.gen_range(-300..300);
        let adc_t = BMP280_ADC_T + self.rng.gen_range(-500..500);
        let mut raw = [0u8; 6];
        raw[..3].copy_from_slice(&adc20(adc_p));
        raw[3..].copy_from_slice(&adc20(adc_t));
        self.i2c.set_registers(BMP280, 0xF7, &raw);
        // The mock keeps every transfer; nothing here reads the log.
        self.i2c.clear_transactions();
    }

    fn air_quality_frame(&mut self) -> [u8; 17] {
        let mut f = [0u8; 17];
        f[..2].copy_from_slice(&AirQualityFrame::HEADER);
        let fields: [u16; 5] = [
            self.rng.gen_range(400..1_200),
            self.rng.gen_range(0..60),
            self.rng.gen_range(0..300),
            self.rng.gen_range(0..40),
            self.rng.gen_range(0..60),
        ];
        for (i, v) in fields.iter().enumerate() {
            f[2 + 2 * i..4 + 2 * i].copy_from_slice(&v.to_be_bytes());
        }
        f[12] = self.rng.gen_range(18..27);
        f[13] = self.rng.gen_range(0..10);
        f[14] = self.rng.gen_range(30..70);
        f[15] = self.rng.gen_range(0..10);
        f[16] = AirQualityFrame::checksum(&f[..16]);
        self.frames_sent = self.frames_sent.wrapping_add(1);
        if self.corrupt_every > 0 && self.frames_sent % self.corrupt_every == 0 {
            f[16] = f[16].wrapping_add(1);
        }
        f
    }

    fn formaldehyde_frame(&mut self) -> [u8; 9] {
        let ppb: u16 = self.rng.gen_range(0..120);
        let mut f = [0xFF, 0x17, 0x04, 0x00, 0, 0, 0x07, 0xD0, 0];
        f[4..6].copy_from_slice(&ppb.to_be_bytes());
        f[8] = FormaldehydeFrame::checksum(&f[1..8]);
        f
    }

    /// Refresh register contents and push one frame per stream every second.
    ///
    /// Ends with an error once a host side of a stream is dropped.
    pub async fn run(mut self) -> telemetry_pipeline::Result<()> {
        tracing::info!(
            air_quality = self.air_quality.is_some(),
            formaldehyde = self.formaldehyde.is_some(),
            "simulated board running"
        );
        let mut ticker = tokio::time::interval(TICK);
        loop {
            ticker.tick().await;
            self.update_registers();
            if self.air_quality.is_some() {
                let frame = self.air_quality_frame();
                if let Some(port) = self.air_quality.as_mut() {
                    port.write_all(&frame).await?;
                }
            }
            if self.formaldehyde.is_some() {
                let frame = self.formaldehyde_frame();
                if let Some(port) = self.formaldehyde.as_mut() {
                    port.write_all(&frame).await?;
                }
            }
        }
    }
}

fn le24(v: u32) -> [u8; 3] {
    let b = v.to_le_bytes();
    [b[0], b[1], b[2] & 0x0F]
}

/// 20-bit ADC value as the MSB, LSB, XLSB register triple.
fn adc20(v: i32) -> [u8; 3] {
    [(v >> 12) as u8, (v >> 4) as u8, ((v << 4) & 0xF0) as u8]
}

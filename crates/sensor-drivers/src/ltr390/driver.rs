use super::{reg, ConfigHandle, DriverConfig, Gain, LightKind, MeasurementRate, Resolution};
use crate::{metric, DriverError, Reading, Result};
use embedded_hal_async::i2c::I2c;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const SETTLE: Duration = Duration::from_millis(50);
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Convert a raw 20-bit count into lux or UV index using one configuration snapshot.
pub fn scale(kind: LightKind, raw: u32, cfg: &DriverConfig) -> Result<f64> {
    let integration = cfg
        .resolution
        .integration_factor()
        .ok_or(DriverError::UnsupportedResolution(cfg.resolution))?;
    let gain = cfg.gain.multiplier();
    let raw = f64::from(raw);
    Ok(match kind {
        LightKind::Uv => {
            let sensitivity = cfg.sensitivity_max * gain / 18.0 * integration / 4.0;
            raw / sensitivity * cfg.wfac
        }
        LightKind::Ambient => 0.6 * raw / gain / integration * cfg.wfac,
    })
}

type Programmed = (Gain, Resolution, MeasurementRate);

pub struct Ltr390<I> {
    i2c: I,
    address: u8,
    config: ConfigHandle,
    programmed: Option<Programmed>,
    poll_timeout: Duration,
    poll_interval: Duration,
}

impl<I: I2c> Ltr390<I> {
    pub fn new(i2c: I, config: ConfigHandle) -> Self {
        Self {
            i2c,
            address: super::ADDRESS,
            config,
            programmed: None,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
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

    pub async fn part_id(&mut self) -> Result<u8> {
        Ok(self.read_regs::<1>(reg::PART_ID).await?[0])
    }

    /// Reset the device and program the current configuration.
    ///
    /// An unexpected part id is only logged; later silicon revisions report other ids.
    pub async fn init(&mut self) -> Result<()> {
        let id = self.part_id().await?;
        if id != super::PART_ID {
            tracing::warn!(
                part_id = format_args!("0x{id:02X}"),
                expected = format_args!("0x{:02X}", super::PART_ID),
                "unexpected LTR390 part id, continuing"
            );
        }
        self.write_reg(reg::MAIN_CTRL, 0x00).await?;
        sleep(SETTLE).await;
        self.select_mode(LightKind::Uv).await?;
        self.programmed = None;
        let cfg = self.config.snapshot();
        self.program(&cfg).await?;
        tracing::info!(
            gain = cfg.gain.label(),
            resolution = cfg.resolution.label(),
            rate = cfg.rate.label(),
            "LTR390 initialised"
        );
        Ok(())
    }

    async fn select_mode(&mut self, kind: LightKind) -> Result<()> {
        self.write_reg(reg::INT_CFG, kind.int_cfg()).await?;
        self.write_reg(reg::MAIN_CTRL, kind.mode()).await?;
        sleep(SETTLE).await;
        Ok(())
    }

    /// Write whichever of gain and MEAS_RATE differ from what the device holds.
    async fn program(&mut self, cfg: &DriverConfig) -> Result<()> {
        let previous = self.programmed;
        if previous.map(|p| p.0) != Some(cfg.gain) {
            self.write_reg(reg::GAIN, cfg.gain.code()).await?;
        }
        if previous.map(|p| (p.1, p.2)) != Some((cfg.resolution, cfg.rate)) {
            self.write_reg(reg::MEAS_RATE, cfg.resolution.code() | cfg.rate.code())
                .await?;
            sleep(SETTLE).await;
        }
        self.programmed = Some((cfg.gain, cfg.resolution, cfg.rate));
        Ok(())
    }

    async fn wait_data_ready(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.poll_timeout;
        loop {
            let [status] = self.read_regs::<1>(reg::MAIN_STATUS).await?;
            if status & reg::STATUS_DATA_READY != 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DriverError::DataReadyTimeout(self.poll_timeout));
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn read_with(&mut self, kind: LightKind, cfg: &DriverConfig) -> Result<f64> {
        self.select_mode(kind).await?;
        self.wait_data_ready().await?;
        let [b0, b1, b2] = self.read_regs::<3>(kind.data_register()).await?;
        let raw = u32::from_le_bytes([b0, b1, b2, 0]);
        scale(kind, raw, cfg)
    }

    /// One full poll cycle on a single channel.
    pub async fn read(&mut self, kind: LightKind) -> Result<f64> {
        let cfg = self.config.snapshot();
        self.program(&cfg).await?;
        self.read_with(kind, &cfg).await
    }

    /// Both channels plus the configuration they were measured with.
    pub async fn measure(&mut self) -> Result<Reading> {
        let cfg = self.config.snapshot();
        self.program(&cfg).await?;
        let light = self.read_with(LightKind::Ambient, &cfg).await?;
        let uv = self.read_with(LightKind::Uv, &cfg).await?;
        Ok(Reading::new()
            .with(metric::LIGHT, light)
            .with(metric::UV, uv)
            .with(metric::UVS_GAIN, cfg.gain.multiplier())
            .with(metric::UVS_RESOLUTION, f64::from(cfg.resolution.bits()))
            .with(metric::UVS_RATE, f64::from(cfg.rate.millis()))
            .with(metric::WFAC, cfg.wfac))
    }

    /// Program the gain now instead of on the next cycle.
    pub async fn set_gain(&mut self, gain: Gain) -> Result<()> {
        self.write_reg(reg::GAIN, gain.code()).await?;
        self.config.set_gain(gain);
        if let Some(p) = self.programmed.as_mut() {
            p.0 = gain;
        }
        Ok(())
    }

    pub async fn set_resolution_rate(
        &mut self,
        resolution: Resolution,
        rate: MeasurementRate,
    ) -> Result<()> {
        self.write_reg(reg::MEAS_RATE, resolution.code() | rate.code())
            .await?;
        sleep(SETTLE).await;
        self.config.update(|c| {
            c.resolution = resolution;
            c.rate = rate;
        });
        if let Some(p) = self.programmed.as_mut() {
            p.1 = resolution;
            p.2 = rate;
        }
        Ok(())
    }

    /// Interrupt thresholds, 20 bits each, little-endian across three registers.
    pub async fn set_threshold(&mut self, low: u32, high: u32) -> Result<()> {
        for (base, value) in [(reg::THRESH_UP, high), (reg::THRESH_LOW, low)] {
            let [b0, b1, b2, _] = value.to_le_bytes();
            self.write_reg(base, b0).await?;
            self.write_reg(base + 1, b1).await?;
            self.write_reg(base + 2, b2 & 0x0F).await?;
        }
        Ok(())
    }

    pub async fn gain(&mut self) -> Result<Gain> {
        let [code] = self.read_regs::<1>(reg::GAIN).await?;
        Gain::from_code(code & 0x07).ok_or(DriverError::UnexpectedRegister {
            register: reg::GAIN,
            value: code,
        })
    }

    pub async fn resolution_rate(&mut self) -> Result<(Resolution, MeasurementRate)> {
        let [code] = self.read_regs::<1>(reg::MEAS_RATE).await?;
        let unexpected = DriverError::UnexpectedRegister {
            register: reg::MEAS_RATE,
            value: code,
        };
        match (
            Resolution::from_code(code & 0x70),
            MeasurementRate::from_code(code & 0x07),
        ) {
            (Some(r), Some(m)) => Ok((r, m)),
            _ => Err(unexpected),
        }
    }

    pub fn release(self) -> I {
        self.i2c
    }
}

//! Producer tasks: one per peripheral, each merging its readings into the shared state.

use crate::{PipelineError, PipelineMetrics, Result, SensorState, Thresholds};
use async_trait::async_trait;
use embedded_hal_async::i2c::I2c;
use sensor_drivers::{
    AirQualityFrame, Bmp280, DecodeStats, DriverError, FormaldehydeControl, FormaldehydeFrame,
    FrameDecoder, FrameFormat, Ltr390, Reading,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Barometer shared between its producer and the command dispatcher.
pub type SharedBarometer<I> = Arc<tokio::sync::Mutex<Bmp280<I>>>;

#[async_trait(?Send)]
pub trait Producer {
    fn name(&self) -> &'static str;

    /// One acquisition. `Ok(None)` skips the cycle without merging.
    async fn acquire(&mut self) -> Result<Option<Reading>>;

    /// Pause after each cycle. Zero for peripherals that push their own data.
    fn pause(&self) -> Duration {
        Duration::ZERO
    }

    /// Cumulative frame counters for stream peripherals.
    fn frame_stats(&self) -> Option<DecodeStats> {
        None
    }
}

/// Drive `producer` until it fails. Only returns with the fatal error.
pub async fn run_producer<P: Producer>(
    mut producer: P,
    state: SensorState,
    metrics: PipelineMetrics,
) -> Result<()> {
    let name = producer.name();
    let mut seen = DecodeStats::default();
    tracing::info!(producer = name, "producer started");
    loop {
        let reading = producer.acquire().await;
        if let Some(stats) = producer.frame_stats() {
            metrics
                .frames_decoded
                .with_label_values(&[name])
                .inc_by(stats.decoded - seen.decoded);
            metrics
                .frames_dropped
                .with_label_values(&[name])
                .inc_by(stats.dropped - seen.dropped);
            seen = stats;
        }
        if let Some(reading) = reading? {
            let n = state.merge(reading);
            metrics.merges.with_label_values(&[name]).inc();
            tracing::debug!(producer = name, metrics = n, "reading merged");
        }
        let pause = producer.pause();
        if pause.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(pause).await;
        }
    }
}

async fn next_frame<R, F>(decoder: &mut FrameDecoder<R, F>) -> Result<Reading>
where
    R: AsyncRead + Unpin,
    F: FrameFormat,
{
    // The stream ending means the port is gone.
    Ok(decoder.next_reading().await?)
}

/// Air-quality module. Pushes a frame every second on its own.
pub struct AirQualityProducer<R> {
    decoder: FrameDecoder<R, AirQualityFrame>,
}

impl<R: AsyncRead + Unpin> AirQualityProducer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            decoder: FrameDecoder::new(reader, AirQualityFrame),
        }
    }
}

#[async_trait(?Send)]
impl<R: AsyncRead + Unpin> Producer for AirQualityProducer<R> {
    fn name(&self) -> &'static str {
        "air-quality"
    }

    async fn acquire(&mut self) -> Result<Option<Reading>> {
        next_frame(&mut self.decoder).await.map(Some)
    }

    fn frame_stats(&self) -> Option<DecodeStats> {
        Some(self.decoder.stats())
    }
}

/// Formaldehyde sensor in active mode, or in query mode with a request per cycle.
pub struct FormaldehydeProducer<R, W> {
    decoder: FrameDecoder<R, FormaldehydeFrame>,
    control: Option<(FormaldehydeControl<W>, Duration)>,
}

impl<R: AsyncRead + Unpin> FormaldehydeProducer<R, tokio::io::Sink> {
    /// Listen to the frames the sensor pushes by itself.
    pub fn active(reader: R) -> Self {
        Self {
            decoder: FrameDecoder::new(reader, FormaldehydeFrame::default()),
            control: None,
        }
    }
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> FormaldehydeProducer<R, W> {
    /// Switch the sensor to query mode and ask for a reading every `interval`.
    pub async fn query(reader: R, writer: W, interval: Duration) -> Result<Self> {
        let frame = FormaldehydeFrame::default();
        let mut control = FormaldehydeControl::new(writer, frame.clone());
        control.query_mode().await?;
        Ok(Self {
            decoder: FrameDecoder::new(reader, frame),
            control: Some((control, interval)),
        })
    }
}

#[async_trait(?Send)]
impl<R, W> Producer for FormaldehydeProducer<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    fn name(&self) -> &'static str {
        "formaldehyde"
    }

    async fn acquire(&mut self) -> Result<Option<Reading>> {
        if let Some((control, _)) = self.control.as_mut() {
            control.request().await?;
        }
        next_frame(&mut self.decoder).await.map(Some)
    }

    fn pause(&self) -> Duration {
        self.control
            .as_ref()
            .map_or(Duration::ZERO, |(_, interval)| *interval)
    }

    fn frame_stats(&self) -> Option<DecodeStats> {
        Some(self.decoder.stats())
    }
}

/// UV and ambient light, polled on a fixed interval.
pub struct LightProducer<I> {
    driver: Ltr390<I>,
    interval: Duration,
}

impl<I: I2c> LightProducer<I> {
    /// Bring the sensor up and program its interrupt thresholds.
    pub async fn start(
        mut driver: Ltr390<I>,
        thresholds: Thresholds,
        interval: Duration,
    ) -> Result<Self> {
        driver.init().await?;
        driver.set_threshold(thresholds.low, thresholds.high).await?;
        Ok(Self { driver, interval })
    }
}

#[async_trait(?Send)]
impl<I: I2c> Producer for LightProducer<I> {
    fn name(&self) -> &'static str {
        "light"
    }

    async fn acquire(&mut self) -> Result<Option<Reading>> {
        match self.driver.measure().await {
            Ok(reading) => Ok(Some(reading)),
            Err(DriverError::UnsupportedResolution(res)) => {
                tracing::warn!(resolution = res.label(), "no scale for resolution, cycle skipped");
                Ok(None)
            }
            Err(e) => Err(PipelineError::Driver(e)),
        }
    }

    fn pause(&self) -> Duration {
        self.interval
    }
}

pub struct BaroProducer<I> {
    baro: SharedBarometer<I>,
    interval: Duration,
}

impl<I: I2c> BaroProducer<I> {
    pub async fn start(baro: SharedBarometer<I>, interval: Duration) -> Result<Self> {
        baro.lock().await.init().await?;
        Ok(Self { baro, interval })
    }
}

#[async_trait(?Send)]
impl<I: I2c> Producer for BaroProducer<I> {
    fn name(&self) -> &'static str {
        "barometer"
    }

    async fn acquire(&mut self) -> Result<Option<Reading>> {
        Ok(Some(self.baro.lock().await.measure().await?))
    }

    fn pause(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peripheral_bus::MockI2c;
    use sensor_drivers::{metric, ConfigHandle, DriverConfig, Resolution};
    use tokio::io::AsyncWriteExt;

    fn air_frame(co2: u16) -> [u8; 17] {
        let mut f = [0u8; 17];
        f[0] = 0x3C;
        f[1] = 0x02;
        f[2..4].copy_from_slice(&co2.to_be_bytes());
        f[12] = 0x16;
        f[14] = 0x28;
        f[16] = AirQualityFrame::checksum(&f[..16]);
        f
    }

    fn light_bus() -> MockI2c {
        let bus = MockI2c::new();
        bus.set_register(0x53, 0x06, 0xB2);
        bus.set_register(0x53, 0x07, 0x08);
        bus.set_registers(0x53, 0x0D, &[0x08, 0x07, 0x00]);
        bus.set_registers(0x53, 0x10, &[0xFC, 0x08, 0x00]);
        bus
    }

    #[tokio::test]
    async fn air_quality_frames_merge_until_stream_ends() {
        let (mut tx, rx) = tokio::io::duplex(256);
        let state = SensorState::new();
        let metrics = PipelineMetrics::new().unwrap();

        tx.write_all(&air_frame(415)).await.unwrap();
        tx.write_all(&[0x55; 17]).await.unwrap();
        tx.write_all(&air_frame(420)).await.unwrap();
        drop(tx);

        let err = run_producer(AirQualityProducer::new(rx), state.clone(), metrics.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Stream(_)));
        assert_eq!(state.get(metric::CO2), Some(420.0));
        assert_eq!(state.get(metric::TEMPERATURE), Some(22.0));
        let labels = ["air-quality"];
        assert_eq!(metrics.frames_decoded.with_label_values(&labels).get(), 2);
        assert_eq!(metrics.frames_dropped.with_label_values(&labels).get(), 1);
        assert_eq!(metrics.merges.with_label_values(&labels).get(), 2);
    }

    #[tokio::test]
    async fn formaldehyde_query_mode_requests_each_cycle() {
        let mut reply = [0xFF, 0x86, 0x00, 0x10, 0x00, 0x00, 0x00, 0x0C, 0x00];
        reply[8] = FormaldehydeFrame::checksum(&reply[1..8]);
        let (mut sensor, host_rx) = tokio::io::duplex(64);
        sensor.write_all(&reply).await.unwrap();

        let mut producer =
            FormaldehydeProducer::query(host_rx, Vec::new(), Duration::from_secs(60))
                .await
                .unwrap();
        let r = producer.acquire().await.unwrap().unwrap();
        assert_eq!(r.get(metric::CH2O), Some(12.0));
        assert_eq!(r.get(metric::CH2O_MG), Some(16.0));
        assert_eq!(producer.pause(), Duration::from_secs(60));
        assert_eq!(producer.frame_stats().unwrap().decoded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn light_producer_programs_thresholds_and_measures() {
        let bus = light_bus();
        let driver = Ltr390::new(bus.clone(), ConfigHandle::default());
        let mut producer =
            LightProducer::start(driver, Thresholds::default(), Duration::from_secs(1))
                .await
                .unwrap();
        assert_eq!(bus.register(0x53, 0x21), Some(20));
        assert_eq!(bus.register(0x53, 0x24), Some(5));

        let r = producer.acquire().await.unwrap().unwrap();
        assert!((r.get(metric::UV).unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(r.get(metric::UVS_GAIN), Some(18.0));
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_resolution_skips_cycle() {
        let config = ConfigHandle::new(DriverConfig {
            resolution: Resolution::Bits13,
            ..DriverConfig::default()
        });
        let driver = Ltr390::new(light_bus(), config);
        let mut producer =
            LightProducer::start(driver, Thresholds::default(), Duration::from_secs(1))
                .await
                .unwrap();
        assert!(producer.acquire().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn bus_failure_is_fatal_to_light_producer() {
        let bus = light_bus();
        let driver = Ltr390::new(bus.clone(), ConfigHandle::default());
        let producer =
            LightProducer::start(driver, Thresholds::default(), Duration::from_millis(10))
                .await
                .unwrap();
        bus.set_fault(Some(peripheral_bus::BusError::Nack(0x53)));
        let err = run_producer(producer, SensorState::new(), PipelineMetrics::new().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Driver(DriverError::Bus(_))));
    }
}

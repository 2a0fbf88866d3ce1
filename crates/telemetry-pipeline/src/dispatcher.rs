use crate::producer::SharedBarometer;
use crate::{Command, CommandError, Maintenance, PipelineMetrics, RetryPolicy};
use embedded_hal_async::i2c::I2c;
use sensor_drivers::ConfigHandle;
use tokio::sync::mpsc;

/// Applies inbound commands to live driver settings.
///
/// Driver parameters are written into the shared [`ConfigHandle`]; the light producer
/// programs them into the device at the start of its next cycle.
pub struct CommandDispatcher<I, M> {
    uv: ConfigHandle,
    baro: Option<SharedBarometer<I>>,
    maintenance: M,
    retry: RetryPolicy,
    metrics: PipelineMetrics,
}

impl<I: I2c, M: Maintenance> CommandDispatcher<I, M> {
    pub fn new(uv: ConfigHandle, maintenance: M, metrics: PipelineMetrics) -> Self {
        Self {
            uv,
            baro: None,
            maintenance,
            retry: RetryPolicy::default(),
            metrics,
        }
    }

    pub fn with_barometer(mut self, baro: SharedBarometer<I>) -> Self {
        self.baro = Some(baro);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Decode and apply one message. Returns the keys whose effect took place.
    ///
    /// Only a decode failure is an error; failed side actions are logged and left
    /// out of the result while the remaining keys still apply.
    pub async fn handle(&self, raw: &[u8]) -> Result<Vec<&'static str>, CommandError> {
        let cmd = match Command::parse(raw) {
            Ok(cmd) => cmd,
            Err(e) => {
                self.metrics.commands_rejected.inc();
                return Err(e);
            }
        };
        let mut applied = Vec::new();

        if let Some(resolution) = cmd.uvs_resolution {
            self.uv.set_resolution(resolution);
            applied.push("uvs_resolution");
        }
        if let Some(rate) = cmd.uvs_rate {
            self.uv.set_rate(rate);
            applied.push("uvs_rate");
        }
        if let Some(wfac) = cmd.wfac {
            self.uv.set_wfac(wfac);
            applied.push("Wfac");
        }
        if let Some(sensitivity) = cmd.uvs_sensitivity_max {
            self.uv.set_sensitivity_max(sensitivity);
            applied.push("uvs_sensitivity_max");
        }
        if let Some(gain) = cmd.uvs_gain {
            self.uv.set_gain(gain);
            applied.push("uvs_gain");
        }
        if let Some(altitude) = cmd.altitude {
            match self.recalibrate(altitude).await {
                Ok(sea_level) => {
                    tracing::info!(altitude, sea_level, "barometer recalibrated");
                    applied.push("altitude");
                }
                Err(e) => tracing::warn!(altitude, error = %e, "recalibration failed"),
            }
        }
        for action in cmd.maintenance_actions() {
            let label = maintenance_label(&action);
            match self.maintenance.perform(action).await {
                Ok(()) => applied.push(label),
                Err(e) => tracing::warn!(action = label, error = %e, "maintenance failed"),
            }
        }

        if applied.is_empty() {
            tracing::debug!("command carried no recognised keys");
        } else {
            self.metrics.commands_applied.inc();
            tracing::info!(?applied, "command applied");
        }
        Ok(applied)
    }

    /// Re-initialise the barometer until it answers, then anchor it at `altitude`.
    async fn recalibrate(&self, altitude: f64) -> Result<f64, CommandError> {
        let baro = self.baro.as_ref().ok_or(CommandError::NoBarometer)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut dev = baro.lock().await;
            match dev.init().await {
                Ok(()) => {
                    return dev
                        .calibrate(altitude)
                        .await
                        .map_err(CommandError::Calibration)
                }
                Err(e) if attempt >= self.retry.max_attempts => {
                    return Err(CommandError::CalibrationExhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => {
                    drop(dev);
                    let backoff = self.retry.backoff(attempt);
                    tracing::debug!(attempt, ?backoff, error = %e, "barometer not ready, retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Consume commands until every sender is gone.
    pub async fn run(self, mut rx: mpsc::Receiver<Vec<u8>>) {
        tracing::info!("command dispatcher started");
        while let Some(raw) = rx.recv().await {
            if let Err(e) = self.handle(&raw).await {
                tracing::warn!(error = %e, "command dropped");
            }
        }
        tracing::info!("command channel closed");
    }
}

fn maintenance_label(action: &crate::MaintenanceAction) -> &'static str {
    use crate::MaintenanceAction::*;
    match action {
        Restart => "reset",
        VerifyFile { .. } => "verify",
        WriteFile { .. } => "content",
        DownloadFile { .. } => "url",
        WriteBinary { .. } => "bin",
        FirmwareUpdate { .. } => "ota",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MaintenanceAction;
    use async_trait::async_trait;
    use peripheral_bus::{BusError, MockI2c};
    use sensor_drivers::{Bmp280, Gain, MeasurementRate, Resolution};
    use std::cell::RefCell;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: RefCell<Vec<MaintenanceAction>>,
    }

    #[async_trait(?Send)]
    impl<'a> Maintenance for &'a Recorder {
        async fn perform(&self, action: MaintenanceAction) -> Result<(), CommandError> {
            if let MaintenanceAction::FirmwareUpdate { .. } = action {
                return Err(CommandError::Maintenance("no image slot".into()));
            }
            self.seen.borrow_mut().push(action);
            Ok(())
        }
    }

    fn baro_bus() -> MockI2c {
        let bus = MockI2c::new();
        bus.set_register(0x76, 0xD0, 0x58);
        // Datasheet trim values and raw sample.
        bus.set_registers(
            0x76,
            0x88,
            &[
                0x70, 0x6B, 0x43, 0x67, 0x18, 0xFC, 0x7D, 0x8E, 0x43, 0xD6, 0xD0, 0x0B, 0x27,
                0x0B, 0x8C, 0x00, 0xF9, 0xFF, 0x8C, 0x3C, 0xF8, 0xC6, 0x70, 0x17,
            ],
        );
        bus.set_registers(0x76, 0xF7, &[0x65, 0x5A, 0xC0, 0x7E, 0xED, 0x00]);
        bus
    }

    fn dispatcher<'a>(
        uv: &ConfigHandle,
        rec: &'a Recorder,
    ) -> CommandDispatcher<MockI2c, &'a Recorder> {
        CommandDispatcher::new(uv.clone(), rec, PipelineMetrics::new().unwrap())
    }

    #[tokio::test]
    async fn applies_driver_settings() {
        let uv = ConfigHandle::default();
        let rec = Recorder::default();
        let d = dispatcher(&uv, &rec);
        let applied = d
            .handle(br#"{"uvs_resolution":"18","uvs_rate":"100ms","uvs_gain":"3","Wfac":1.5,"uvs_sensitivity_max":1400}"#)
            .await
            .unwrap();
        assert_eq!(applied.len(), 5);
        let cfg = uv.snapshot();
        assert_eq!(cfg.resolution, Resolution::Bits18);
        assert_eq!(cfg.rate, MeasurementRate::Ms100);
        assert_eq!(cfg.gain, Gain::X3);
        assert_eq!(cfg.wfac, 1.5);
        assert_eq!(cfg.sensitivity_max, 1400.0);
        assert_eq!(d.metrics.commands_applied.get(), 1);
    }

    #[tokio::test]
    async fn rejected_message_changes_nothing() {
        let uv = ConfigHandle::default();
        let rec = Recorder::default();
        let d = dispatcher(&uv, &rec);
        let before = uv.snapshot();
        assert!(d.handle(br#"{"uvs_gain":"7","Wfac":9.0}"#).await.is_err());
        assert!(d.handle(b"\xff\xfe").await.is_err());
        assert_eq!(uv.snapshot(), before);
        assert_eq!(d.metrics.commands_rejected.get(), 2);
        assert_eq!(d.metrics.commands_applied.get(), 0);
    }

    #[tokio::test]
    async fn message_without_recognised_keys_counts_as_neither() {
        let uv = ConfigHandle::default();
        let rec = Recorder::default();
        let d = dispatcher(&uv, &rec);
        assert!(d.handle(br#"{"brightness":3}"#).await.unwrap().is_empty());
        assert_eq!(d.metrics.commands_applied.get(), 0);
        assert_eq!(d.metrics.commands_rejected.get(), 0);
    }

    #[tokio::test]
    async fn maintenance_is_delegated_and_failures_are_contained() {
        let uv = ConfigHandle::default();
        let rec = Recorder::default();
        let d = dispatcher(&uv, &rec);
        let applied = d
            .handle(br#"{"ota":1,"url":"http://fw","reset":true,"Wfac":2.0}"#)
            .await
            .unwrap();
        assert_eq!(applied, vec!["Wfac", "reset"]);
        assert_eq!(*rec.seen.borrow(), vec![MaintenanceAction::Restart]);
    }

    #[tokio::test]
    async fn altitude_without_barometer_is_not_fatal() {
        let uv = ConfigHandle::default();
        let rec = Recorder::default();
        let d = dispatcher(&uv, &rec);
        assert_eq!(d.handle(br#"{"altitude":100.0}"#).await.unwrap(), Vec::<&str>::new());
    }

    #[tokio::test(start_paused = true)]
    async fn calibration_retries_until_barometer_answers() {
        let bus = baro_bus();
        bus.set_fault(Some(BusError::Nack(0x76)));
        let baro = Arc::new(tokio::sync::Mutex::new(Bmp280::new(bus.clone())));
        let uv = ConfigHandle::default();
        let rec = Recorder::default();
        let d = dispatcher(&uv, &rec).with_barometer(baro.clone());

        let (applied, ()) = tokio::join!(d.handle(br#"{"altitude":250.0}"#), async {
            tokio::time::sleep(Duration::from_millis(250)).await;
            bus.set_fault(None);
        });
        assert_eq!(applied.unwrap(), vec!["altitude"]);

        let reading = baro.lock().await.measure().await.unwrap();
        let altitude = reading.get(sensor_drivers::metric::ALTITUDE).unwrap();
        assert!((altitude - 250.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn calibration_gives_up_after_policy_attempts() {
        let bus = baro_bus();
        bus.set_fault(Some(BusError::Nack(0x76)));
        let baro = Arc::new(tokio::sync::Mutex::new(Bmp280::new(bus.clone())));
        let uv = ConfigHandle::default();
        let rec = Recorder::default();
        let d = dispatcher(&uv, &rec)
            .with_barometer(baro)
            .with_retry(RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::default()
            });

        let start = tokio::time::Instant::now();
        let err = d.recalibrate(10.0).await.unwrap_err();
        assert!(matches!(
            err,
            CommandError::CalibrationExhausted { attempts: 3, .. }
        ));
        // Two backoffs: 100 ms then 200 ms.
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(300) && waited < Duration::from_millis(320));
    }

    #[tokio::test]
    async fn run_drains_channel_and_returns_when_closed() {
        let uv = ConfigHandle::default();
        let rec = Recorder::default();
        let d = dispatcher(&uv, &rec);
        let (tx, rx) = mpsc::channel(4);
        tx.send(br#"{"uvs_gain":"1"}"#.to_vec()).await.unwrap();
        tx.send(b"junk".to_vec()).await.unwrap();
        tx.send(br#"{"Wfac":3.0}"#.to_vec()).await.unwrap();
        drop(tx);
        d.run(rx).await;
        assert_eq!(uv.snapshot().gain, Gain::X1);
        assert_eq!(uv.snapshot().wfac, 3.0);
    }
}

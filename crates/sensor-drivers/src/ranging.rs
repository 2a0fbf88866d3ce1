use peripheral_bus::EchoPin;
use std::time::Duration;
use tokio::time::{sleep, Instant};

pub const SPEED_OF_SOUND_M_S: f64 = 340.0;

const TRIGGER_PULSE: Duration = Duration::from_micros(20);

/// HC-SR04 style ultrasonic ranger timed by polling the echo line.
pub struct HcSr04<P> {
    pin: P,
    timeout: Duration,
    speed_of_sound: f64,
}

impl<P: EchoPin> HcSr04<P> {
    pub fn new(pin: P) -> Self {
        Self {
            pin,
            timeout: Duration::from_millis(500),
            speed_of_sound: SPEED_OF_SOUND_M_S,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_speed_of_sound(mut self, speed_m_s: f64) -> Self {
        self.speed_of_sound = speed_m_s;
        self
    }

    /// Distance in metres, or `None` when the echo does not complete before the deadline.
    pub async fn measure(&mut self) -> Option<f64> {
        self.pin.set_trigger(false);
        self.pin.set_trigger(true);
        sleep(TRIGGER_PULSE).await;
        self.pin.set_trigger(false);

        let deadline = Instant::now() + self.timeout;
        while !self.pin.echo_high() {
            if Instant::now() >= deadline {
                tracing::debug!("no echo before deadline");
                return None;
            }
            tokio::task::yield_now().await;
        }
        let rise = Instant::now();
        while self.pin.echo_high() {
            if Instant::now() >= deadline {
                tracing::debug!("echo still high at deadline");
                return None;
            }
            tokio::task::yield_now().await;
        }
        let flight = rise.elapsed().as_secs_f64();
        Some(flight * self.speed_of_sound / 2.0)
    }
}

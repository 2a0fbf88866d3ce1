use crate::{PipelineMetrics, SensorState, TelemetrySink};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Periodically hands a JSON snapshot of the shared state to a sink.
///
/// Delivery is best effort: a refused snapshot is counted and logged, and the next
/// tick simply sends a fresher one.
pub struct Publisher<S> {
    sink: S,
    state: SensorState,
    interval: Duration,
    metrics: PipelineMetrics,
}

impl<S: TelemetrySink> Publisher<S> {
    pub fn new(sink: S, state: SensorState, interval: Duration, metrics: PipelineMetrics) -> Self {
        Self {
            sink,
            state,
            interval,
            metrics,
        }
    }

    /// Publish the current snapshot. Returns false when there was nothing to send or
    /// the sink refused it.
    pub async fn publish_once(&mut self) -> bool {
        let snapshot = self.state.snapshot();
        if snapshot.is_empty() {
            tracing::debug!("no readings yet, nothing to publish");
            return false;
        }
        let payload = match serde_json::to_string(&snapshot) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "snapshot did not serialize");
                self.metrics.publish_failures.inc();
                return false;
            }
        };
        match self.sink.publish(&payload).await {
            Ok(()) => {
                self.metrics.snapshots_published.inc();
                tracing::debug!(metrics = snapshot.len(), "snapshot published");
                true
            }
            Err(e) => {
                self.metrics.publish_failures.inc();
                tracing::warn!(error = %e, "snapshot not delivered");
                false
            }
        }
    }

    pub async fn run(mut self) {
        if let Err(e) = self.sink.announce_online().await {
            tracing::warn!(error = %e, "availability not announced");
        }
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.publish_once().await;
        }
    }
}

use crate::{
    run_producer, CommandDispatcher, Maintenance, PipelineError, PipelineMetrics, Producer,
    Publisher, Result, SensorState, TelemetrySink,
};
use embedded_hal_async::i2c::I2c;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinSet, LocalSet};

type TaskFuture = Pin<Box<dyn Future<Output = Result<()>>>>;

/// Owns the shared state and every task of the acquisition pipeline.
///
/// Tasks are registered up front and started together by [`Pipeline::run`]. They
/// interleave on a single thread, so none of them may block; each yields at its
/// own await points.
pub struct Pipeline {
    state: SensorState,
    metrics: PipelineMetrics,
    tasks: Vec<(String, TaskFuture)>,
}

impl Pipeline {
    pub fn new(metrics: PipelineMetrics) -> Self {
        Self {
            state: SensorState::new(),
            metrics,
            tasks: Vec::new(),
        }
    }

    pub fn state(&self) -> SensorState {
        self.state.clone()
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Register an arbitrary task. An `Err` from it stops the whole pipeline.
    pub fn spawn_task<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Future<Output = Result<()>> + 'static,
    {
        self.tasks.push((name.into(), Box::pin(task)));
    }

    pub fn add_producer<P: Producer + 'static>(&mut self, producer: P) {
        let name = producer.name();
        let task = run_producer(producer, self.state.clone(), self.metrics.clone());
        self.spawn_task(name, task);
    }

    pub fn add_dispatcher<I, M>(
        &mut self,
        dispatcher: CommandDispatcher<I, M>,
        commands: mpsc::Receiver<Vec<u8>>,
    ) where
        I: I2c + 'static,
        M: Maintenance + 'static,
    {
        self.spawn_task("dispatcher", async move {
            dispatcher.run(commands).await;
            Ok(())
        });
    }

    pub fn add_publisher<S: TelemetrySink + 'static>(&mut self, sink: S, interval: Duration) {
        let publisher = Publisher::new(sink, self.state.clone(), interval, self.metrics.clone());
        self.spawn_task("publisher", async move {
            publisher.run().await;
            Ok(())
        });
    }

    /// Run every registered task until one fails.
    ///
    /// The first failure aborts the remaining tasks and is returned tagged with the
    /// name of the task it came from. Tasks that finish cleanly are simply retired;
    /// `Ok` comes back only once all of them have.
    pub async fn run(self) -> Result<()> {
        let Pipeline { tasks, .. } = self;
        LocalSet::new()
            .run_until(async move {
                let mut set = JoinSet::new();
                let mut names = HashMap::new();
                for (name, task) in tasks {
                    let handle = set.spawn_local(task);
                    tracing::debug!(task = %name, "task started");
                    names.insert(handle.id(), name);
                }
                tracing::info!(tasks = names.len(), "pipeline running");

                while let Some(joined) = set.join_next_with_id().await {
                    match joined {
                        Ok((id, Ok(()))) => {
                            let name = names.remove(&id).unwrap_or_default();
                            tracing::info!(task = %name, "task finished");
                        }
                        Ok((id, Err(e))) => {
                            let task = names.remove(&id).unwrap_or_default();
                            tracing::error!(task = %task, error = %e, "task failed, stopping pipeline");
                            set.abort_all();
                            return Err(PipelineError::TaskFailed {
                                task,
                                source: Box::new(e),
                            });
                        }
                        Err(e) => {
                            let task = names.remove(&e.id()).unwrap_or_default();
                            tracing::error!(task = %task, error = %e, "task aborted, stopping pipeline");
                            set.abort_all();
                            return Err(PipelineError::TaskAborted(task));
                        }
                    }
                }
                tracing::info!("all tasks finished");
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelSink, LightProducer, LoggingMaintenance, SinkMessage, Thresholds};
    use async_trait::async_trait;
    use peripheral_bus::MockI2c;
    use sensor_drivers::{metric, ConfigHandle, Gain, Ltr390, Reading};
    use std::io;

    struct Flaky {
        left: u32,
    }

    #[async_trait(?Send)]
    impl Producer for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn acquire(&mut self) -> Result<Option<Reading>> {
            if self.left == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "port closed").into());
            }
            self.left -= 1;
            Ok(Some(Reading::new().with("pm25", f64::from(self.left))))
        }

        fn pause(&self) -> Duration {
            Duration::from_millis(10)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_failure_stops_everything() {
        let mut pipeline = Pipeline::new(PipelineMetrics::new().unwrap());
        let state = pipeline.state();
        pipeline.add_producer(Flaky { left: 2 });
        pipeline.spawn_task("idle", std::future::pending());
        pipeline.spawn_task("done", async { Ok(()) });

        let err = pipeline.run().await.unwrap_err();
        assert_eq!(err.task(), Some("flaky"));
        assert!(matches!(
            err,
            PipelineError::TaskFailed { ref source, .. } if matches!(**source, PipelineError::Stream(_))
        ));
        assert_eq!(state.get("pm25"), Some(0.0));
    }

    #[tokio::test]
    async fn returns_once_every_task_has_finished() {
        let mut pipeline = Pipeline::new(PipelineMetrics::new().unwrap());
        let (tx, rx) = mpsc::channel(1);
        let dispatcher: CommandDispatcher<MockI2c, _> =
            CommandDispatcher::new(ConfigHandle::default(), LoggingMaintenance, pipeline.metrics().clone());
        pipeline.add_dispatcher(dispatcher, rx);
        drop(tx);
        assert!(pipeline.run().await.is_ok());
    }

    fn light_bus() -> MockI2c {
        let bus = MockI2c::new();
        bus.set_register(0x53, 0x06, 0xB2);
        bus.set_register(0x53, 0x07, 0x08);
        bus.set_registers(0x53, 0x0D, &[0x08, 0x07, 0x00]);
        bus.set_registers(0x53, 0x10, &[0xFC, 0x08, 0x00]);
        bus
    }

    #[tokio::test(start_paused = true)]
    async fn gain_command_reaches_device_and_published_state() {
        let bus = light_bus();
        let uv = ConfigHandle::default();
        let metrics = PipelineMetrics::new().unwrap();
        let mut pipeline = Pipeline::new(metrics.clone());

        let light = LightProducer::start(
            Ltr390::new(bus.clone(), uv.clone()),
            Thresholds::default(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        pipeline.add_producer(light);

        let (tx, rx) = mpsc::channel(4);
        let dispatcher: CommandDispatcher<MockI2c, _> =
            CommandDispatcher::new(uv.clone(), LoggingMaintenance, metrics.clone());
        pipeline.add_dispatcher(dispatcher, rx);

        let (sink, mut published) = ChannelSink::new();
        pipeline.add_publisher(sink, Duration::from_secs(1));

        let observe = async {
            assert_eq!(published.recv().await, Some(SinkMessage::Online));
            tx.send(br#"{"uvs_gain":"3"}"#.to_vec()).await.unwrap();
            loop {
                let Some(SinkMessage::State(payload)) = published.recv().await else {
                    continue;
                };
                let snapshot: Reading = serde_json::from_str(&payload).unwrap();
                if snapshot.get(metric::UVS_GAIN) == Some(3.0) {
                    break snapshot;
                }
            }
        };
        let outcome = tokio::select! {
            res = pipeline.run() => Err(res),
            snapshot = observe => Ok(snapshot),
        };
        let snapshot = outcome.unwrap();

        assert_eq!(bus.register(0x53, 0x05), Some(Gain::X3.code()));
        assert!(snapshot.get(metric::UV).is_some());
        assert!(snapshot.get(metric::LIGHT).is_some());
        assert_eq!(metrics.commands_applied.get(), 1);
    }
}

//! telemetry-pipeline: acquisition, aggregation and command handling for the sensor board
//!
//! One producer task per peripheral merges readings into a shared [`SensorState`];
//! a [`Publisher`] periodically serialises snapshots to a [`TelemetrySink`]; a
//! [`CommandDispatcher`] applies inbound JSON commands to live driver settings.
//! A [`Pipeline`] runs them all as cooperative tasks on one thread and stops at
//! the first fatal failure.

mod error;
pub use error::{CommandError, PipelineError, Result, SinkError};

mod aggregator;
pub use aggregator::SensorState;

mod metrics;
pub use metrics::PipelineMetrics;

mod config;
pub use config::{load_config_file, PipelineConfig, RetryPolicy, Thresholds};

pub mod command;
pub use command::{Command, MaintenanceAction};

mod maintenance;
pub use maintenance::{LoggingMaintenance, Maintenance};

mod transport;
pub use transport::{ChannelSink, LogSink, SinkMessage, TelemetrySink};

pub mod producer;
pub use producer::{
    run_producer, AirQualityProducer, BaroProducer, FormaldehydeProducer, LightProducer,
    Producer, SharedBarometer,
};

mod dispatcher;
pub use dispatcher::CommandDispatcher;

mod publisher;
pub use publisher::Publisher;

mod orchestrator;
pub use orchestrator::Pipeline;

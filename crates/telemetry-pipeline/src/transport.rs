use crate::SinkError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Outbound side of the telemetry link.
#[async_trait(?Send)]
pub trait TelemetrySink {
    /// Mark the device available. Sent once before the first snapshot.
    async fn announce_online(&mut self) -> Result<(), SinkError>;

    /// Hand over one serialized state snapshot.
    async fn publish(&mut self, payload: &str) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkMessage {
    Online,
    State(String),
}

/// Forwards everything into a channel. Used by tests and in-process consumers.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkMessage>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, msg: SinkMessage) -> Result<(), SinkError> {
        self.tx
            .send(msg)
            .map_err(|_| SinkError("receiver dropped".into()))
    }
}

#[async_trait(?Send)]
impl TelemetrySink for ChannelSink {
    async fn announce_online(&mut self) -> Result<(), SinkError> {
        self.send(SinkMessage::Online)
    }

    async fn publish(&mut self, payload: &str) -> Result<(), SinkError> {
        self.send(SinkMessage::State(payload.to_string()))
    }
}

/// Writes snapshots to the log at `info`.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    topic: String,
}

impl LogSink {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
        }
    }
}

#[async_trait(?Send)]
impl TelemetrySink for LogSink {
    async fn announce_online(&mut self) -> Result<(), SinkError> {
        tracing::info!(topic = %self.topic, "online");
        Ok(())
    }

    async fn publish(&mut self, payload: &str) -> Result<(), SinkError> {
        tracing::info!(topic = %self.topic, %payload, "state");
        Ok(())
    }
}

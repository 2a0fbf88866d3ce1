use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters for the whole pipeline, registered on a private registry.
#[derive(Clone)]
pub struct PipelineMetrics {
    pub registry: Registry,
    pub frames_decoded: IntCounterVec,
    pub frames_dropped: IntCounterVec,
    pub merges: IntCounterVec,
    pub snapshots_published: IntCounter,
    pub publish_failures: IntCounter,
    pub commands_applied: IntCounter,
    pub commands_rejected: IntCounter,
}

impl PipelineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let per_producer = |name: &str, help: &str| {
            IntCounterVec::new(Opts::new(name, help), &["producer"])
        };
        let frames_decoded = per_producer("sensor_frames_decoded", "Valid frames decoded")?;
        let frames_dropped =
            per_producer("sensor_frames_dropped", "Frames dropped on header or checksum")?;
        let merges = per_producer("sensor_state_merges", "Readings merged into shared state")?;
        let snapshots_published = IntCounter::new(
            "sensor_snapshots_published",
            "State snapshots handed to the sink",
        )?;
        let publish_failures =
            IntCounter::new("sensor_publish_failures", "Snapshots the sink refused")?;
        let commands_applied =
            IntCounter::new("sensor_commands_applied", "Inbound commands that changed at least one setting")?;
        let commands_rejected = IntCounter::new(
            "sensor_commands_rejected",
            "Inbound commands dropped as malformed",
        )?;

        registry.register(Box::new(frames_decoded.clone()))?;
        registry.register(Box::new(frames_dropped.clone()))?;
        registry.register(Box::new(merges.clone()))?;
        registry.register(Box::new(snapshots_published.clone()))?;
        registry.register(Box::new(publish_failures.clone()))?;
        registry.register(Box::new(commands_applied.clone()))?;
        registry.register(Box::new(commands_rejected.clone()))?;

        Ok(Self {
            registry,
            frames_decoded,
            frames_dropped,
            merges,
            snapshots_published,
            publish_failures,
            commands_applied,
            commands_rejected,
        })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

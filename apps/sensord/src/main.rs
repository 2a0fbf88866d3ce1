use anyhow::{Context, Result};
use clap::Parser;
use peripheral_bus::{MockEchoPin, MockI2c};
use sensor_drivers::{Bmp280, ConfigHandle, HcSr04, Ltr390};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use telemetry_pipeline::{
    load_config_file, AirQualityProducer, BaroProducer, CommandDispatcher, FormaldehydeProducer,
    LightProducer, LogSink, LoggingMaintenance, Pipeline, PipelineConfig, PipelineMetrics,
    SharedBarometer,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

mod simulate;

#[derive(Parser)]
#[command(name = "sensord")]
#[command(about = "Sensor board acquisition daemon")]
struct Args {
    /// YAML pipeline configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Override the publish interval from the config file
    #[arg(long)]
    publish_interval_ms: Option<u64>,

    /// Topic attached to published snapshots
    #[arg(long, default_value = "sensor/state")]
    topic: String,

    /// Seed for the simulated peripherals
    #[arg(long)]
    seed: Option<u64>,

    /// Serial port of the air-quality module; simulated when absent
    #[cfg(feature = "serial")]
    #[arg(long)]
    air_quality_port: Option<String>,

    /// Serial port of the formaldehyde sensor; simulated when absent
    #[cfg(feature = "serial")]
    #[arg(long)]
    formaldehyde_port: Option<String>,

    /// Print the serial ports found on this host and exit
    #[cfg(feature = "serial")]
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_tracing(&args.log_level);

    #[cfg(feature = "serial")]
    if args.list_ports {
        for port in peripheral_bus::list_ports().context("enumerating serial ports")? {
            println!("{}\t{}", port.name, port.driver);
        }
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => load_config_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(ms) = args.publish_interval_ms {
        config.publish_interval_ms = ms;
    }
    info!("sensord starting");
    info!(
        publish_ms = config.publish_interval_ms,
        light_ms = config.light_interval_ms,
        baro_ms = config.baro_interval_ms,
        "intervals"
    );

    let metrics = PipelineMetrics::new().context("registering pipeline metrics")?;
    let mut pipeline = Pipeline::new(metrics.clone());
    let mut board = simulate::Board::new(args.seed);

    let uv = ConfigHandle::new(config.uv);
    let ltr390 = Ltr390::new(board.i2c(), uv.clone()).with_poll_timeout(config.poll_timeout());
    let light = LightProducer::start(ltr390, config.thresholds, config.light_interval())
        .await
        .context("starting LTR390")?;
    pipeline.add_producer(light);

    let baro: SharedBarometer<MockI2c> = Arc::new(tokio::sync::Mutex::new(Bmp280::new(board.i2c())));
    let barometer = BaroProducer::start(baro.clone(), config.baro_interval())
        .await
        .context("starting BMP280")?;
    pipeline.add_producer(barometer);

    add_stream_producers(&mut pipeline, &args, &config, &mut board).await?;
    report_distance().await;

    let (commands, inbox) = mpsc::channel(16);
    let dispatcher = CommandDispatcher::new(uv, LoggingMaintenance, metrics.clone())
        .with_barometer(baro)
        .with_retry(config.calibration_retry);
    pipeline.add_dispatcher(dispatcher, inbox);
    pipeline.spawn_task("stdin", read_commands(commands));
    pipeline.add_publisher(LogSink::new(args.topic.as_str()), config.publish_interval());
    pipeline.spawn_task("simulator", board.run());

    let outcome = tokio::select! {
        res = pipeline.run() => res.context("pipeline stopped"),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            Ok(())
        }
    };
    info!(metrics = %metrics.encode_text(), "final counters");
    outcome
}

#[cfg(feature = "serial")]
async fn add_stream_producers(
    pipeline: &mut Pipeline,
    args: &Args,
    config: &PipelineConfig,
    board: &mut simulate::Board,
) -> Result<()> {
    use peripheral_bus::{open_serial, SerialSettings};

    match &args.air_quality_port {
        Some(path) => {
            let port = open_serial(&SerialSettings::new(path.as_str()))
                .with_context(|| format!("opening air-quality port {path}"))?;
            pipeline.add_producer(AirQualityProducer::new(port));
        }
        None => pipeline.add_producer(AirQualityProducer::new(board.air_quality_port())),
    }
    match (&args.formaldehyde_port, config.formaldehyde_query_interval()) {
        (Some(path), Some(interval)) => {
            let port = open_serial(&SerialSettings::new(path.as_str()))
                .with_context(|| format!("opening formaldehyde port {path}"))?;
            let (reader, writer) = tokio::io::split(port);
            let producer = FormaldehydeProducer::query(reader, writer, interval)
                .await
                .context("switching formaldehyde sensor to query mode")?;
            pipeline.add_producer(producer);
        }
        (Some(path), None) => {
            let port = open_serial(&SerialSettings::new(path.as_str()))
                .with_context(|| format!("opening formaldehyde port {path}"))?;
            pipeline.add_producer(FormaldehydeProducer::active(port));
        }
        (None, _) => add_simulated_formaldehyde(pipeline, config, board),
    }
    Ok(())
}

#[cfg(not(feature = "serial"))]
async fn add_stream_producers(
    pipeline: &mut Pipeline,
    _args: &Args,
    config: &PipelineConfig,
    board: &mut simulate::Board,
) -> Result<()> {
    pipeline.add_producer(AirQualityProducer::new(board.air_quality_port()));
    add_simulated_formaldehyde(pipeline, config, board);
    Ok(())
}

fn add_simulated_formaldehyde(
    pipeline: &mut Pipeline,
    config: &PipelineConfig,
    board: &mut simulate::Board,
) {
    if config.formaldehyde_query_interval().is_some() {
        warn!("query mode needs a real formaldehyde sensor, simulating active mode");
    }
    pipeline.add_producer(FormaldehydeProducer::active(board.formaldehyde_port()));
}

/// One-off ranging check against a simulated echo module.
async fn report_distance() {
    let pin = MockEchoPin::new(Duration::from_micros(400), Duration::from_micros(5_900));
    match HcSr04::new(pin).measure().await {
        Some(distance) => info!(distance_m = distance, "ranging module answered"),
        None => warn!("ranging module did not answer"),
    }
}

/// Forward each stdin line as a command. Ends cleanly at end of input.
async fn read_commands(commands: mpsc::Sender<Vec<u8>>) -> telemetry_pipeline::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if commands.send(line.as_bytes().to_vec()).await.is_err() {
            break;
        }
    }
    info!("stdin closed, no further commands");
    Ok(())
}

fn setup_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

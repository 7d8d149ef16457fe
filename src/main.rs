use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use joydrive::config::DriveConfig;
use joydrive::gateway::{RecordingGateway, TcpGateway, VehicleGateway};
use joydrive::joystick::{device, DeviceInfo};
use joydrive::pipeline::{PipelineHandle, PipelineSettings};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::FmtSubscriber;

/// Drive a vehicle through the node gateway with a joystick
#[derive(Parser, Debug)]
#[command(name = "joydrive", version)]
struct Cli {
    /// Id of the vehicle to drive
    #[arg(long)]
    car: Option<String>,

    /// Joystick device, e.g. /dev/input/js0
    #[arg(long)]
    js: Option<PathBuf>,

    /// Host of the node gateway
    #[arg(long)]
    host: Option<String>,

    /// Port of the node gateway
    #[arg(long)]
    port: Option<u16>,

    /// Configuration file, defaults to <config dir>/joydrive/config.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Record gateway calls instead of talking to the gateway
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup()?;

    // the configured level is only known once the file is read
    let bootstrap = bootstrap_subscriber(bootstrap_level(&cli), std::io::stdout);
    let config = tracing::subscriber::with_default(bootstrap, || load_config(&cli))?;
    setup_logging_env(config.log_level()?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(config.clone(), cli.dry_run));

    // a reader stuck in a device read must not keep the process alive
    runtime.shutdown_timeout(config.shutdown_grace());
    result
}

fn load_config(cli: &Cli) -> Result<DriveConfig> {
    let mut config = DriveConfig::load(cli.config.as_deref())?;

    if let Some(car) = &cli.car {
        config.gateway.vehicle_id = car.clone();
    }
    if let Some(js) = &cli.js {
        config.device.path = js.clone();
    }
    if let Some(host) = &cli.host {
        config.gateway.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if cli.verbose {
        config.log_level = "debug".to_string();
    }

    config.validate()?;
    Ok(config)
}

async fn run(config: DriveConfig, dry_run: bool) -> Result<()> {
    info!("Available devices:");
    match device::list_devices() {
        Ok(devices) => {
            for path in devices {
                info!("  {}", path.display());
            }
        }
        Err(e) => warn!("Unable to list joystick devices: {}", e),
    }

    let file = device::open(&config.device.path)?;
    let info = DeviceInfo::query(&file)?;
    info.log_summary();

    let recorder = RecordingGateway::new();
    let gateway: Box<dyn VehicleGateway> = if dry_run {
        info!("Dry run, gateway calls are recorded only");
        Box::new(recorder.clone())
    } else {
        Box::new(TcpGateway::new())
    };

    let cancel = CancellationToken::new();
    let pipeline = PipelineHandle::spawn(
        file,
        gateway,
        info,
        PipelineSettings::from(&config),
        cancel.clone(),
    );

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Interrupt received, shutting down"),
                Err(e) => error!("Unable to listen for interrupt: {}", e),
            }
            cancel.cancel();
        }
        _ = cancel.cancelled() => {
            debug!("Pipeline requested shutdown");
        }
    }

    let report = pipeline
        .join(config.shutdown_grace())
        .await
        .map_err(|e| eyre!("Pipeline failed: {}", e))?;

    info!(
        "Drove for {} ticks: {} events, {} commands ({} failed)",
        report.drive.ticks,
        report.drive.events,
        report.drive.commands,
        report.drive.failed_commands
    );
    match report.reader {
        Ok(summary) => info!("Device reader forwarded {} records", summary.records),
        Err(e) => warn!("Device reader failed: {}", e),
    }

    if dry_run {
        for call in recorder.calls() {
            info!("Recorded {:?}", call);
        }
    }
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn bootstrap_level(cli: &Cli) -> Level {
    if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

fn bootstrap_subscriber<W>(level: Level, writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer)
        .finish()
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

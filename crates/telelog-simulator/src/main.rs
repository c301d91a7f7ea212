//! Desktop runner for the telelog sensor logging pipeline.
//!
//! Runs the producers, the aggregator (or the shared-snapshot logger) and the
//! storage manager on the embassy `std` executor. Sensors are synthetic and
//! the flash partition is a host directory, so mount recovery, backpressure
//! and the start/stop lifecycle can all be exercised without hardware.
//!
//! ```text
//! telelog-simulator --run-secs 30
//! telelog-simulator --shared --format legacy
//! telelog-simulator --corrupt-flash --offline pressure --bounce imu
//! ```

mod dir_flash;
mod sim_sensors;
mod tasks;

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use log::{error, info, warn};
use static_cell::StaticCell;
use thiserror_no_std::Error;

use telelog_core::config::{AggregatorConfig, ConfigError, PipelineConfig, ProducerConfig};
use telelog_core::storage::RecordFormat;
use telelog_core::{SensorSource, StorageError, StorageManager, Supervisor, TaskId};

use dir_flash::DirFlash;
use tasks::{CHANNELS, CONTROLS, Mode, STORAGE, SensorOptions, SimLauncher};

static CONFIG_BYTES: StaticCell<Vec<u8>> = StaticCell::new();
static CONFIG: StaticCell<PipelineConfig<'static>> = StaticCell::new();

#[derive(Parser, Debug)]
#[command(name = "telelog-simulator")]
#[command(version, about = "Run the telelog sensor pipeline on the desktop")]
struct Args {
    /// Use the mutex-guarded shared snapshot instead of per-source queues
    #[arg(long)]
    shared: bool,

    /// Seconds to run before every task is stopped
    #[arg(long, default_value_t = 20)]
    run_secs: u64,

    /// Directory acting as the flash partition
    #[arg(long, value_name = "DIR", default_value = "telelog-flash")]
    flash_dir: PathBuf,

    /// Postcard-encoded pipeline config (defaults to an accelerated profile)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write the effective config to FILE and exit
    #[arg(long, value_name = "FILE")]
    write_config: Option<PathBuf>,

    /// Override the record format
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Damage the superblock before mounting to exercise recovery
    #[arg(long)]
    corrupt_flash: bool,

    /// Sensors whose device reports not ready
    #[arg(long, value_enum)]
    offline: Vec<SourceArg>,

    /// Fail every Nth fetch of each sensor (0 never fails)
    #[arg(long, default_value_t = 7)]
    fail_every: u32,

    /// Stop and restart this producer halfway through the run
    #[arg(long, value_enum)]
    bounce: Option<SourceArg>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Legacy,
    Framed,
}

impl From<FormatArg> for RecordFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Legacy => RecordFormat::Legacy,
            FormatArg::Framed => RecordFormat::Framed,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SourceArg {
    Humidity,
    Temperature,
    Pressure,
    Imu,
}

impl From<SourceArg> for SensorSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Humidity => SensorSource::Humidity,
            SourceArg::Temperature => SensorSource::Temperature,
            SourceArg::Pressure => SensorSource::Pressure,
            SourceArg::Imu => SensorSource::Motion,
        }
    }
}

#[derive(Error, Debug)]
enum SimError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Same shape as the firmware defaults, with seconds instead of tens of
/// seconds so a short run produces plenty of records.
fn accelerated_config() -> PipelineConfig<'static> {
    let producer = ProducerConfig {
        interval_ms: 2_000,
        put_timeout_ms: 1_000,
    };
    let mut config = PipelineConfig {
        producers: [producer; 4],
        aggregator: AggregatorConfig {
            period_ms: 1_000,
            get_timeout_ms: 200,
        },
        ..PipelineConfig::default()
    };
    // The IMU runs faster than the environmental sensors
    config.producers[SensorSource::Motion.index()].interval_ms = 500;
    config
}

fn load_config(args: &Args) -> Result<&'static PipelineConfig<'static>, SimError> {
    let mut config = match &args.config {
        Some(path) => {
            let bytes: &'static [u8] = CONFIG_BYTES.init(std::fs::read(path)?);
            info!("Loaded config from {}", path.display());
            PipelineConfig::load(bytes)?
        }
        None => accelerated_config(),
    };
    if let Some(format) = args.format {
        config.storage.format = format.into();
    }
    config.validate()?;
    Ok(CONFIG.init(config))
}

fn report_log(storage: &mut StorageManager<'static, DirFlash>) {
    match storage.read_log() {
        Ok(contents) => {
            info!(
                "{} holds {} records ({} damaged)",
                storage.log_path(),
                contents.records.len(),
                contents.corrupt
            );
            if let Some(last) = contents.records.last() {
                info!(
                    "Last record: humidity {:.2} %, temperature {:.2} C, pressure {:.2} hPa",
                    last.humidity(),
                    last.temperature(),
                    last.pressure()
                );
            }
        }
        Err(e) => warn!("Could not read back the log: {}", e),
    }
}

async fn run(spawner: Spawner, args: Args) -> Result<(), SimError> {
    let config = load_config(&args)?;
    if let Some(path) = &args.write_config {
        std::fs::write(path, config.to_bytes()?)?;
        info!("Wrote config to {}", path.display());
        return Ok(());
    }

    let mode = if args.shared { Mode::Shared } else { Mode::Channel };
    info!(
        "Starting telelog simulator: {:?} pipeline, {:?} records, {} s",
        mode, config.storage.format, args.run_secs
    );

    let flash = DirFlash::new(&args.flash_dir);
    if args.corrupt_flash {
        flash.corrupt_superblock()?;
        warn!("Damaged superblock in {}", flash.root().display());
    }

    let mut storage = StorageManager::new(flash, config.storage)?;
    // Exhaustion is already logged; the pipeline runs on without persistence
    let _ = storage.mount();
    *STORAGE.lock().await = Some(storage);

    let sensors = SensorOptions {
        offline: args.offline.iter().map(|&s| s.into()).collect(),
        fail_every: args.fail_every,
    };
    let launcher = SimLauncher::new(spawner, mode, config, sensors);
    let mut supervisor = Supervisor::new(launcher, &CONTROLS);
    if let Err(e) = supervisor.start_all() {
        warn!("Not every task started: {}", e);
    }

    let run_for = Duration::from_secs(args.run_secs);
    match args.bounce {
        Some(source) => {
            let half = run_for / 2;
            Timer::after(half).await;

            let task = TaskId::Producer(source.into());
            info!("Restarting {} producer", task.name());
            if let Err(e) = supervisor.stop(task).await {
                warn!("{}", e);
            }
            if let Err(e) = supervisor.start(task) {
                warn!("{}", e);
            }
            Timer::after(run_for - half).await;
        }
        None => Timer::after(run_for).await,
    }

    info!("Stopping all tasks");
    supervisor.stop_all().await;

    if mode == Mode::Channel {
        info!("Readings left in queues: {:?}", CHANNELS.backlog());
    }
    if let Some(storage) = STORAGE.lock().await.as_mut() {
        report_log(storage);
        if storage.is_mounted() {
            storage.unmount()?;
            info!("Unmounted {}", storage.config().mount_point);
        }
    }
    Ok(())
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let code = match run(spawner, args).await {
        Ok(()) => 0,
        Err(e) => {
            error!("{}", e);
            1
        }
    };

    // The executor never returns on its own
    std::process::exit(code);
}

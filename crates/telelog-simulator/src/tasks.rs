//! Embassy tasks for the pipeline and the launcher the supervisor spawns
//! them through.
//!
//! Tasks build their sensor and producer on every spawn, so a stopped task
//! can be started again. Queues, the shared snapshot and storage live in
//! statics because spawned tasks need `'static` borrows.

use embassy_executor::{SpawnError, Spawner};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::Duration;
use log::{error, info, warn};

use telelog_core::config::{AggregatorConfig, PipelineConfig, ProducerConfig};
use telelog_core::sensors::{Humidity, Motion, Pressure, Reading, Sensor, SensorSource, Temperature};
use telelog_core::supervisor::LaunchError;
use telelog_core::{
    Aggregator, PutOutcome, ReadingSender, ReadingSink, SensorProducer, SharedSnapshot,
    SnapshotLogger, SourceChannels, StorageManager, TaskControl, TaskControls, TaskId,
    TaskLauncher,
};

use crate::dir_flash::DirFlash;
use crate::sim_sensors::SimSensor;

pub static CHANNELS: SourceChannels = SourceChannels::new();
pub static SHARED: SharedSnapshot = SharedSnapshot::new();
pub static CONTROLS: TaskControls = TaskControls::new();

/// Filled in once the mount ladder has run; the aggregator (or snapshot
/// logger) holds the lock for as long as it runs.
pub static STORAGE: Mutex<CriticalSectionRawMutex, Option<StorageManager<'static, DirFlash>>> =
    Mutex::new(None);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Per-source queues drained by the aggregator
    Channel,
    /// One locked snapshot written by producers, copied by the logger
    Shared,
}

/// Fault settings applied to every synthetic sensor
#[derive(Debug, Clone, Default)]
pub struct SensorOptions {
    pub offline: Vec<SensorSource>,
    pub fail_every: u32,
}

impl SensorOptions {
    fn configure<R: Copy + Into<Reading>>(&self, sensor: SimSensor<R>) -> SimSensor<R> {
        let source = sensor.source();
        sensor
            .offline(self.offline.contains(&source))
            .fail_every(self.fail_every)
    }
}

/// Where a producer task delivers, depending on the pipeline mode
pub enum SimSink<R: 'static> {
    Channel(ReadingSender<'static, R>),
    Shared(&'static SharedSnapshot),
}

impl<R: Into<Reading> + 'static> ReadingSink<R> for SimSink<R> {
    async fn offer(&self, reading: R, timeout: Duration) -> PutOutcome {
        match self {
            Self::Channel(tx) => tx.put(reading, timeout).await,
            Self::Shared(shared) => shared.write(reading.into(), timeout).await,
        }
    }
}

async fn run_producer<S>(
    sensor: S,
    sink: SimSink<S::Reading>,
    config: ProducerConfig,
    control: &TaskControl,
) where
    S: Sensor,
    S::Reading: 'static,
{
    let name = sensor.source().name();
    let mut producer = SensorProducer::new(sensor, config);
    match producer.run(&sink, control).await {
        Ok(stats) => info!("{} producer finished: {:?}", name, stats),
        Err(e) => error!("{}", e),
    }
    control.finish();
}

#[embassy_executor::task]
async fn humidity_task(
    sensor: SimSensor<Humidity>,
    sink: SimSink<Humidity>,
    config: ProducerConfig,
    control: &'static TaskControl,
) {
    run_producer(sensor, sink, config, control).await
}

#[embassy_executor::task]
async fn temperature_task(
    sensor: SimSensor<Temperature>,
    sink: SimSink<Temperature>,
    config: ProducerConfig,
    control: &'static TaskControl,
) {
    run_producer(sensor, sink, config, control).await
}

#[embassy_executor::task]
async fn pressure_task(
    sensor: SimSensor<Pressure>,
    sink: SimSink<Pressure>,
    config: ProducerConfig,
    control: &'static TaskControl,
) {
    run_producer(sensor, sink, config, control).await
}

#[embassy_executor::task]
async fn motion_task(
    sensor: SimSensor<Motion>,
    sink: SimSink<Motion>,
    config: ProducerConfig,
    control: &'static TaskControl,
) {
    run_producer(sensor, sink, config, control).await
}

#[embassy_executor::task]
async fn aggregator_task(config: AggregatorConfig, control: &'static TaskControl) {
    let mut storage = STORAGE.lock().await;
    match storage.as_mut() {
        Some(storage) => {
            let mut aggregator = Aggregator::new(CHANNELS.receivers(), config);
            let stats = aggregator.run(storage, control).await;
            info!("aggregator finished: {:?}", stats);
        }
        None => error!("aggregator started before storage was set up"),
    }
    drop(storage);
    control.finish();
}

#[embassy_executor::task]
async fn snapshot_logger_task(config: AggregatorConfig, control: &'static TaskControl) {
    let mut storage = STORAGE.lock().await;
    match storage.as_mut() {
        Some(storage) => {
            let mut logger = SnapshotLogger::new(&SHARED, config);
            let stats = logger.run(storage, control).await;
            info!("snapshot logger finished: {:?}", stats);
        }
        None => error!("snapshot logger started before storage was set up"),
    }
    drop(storage);
    control.finish();
}

/// Spawns pipeline tasks on the embassy executor
pub struct SimLauncher {
    spawner: Spawner,
    mode: Mode,
    config: &'static PipelineConfig<'static>,
    sensors: SensorOptions,
}

impl SimLauncher {
    pub fn new(
        spawner: Spawner,
        mode: Mode,
        config: &'static PipelineConfig<'static>,
        sensors: SensorOptions,
    ) -> Self {
        Self {
            spawner,
            mode,
            config,
            sensors,
        }
    }

    fn sink<R: 'static>(&self, sender: ReadingSender<'static, R>) -> SimSink<R> {
        match self.mode {
            Mode::Channel => SimSink::Channel(sender),
            Mode::Shared => SimSink::Shared(&SHARED),
        }
    }

    fn spawn(&self, task: TaskId, control: &'static TaskControl) -> Result<(), SpawnError> {
        let config = self.config;
        match task {
            TaskId::Producer(source @ SensorSource::Humidity) => self.spawner.spawn(humidity_task(
                self.sensors.configure(SimSensor::humidity()),
                self.sink(CHANNELS.humidity_sender()),
                *config.producer(source),
                control,
            ))?,
            TaskId::Producer(source @ SensorSource::Temperature) => {
                self.spawner.spawn(temperature_task(
                    self.sensors.configure(SimSensor::temperature()),
                    self.sink(CHANNELS.temperature_sender()),
                    *config.producer(source),
                    control,
                ))?
            }
            TaskId::Producer(source @ SensorSource::Pressure) => self.spawner.spawn(pressure_task(
                self.sensors.configure(SimSensor::pressure()),
                self.sink(CHANNELS.pressure_sender()),
                *config.producer(source),
                control,
            ))?,
            TaskId::Producer(source @ SensorSource::Motion) => self.spawner.spawn(motion_task(
                self.sensors.configure(SimSensor::motion()),
                self.sink(CHANNELS.motion_sender()),
                *config.producer(source),
                control,
            ))?,
            TaskId::Aggregator => match self.mode {
                Mode::Channel => self
                    .spawner
                    .spawn(aggregator_task(config.aggregator, control))?,
                Mode::Shared => self
                    .spawner
                    .spawn(snapshot_logger_task(config.aggregator, control))?,
            },
        }
        Ok(())
    }
}

impl TaskLauncher<'static> for SimLauncher {
    fn launch(&mut self, task: TaskId, control: &'static TaskControl) -> Result<(), LaunchError> {
        self.spawn(task, control).map_err(|e| {
            warn!("Could not spawn {} task: {:?}", task.name(), e);
            LaunchError::NoSlot
        })
    }
}

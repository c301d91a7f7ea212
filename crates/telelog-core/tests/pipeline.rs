//! End-to-end runs of both pipeline variants on the host, with scripted
//! sensors and in-memory flash.

use std::cell::RefCell;

use embassy_futures::block_on;
use embassy_futures::join::{join, join3, join4};
use embassy_time::{Duration, Timer};

use telelog_core::config::{AggregatorConfig, ProducerConfig, StorageConfig};
use telelog_core::sensors::mock::ScriptedSensor;
use telelog_core::sensors::{Humidity, Motion, Pressure, Temperature, Vector3};
use telelog_core::storage::{LEGACY_RECORD_SIZE, MemoryFlash, RecordFormat};
use telelog_core::supervisor::LaunchError;
use telelog_core::{
    Aggregator, Freshness, MountRecovery, SensorProducer, SensorSource, SharedSnapshot,
    SnapshotLogger, SourceChannels, StorageManager, Supervisor, TaskControl, TaskControls, TaskId,
    TaskLauncher,
};

const LOG: &str = "/lfs1/sensor_data.bin";

/// The test drives every task itself; launching only has to succeed
struct InlineLauncher;

impl<'a> TaskLauncher<'a> for InlineLauncher {
    fn launch(&mut self, _task: TaskId, _control: &'a TaskControl) -> Result<(), LaunchError> {
        Ok(())
    }
}

fn producer_config() -> ProducerConfig {
    ProducerConfig {
        interval_ms: 10,
        put_timeout_ms: 2,
    }
}

fn aggregator_config() -> AggregatorConfig {
    AggregatorConfig {
        period_ms: 15,
        get_timeout_ms: 2,
    }
}

fn storage(format: RecordFormat) -> StorageManager<'static, MemoryFlash> {
    let mut flash = MemoryFlash::corrupted();
    flash.fail_mounts(1);
    let mut storage = StorageManager::new(
        flash,
        StorageConfig {
            format,
            ..StorageConfig::default()
        },
    )
    .unwrap();
    assert_eq!(storage.mount(), Ok(MountRecovery::Erased));
    storage
}

fn sensors() -> (
    ScriptedSensor<Humidity>,
    ScriptedSensor<Temperature>,
    ScriptedSensor<Pressure>,
    ScriptedSensor<Motion>,
) {
    (
        ScriptedSensor::with_readings(SensorSource::Humidity, &[Humidity { percent: 45.0 }]),
        ScriptedSensor::with_readings(
            SensorSource::Temperature,
            &[Temperature { celsius: 22.5 }],
        ),
        // Pressure device never comes up
        ScriptedSensor::not_ready(SensorSource::Pressure),
        ScriptedSensor::with_readings(
            SensorSource::Motion,
            &[Motion {
                accel: Vector3::new(0.0, 0.0, 9.81),
                gyro: Vector3::new(0.01, -0.01, 0.0),
            }],
        ),
    )
}

/// Run `task` under `control` and record its name once it has returned
async fn tracked<F: Future>(
    name: &'static str,
    control: &TaskControl,
    exits: &RefCell<Vec<&'static str>>,
    task: F,
) -> F::Output {
    let output = task.await;
    exits.borrow_mut().push(name);
    control.finish();
    output
}

#[test]
fn channel_pipeline_persists_every_cycle() {
    let channels = SourceChannels::new();
    let controls = TaskControls::new();
    let mut supervisor = Supervisor::new(InlineLauncher, &controls);
    supervisor.start_all().unwrap();

    let (h, t, p, m) = sensors();
    let mut humidity = SensorProducer::new(h, producer_config());
    let mut temperature = SensorProducer::new(t, producer_config());
    let mut pressure = SensorProducer::new(p, producer_config());
    let mut motion = SensorProducer::new(m, producer_config());
    let mut aggregator = Aggregator::new(channels.receivers(), aggregator_config());
    let mut storage = storage(RecordFormat::Framed);

    let exits = RefCell::new(Vec::new());
    let control = |source: SensorSource| controls.get(TaskId::Producer(source));

    let h_tx = channels.humidity_sender();
    let t_tx = channels.temperature_sender();
    let p_tx = channels.pressure_sender();
    let m_tx = channels.motion_sender();

    let (producers, aggregator_stats, ()) = block_on(join3(
        join4(
            tracked(
                "humidity",
                control(SensorSource::Humidity),
                &exits,
                humidity.run(&h_tx, control(SensorSource::Humidity)),
            ),
            tracked(
                "temperature",
                control(SensorSource::Temperature),
                &exits,
                temperature.run(&t_tx, control(SensorSource::Temperature)),
            ),
            tracked(
                "pressure",
                control(SensorSource::Pressure),
                &exits,
                pressure.run(&p_tx, control(SensorSource::Pressure)),
            ),
            tracked(
                "imu",
                control(SensorSource::Motion),
                &exits,
                motion.run(&m_tx, control(SensorSource::Motion)),
            ),
        ),
        tracked(
            "aggregator",
            controls.get(TaskId::Aggregator),
            &exits,
            aggregator.run(&mut storage, controls.get(TaskId::Aggregator)),
        ),
        async {
            Timer::after(Duration::from_millis(80)).await;
            supervisor.stop_all().await;
        },
    ));

    let (humidity_run, _, pressure_run, _) = producers;
    assert!(humidity_run.unwrap().enqueued >= 2);
    assert!(pressure_run.is_err());

    assert_eq!(exits.borrow().last(), Some(&"aggregator"));
    for task in TaskId::PRODUCERS.into_iter().chain([TaskId::Aggregator]) {
        assert!(!supervisor.is_running(task));
    }

    assert!(aggregator_stats.cycles >= 2);
    assert_eq!(aggregator_stats.persisted, aggregator_stats.cycles);

    let contents = storage.read_log().unwrap();
    assert_eq!(contents.corrupt, 0);
    assert_eq!(contents.records.len() as u32, aggregator_stats.persisted);

    let cycles: Vec<u32> = contents
        .records
        .iter()
        .map(|r| r.meta.unwrap().cycle)
        .collect();
    assert!(cycles.windows(2).all(|w| w[1] == w[0] + 1));

    let last = contents.records.last().unwrap();
    assert_eq!(last.humidity(), 45.0);
    assert_eq!(last.temperature(), 22.5);
    assert_eq!(last.accel().z, 9.81);
    assert_eq!(last.pressure(), 0.0);
    assert_eq!(
        last.freshness(SensorSource::Pressure),
        Some(Freshness::Missing)
    );
}

#[test]
fn shared_snapshot_pipeline_writes_fixed_size_records() {
    let shared = SharedSnapshot::new();
    let controls = TaskControls::new();
    let mut supervisor = Supervisor::new(InlineLauncher, &controls);
    supervisor.start_all().unwrap();

    let (h, t, _, m) = sensors();
    let mut humidity = SensorProducer::new(h, producer_config());
    let mut temperature = SensorProducer::new(t, producer_config());
    let mut motion = SensorProducer::new(m, producer_config());
    let mut logger = SnapshotLogger::new(&shared, aggregator_config());
    let mut storage = storage(RecordFormat::Legacy);

    let control = |task: TaskId| controls.get(task);
    let humidity_id = TaskId::Producer(SensorSource::Humidity);
    let temperature_id = TaskId::Producer(SensorSource::Temperature);
    let motion_id = TaskId::Producer(SensorSource::Motion);
    // Nothing runs for pressure in this deployment
    control(TaskId::Producer(SensorSource::Pressure)).finish();

    let ((h_run, t_run, m_run), logger_stats, ()) = block_on(join3(
        join3(
            control(humidity_id).scope(humidity.run(&shared, control(humidity_id))),
            control(temperature_id).scope(temperature.run(&shared, control(temperature_id))),
            control(motion_id).scope(motion.run(&shared, control(motion_id))),
        ),
        control(TaskId::Aggregator).scope(logger.run(&mut storage, control(TaskId::Aggregator))),
        async {
            Timer::after(Duration::from_millis(80)).await;
            supervisor.stop_all().await;
        },
    ));

    for run in [h_run, t_run, m_run] {
        let stats = run.unwrap();
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.enqueued, stats.samples);
    }

    assert!(logger_stats.cycles >= 2);
    assert_eq!(
        storage.filesystem().file_len(LOG),
        Some(logger_stats.persisted as usize * LEGACY_RECORD_SIZE)
    );

    let contents = storage.read_log().unwrap();
    let last = contents.records.last().unwrap();
    assert_eq!(last.meta, None);
    assert_eq!(last.humidity(), 45.0);
    assert_eq!(last.gyro(), Vector3::new(0.01, -0.01, 0.0));
}

#[test]
fn failed_storage_keeps_the_pipeline_running() {
    let channels = SourceChannels::new();
    let control = TaskControl::new();
    control.arm();

    let mut flash = MemoryFlash::corrupted();
    flash.fail_erase(true);
    let mut storage = StorageManager::new(flash, StorageConfig::default()).unwrap();
    assert!(storage.mount().is_err());

    channels
        .humidity_sender()
        .try_put(Humidity { percent: 60.0 });
    let mut aggregator = Aggregator::new(channels.receivers(), aggregator_config());

    let (stats, ()) = block_on(join(aggregator.run(&mut storage, &control), async {
        Timer::after(Duration::from_millis(40)).await;
        control.request_stop();
    }));

    assert!(stats.cycles >= 2);
    assert_eq!(stats.persisted, 0);
    assert_eq!(stats.persist_failures, stats.cycles);
    assert_eq!(aggregator.snapshot().humidity().percent, 60.0);
    assert_eq!(storage.filesystem().stats().file_opens, 0);
}

//! Collects one reading per source into the snapshot and persists it
//!
//! Each cycle drains at most one reading from every source queue, in a fixed
//! order, waiting a bounded time on each. A source that delivered nothing
//! keeps its previous value and its freshness shows how old that value is.

use embassy_time::Duration;
use log::{debug, error, info};

use crate::channel::{ReadingChannel, ReadingReceiver, ReadingSender};
use crate::config::AggregatorConfig;
use crate::sensors::{Humidity, Motion, Pressure, Reading, SensorSource, Temperature};
use crate::snapshot::Snapshot;
use crate::storage::{SnapshotSink, StorageError};
use crate::supervisor::TaskControl;

/// The four per-source queues of the channel pipeline
pub struct SourceChannels {
    pub humidity: ReadingChannel<Humidity>,
    pub temperature: ReadingChannel<Temperature>,
    pub pressure: ReadingChannel<Pressure>,
    pub motion: ReadingChannel<Motion>,
}

impl SourceChannels {
    pub const fn new() -> Self {
        Self {
            humidity: ReadingChannel::new(),
            temperature: ReadingChannel::new(),
            pressure: ReadingChannel::new(),
            motion: ReadingChannel::new(),
        }
    }

    pub fn receivers(&self) -> SourceReceivers<'_> {
        SourceReceivers {
            humidity: self.humidity.receiver(),
            temperature: self.temperature.receiver(),
            pressure: self.pressure.receiver(),
            motion: self.motion.receiver(),
        }
    }

    pub fn humidity_sender(&self) -> ReadingSender<'_, Humidity> {
        self.humidity.sender()
    }

    pub fn temperature_sender(&self) -> ReadingSender<'_, Temperature> {
        self.temperature.sender()
    }

    pub fn pressure_sender(&self) -> ReadingSender<'_, Pressure> {
        self.pressure.sender()
    }

    pub fn motion_sender(&self) -> ReadingSender<'_, Motion> {
        self.motion.sender()
    }

    /// Readings waiting in each queue, in [`SensorSource::ALL`] order
    pub fn backlog(&self) -> [usize; 4] {
        [
            self.humidity.len(),
            self.temperature.len(),
            self.pressure.len(),
            self.motion.len(),
        ]
    }
}

impl Default for SourceChannels {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving ends of every source queue, owned by the aggregator
#[derive(Clone, Copy)]
pub struct SourceReceivers<'a> {
    pub humidity: ReadingReceiver<'a, Humidity>,
    pub temperature: ReadingReceiver<'a, Temperature>,
    pub pressure: ReadingReceiver<'a, Pressure>,
    pub motion: ReadingReceiver<'a, Motion>,
}

impl SourceReceivers<'_> {
    async fn get(&self, source: SensorSource, timeout: Duration) -> Option<Reading> {
        match source {
            SensorSource::Humidity => self.humidity.get(timeout).await.map(Reading::from),
            SensorSource::Temperature => self.temperature.get(timeout).await.map(Reading::from),
            SensorSource::Pressure => self.pressure.get(timeout).await.map(Reading::from),
            SensorSource::Motion => self.motion.get(timeout).await.map(Reading::from),
        }
    }
}

/// Counters for an aggregator or snapshot-logger run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub cycles: u32,
    /// Readings taken off the queues
    pub received: u32,
    pub persisted: u32,
    pub persist_failures: u32,
}

impl AggregatorStats {
    /// Hand `snapshot` to `sink` and count the outcome
    pub(crate) fn persist<K: SnapshotSink>(&mut self, sink: &mut K, snapshot: &Snapshot) {
        match sink.persist(snapshot) {
            Ok(()) => self.persisted += 1,
            // Ladder exhaustion has already been reported
            Err(StorageError::NotMounted) => {
                debug!("Storage not mounted, snapshot {} not saved", snapshot.cycle());
                self.persist_failures += 1;
            }
            Err(e) => {
                error!("Failed to save snapshot {}: {}", snapshot.cycle(), e);
                self.persist_failures += 1;
            }
        }
    }
}

pub struct Aggregator<'a> {
    receivers: SourceReceivers<'a>,
    snapshot: Snapshot,
    config: AggregatorConfig,
    stats: AggregatorStats,
}

impl<'a> Aggregator<'a> {
    pub fn new(receivers: SourceReceivers<'a>, config: AggregatorConfig) -> Self {
        Self {
            receivers,
            snapshot: Snapshot::new(),
            config,
            stats: AggregatorStats::default(),
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn stats(&self) -> AggregatorStats {
        self.stats
    }

    /// One collection cycle: take at most one reading per source and log
    /// the resulting snapshot.
    pub async fn run_cycle(&mut self) -> &Snapshot {
        self.snapshot.advance_cycle();
        self.stats.cycles += 1;

        let timeout = self.config.get_timeout();
        for source in SensorSource::ALL {
            match self.receivers.get(source, timeout).await {
                Some(reading) => {
                    self.snapshot.apply(reading);
                    self.stats.received += 1;
                }
                None => debug!("No new {} data this cycle", source.name()),
            }
        }

        self.snapshot.log();
        &self.snapshot
    }

    /// Collect, persist and sleep until `control` requests a stop
    pub async fn run<K: SnapshotSink>(
        &mut self,
        sink: &mut K,
        control: &TaskControl,
    ) -> AggregatorStats {
        info!("aggregator task started.");

        while !control.stop_requested() {
            self.run_cycle().await;
            self.stats.persist(sink, &self.snapshot);

            if !control.sleep(self.config.period()).await {
                break;
            }
        }

        info!("aggregator task stopped.");
        self.stats
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::sensors::Vector3;
    use crate::snapshot::Freshness;
    use embassy_futures::block_on;
    use std::vec::Vec;

    fn fast_config() -> AggregatorConfig {
        AggregatorConfig {
            period_ms: 10,
            get_timeout_ms: 2,
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        snapshots: Vec<Snapshot>,
    }

    impl SnapshotSink for CollectingSink {
        fn persist(&mut self, snapshot: &Snapshot) -> Result<(), StorageError> {
            self.snapshots.push(*snapshot);
            Ok(())
        }
    }

    #[test]
    fn cycle_takes_one_reading_per_source() {
        let channels = SourceChannels::new();
        channels.humidity_sender().try_put(Humidity { percent: 30.0 });
        channels.humidity_sender().try_put(Humidity { percent: 31.0 });
        channels.pressure_sender().try_put(Pressure { hpa: 990.0 });

        let mut aggregator = Aggregator::new(channels.receivers(), fast_config());
        let snapshot = *block_on(aggregator.run_cycle());

        assert_eq!(snapshot.cycle(), 1);
        assert_eq!(snapshot.humidity().percent, 30.0);
        assert_eq!(snapshot.pressure().hpa, 990.0);
        assert_eq!(snapshot.freshness(SensorSource::Humidity), Freshness::Fresh);
        assert_eq!(
            snapshot.freshness(SensorSource::Temperature),
            Freshness::Missing
        );
        assert_eq!(snapshot.temperature().celsius, 0.0);
        assert_eq!(channels.backlog(), [1, 0, 0, 0]);

        let snapshot = *block_on(aggregator.run_cycle());
        assert_eq!(snapshot.humidity().percent, 31.0);
        assert_eq!(aggregator.stats().received, 3);
    }

    #[test]
    fn silent_source_keeps_its_last_value() {
        let channels = SourceChannels::new();
        let gyro = Vector3::new(0.1, 0.2, 0.3);
        channels.motion_sender().try_put(Motion {
            accel: Vector3::ZERO,
            gyro,
        });

        let mut aggregator = Aggregator::new(channels.receivers(), fast_config());
        block_on(aggregator.run_cycle());
        for expected_age in 1..=3 {
            let snapshot = block_on(aggregator.run_cycle());
            assert_eq!(snapshot.motion().gyro, gyro);
            assert_eq!(
                snapshot.freshness(SensorSource::Motion),
                Freshness::Stale {
                    cycles: expected_age
                }
            );
        }
    }

    #[test]
    fn run_persists_every_cycle_until_stopped() {
        let channels = SourceChannels::new();
        let control = TaskControl::new();
        control.arm();
        channels.temperature_sender().try_put(Temperature { celsius: 21.5 });

        let mut aggregator = Aggregator::new(channels.receivers(), fast_config());
        let mut sink = CollectingSink::default();

        let stats = block_on(embassy_futures::join::join(
            aggregator.run(&mut sink, &control),
            async {
                embassy_time::Timer::after(Duration::from_millis(50)).await;
                control.request_stop();
            },
        ))
        .0;

        assert!(stats.cycles >= 2);
        assert_eq!(stats.persisted, stats.cycles);
        assert_eq!(sink.snapshots.len() as u32, stats.cycles);
        assert_eq!(sink.snapshots[0].temperature().celsius, 21.5);
        let cycles: Vec<u32> = sink.snapshots.iter().map(Snapshot::cycle).collect();
        assert!(cycles.windows(2).all(|w| w[1] == w[0] + 1));
    }
}

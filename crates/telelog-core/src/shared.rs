//! Mutex-guarded shared snapshot, the lock-based alternative to the channel
//! pipeline
//!
//! Producers write their own field in place under a short lock; a periodic
//! logger copies the whole struct under the same lock and persists the copy.
//! A copy is never torn by a single write, but fields still come from
//! different instants because every producer locks separately.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, with_timeout};
use log::{info, warn};

use crate::aggregator::AggregatorStats;
use crate::channel::PutOutcome;
use crate::config::AggregatorConfig;
use crate::producer::ReadingSink;
use crate::sensors::Reading;
use crate::snapshot::Snapshot;
use crate::storage::SnapshotSink;
use crate::supervisor::TaskControl;

pub struct SharedSnapshot {
    inner: Mutex<CriticalSectionRawMutex, Snapshot>,
}

impl SharedSnapshot {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Snapshot::new()),
        }
    }

    /// Overwrite one field, waiting at most `timeout` for the lock.
    ///
    /// A lock timeout loses the reading, exactly like a full queue.
    pub async fn write(&self, reading: Reading, timeout: Duration) -> PutOutcome {
        match with_timeout(timeout, self.inner.lock()).await {
            Ok(mut snapshot) => {
                snapshot.apply(reading);
                PutOutcome::Enqueued
            }
            Err(_) => PutOutcome::Dropped,
        }
    }

    /// Copy the whole snapshot and start a new cycle.
    ///
    /// Returns `None` if the lock could not be taken within `timeout`.
    pub async fn copy(&self, timeout: Duration) -> Option<Snapshot> {
        let mut snapshot = with_timeout(timeout, self.inner.lock()).await.ok()?;
        let copy = *snapshot;
        snapshot.advance_cycle();
        Some(copy)
    }
}

impl Default for SharedSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Into<Reading>> ReadingSink<R> for SharedSnapshot {
    async fn offer(&self, reading: R, timeout: Duration) -> PutOutcome {
        self.write(reading.into(), timeout).await
    }
}

/// Periodic task of the shared variant: copy, log, persist, sleep
pub struct SnapshotLogger<'a> {
    shared: &'a SharedSnapshot,
    config: AggregatorConfig,
    stats: AggregatorStats,
}

impl<'a> SnapshotLogger<'a> {
    pub fn new(shared: &'a SharedSnapshot, config: AggregatorConfig) -> Self {
        Self {
            shared,
            config,
            stats: AggregatorStats::default(),
        }
    }

    pub fn stats(&self) -> AggregatorStats {
        self.stats
    }

    /// Copy and persist once; `None` if the lock was busy this cycle
    pub async fn log_once<K: SnapshotSink>(&mut self, sink: &mut K) -> Option<Snapshot> {
        let Some(snapshot) = self.shared.copy(self.config.get_timeout()).await else {
            warn!("Snapshot lock busy, skipping cycle");
            return None;
        };
        self.stats.cycles += 1;

        snapshot.log();
        self.stats.persist(sink, &snapshot);
        Some(snapshot)
    }

    pub async fn run<K: SnapshotSink>(
        &mut self,
        sink: &mut K,
        control: &TaskControl,
    ) -> AggregatorStats {
        info!("snapshot logger task started.");

        while !control.stop_requested() {
            self.log_once(sink).await;

            if !control.sleep(self.config.period()).await {
                break;
            }
        }

        info!("snapshot logger task stopped.");
        self.stats
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::sensors::{Humidity, SensorSource, Temperature};
    use crate::snapshot::Freshness;
    use crate::storage::StorageError;
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use embassy_time::Timer;
    use std::vec::Vec;

    const SHORT: Duration = Duration::from_millis(5);

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

    fn config() -> AggregatorConfig {
        AggregatorConfig {
            period_ms: 10,
            get_timeout_ms: 5,
        }
    }

    #[test]
    fn writes_land_in_their_own_field() {
        let shared = SharedSnapshot::new();
        assert_eq!(
            block_on(shared.write(Humidity { percent: 50.0 }.into(), SHORT)),
            PutOutcome::Enqueued
        );
        block_on(shared.offer(Temperature { celsius: 19.0 }, SHORT));

        let copy = block_on(shared.copy(SHORT)).unwrap();
        assert_eq!(copy.humidity().percent, 50.0);
        assert_eq!(copy.temperature().celsius, 19.0);
        assert_eq!(copy.freshness(SensorSource::Humidity), Freshness::Fresh);
        assert_eq!(copy.freshness(SensorSource::Pressure), Freshness::Missing);
    }

    #[test]
    fn copy_seals_the_cycle() {
        let shared = SharedSnapshot::new();
        block_on(shared.write(Humidity { percent: 50.0 }.into(), SHORT));

        let first = block_on(shared.copy(SHORT)).unwrap();
        let second = block_on(shared.copy(SHORT)).unwrap();

        assert_eq!(second.cycle(), first.cycle() + 1);
        assert_eq!(second.humidity().percent, 50.0);
        assert_eq!(
            second.freshness(SensorSource::Humidity),
            Freshness::Stale { cycles: 1 }
        );
    }

    #[test]
    fn held_lock_drops_writes_and_skips_copies() {
        let shared = SharedSnapshot::new();
        let mut logger = SnapshotLogger::new(&shared, config());
        let mut sink = CollectingSink::default();

        let (write, logged) = block_on(async {
            let _guard = shared.inner.lock().await;
            join(
                shared.write(Humidity { percent: 1.0 }.into(), SHORT),
                logger.log_once(&mut sink),
            )
            .await
        });

        assert_eq!(write, PutOutcome::Dropped);
        assert_eq!(logged, None);
        assert!(sink.snapshots.is_empty());
        assert_eq!(logger.stats().cycles, 0);
    }

    #[test]
    fn logger_persists_until_stopped() {
        let shared = SharedSnapshot::new();
        let control = TaskControl::new();
        control.arm();
        let mut logger = SnapshotLogger::new(&shared, config());
        let mut sink = CollectingSink::default();

        let (stats, ()) = block_on(join(logger.run(&mut sink, &control), async {
            shared.write(Humidity { percent: 42.0 }.into(), SHORT).await;
            Timer::after(Duration::from_millis(35)).await;
            control.request_stop();
        }));

        assert!(stats.cycles >= 2);
        assert_eq!(stats.persisted, stats.cycles);
        assert_eq!(sink.snapshots.len() as u32, stats.cycles);
        assert_eq!(sink.snapshots.last().unwrap().humidity().percent, 42.0);
    }
}

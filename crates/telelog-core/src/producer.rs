//! Periodic sensor sampling task
//!
//! ```text
//! INIT --(device not ready)--> FAILED (task returns)
//! INIT --> READY --> SAMPLE --(ok)--> OFFER --> SLEEP --> SAMPLE ...
//!                    SAMPLE --(error)--------> SLEEP --> SAMPLE ...
//! ```
//!
//! Sampling errors are logged and absorbed; the loop only ends when its
//! [`TaskControl`] asks it to stop.

use embassy_time::Duration;
use log::{error, info, warn};
use thiserror_no_std::Error;

use crate::channel::{PutOutcome, ReadingSender};
use crate::config::ProducerConfig;
use crate::sensors::{Sensor, SensorError};
use crate::supervisor::TaskControl;

/// Destination for a producer's readings.
///
/// The channel pipeline hands readings to the source's queue; the shared
/// snapshot variant writes them straight into the locked snapshot.
pub trait ReadingSink<R> {
    /// Offer a reading, waiting at most `timeout` for room or for the lock.
    fn offer(&self, reading: R, timeout: Duration) -> impl Future<Output = PutOutcome>;
}

impl<R, const N: usize> ReadingSink<R> for ReadingSender<'_, R, N> {
    async fn offer(&self, reading: R, timeout: Duration) -> PutOutcome {
        self.put(reading, timeout).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Init,
    Ready,
    /// The device was not ready at start-up; terminal
    Failed,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerError {
    #[error("producer could not start: {0}")]
    DeviceNotReady(SensorError),
}

/// Counters for one producer run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    /// Fetch attempts
    pub samples: u32,
    pub enqueued: u32,
    /// Readings lost because the sink stayed full until the timeout
    pub dropped: u32,
    /// Fetch or decode errors
    pub failures: u32,
}

pub struct SensorProducer<S: Sensor> {
    sensor: S,
    config: ProducerConfig,
    state: ProducerState,
    stats: ProducerStats,
}

impl<S: Sensor> SensorProducer<S> {
    pub fn new(sensor: S, config: ProducerConfig) -> Self {
        Self {
            sensor,
            config,
            state: ProducerState::Init,
            stats: ProducerStats::default(),
        }
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    pub fn stats(&self) -> ProducerStats {
        self.stats
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    /// Check the device once. A producer that fails here never samples.
    pub fn init(&mut self) -> Result<(), ProducerError> {
        if self.state == ProducerState::Failed {
            return Err(self.not_ready());
        }
        if !self.sensor.is_ready() {
            error!("sensor: {} device not ready.", self.sensor.source().name());
            self.state = ProducerState::Failed;
            return Err(self.not_ready());
        }
        self.state = ProducerState::Ready;
        Ok(())
    }

    fn not_ready(&self) -> ProducerError {
        ProducerError::DeviceNotReady(SensorError::NotReady {
            sensor: self.sensor.source().name(),
        })
    }

    /// One SAMPLE step: fetch and, on success, offer the reading to `sink`.
    ///
    /// Returns the offer outcome, or the sampling error that skipped this
    /// cycle. Exactly one `offer` happens per successful sample.
    pub async fn sample_once<K: ReadingSink<S::Reading>>(
        &mut self,
        sink: &K,
    ) -> Result<PutOutcome, SensorError> {
        let name = self.sensor.source().name();
        self.stats.samples += 1;

        let reading = match self.sensor.fetch().await {
            Ok(reading) => reading,
            Err(e) => {
                error!("{} sample update error: {}", name, e);
                self.stats.failures += 1;
                return Err(e);
            }
        };

        let outcome = sink.offer(reading, self.config.put_timeout()).await;
        match outcome {
            PutOutcome::Enqueued => self.stats.enqueued += 1,
            PutOutcome::Dropped => {
                warn!("{} message queue full, dropping data", name);
                self.stats.dropped += 1;
            }
        }
        Ok(outcome)
    }

    /// Run until `control` requests a stop.
    ///
    /// The stop flag is checked at the top of each iteration and the
    /// inter-sample sleep is cut short by a stop request, so shutdown takes
    /// at most one sampling interval and never interrupts an offer.
    pub async fn run<K: ReadingSink<S::Reading>>(
        &mut self,
        sink: &K,
        control: &TaskControl,
    ) -> Result<ProducerStats, ProducerError> {
        if self.state != ProducerState::Ready {
            self.init()?;
        }

        let name = self.sensor.source().name();
        info!("{} sensor task started.", name);

        while !control.stop_requested() {
            // Errors are already logged and counted
            let _ = self.sample_once(sink).await;

            if !control.sleep(self.config.interval()).await {
                break;
            }
        }

        info!("{} sensor task stopped.", name);
        Ok(self.stats)
    }
}

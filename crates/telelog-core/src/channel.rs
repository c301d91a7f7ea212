//! Bounded per-source reading queues
//!
//! Each sensor source gets its own fixed-capacity FIFO. The producer task owns
//! the sending half and the aggregator owns the receiving half. Both sides use
//! bounded waits: a `put` that cannot find space before its timeout drops the
//! reading (at-most-once, lossy under backpressure), a `get` that finds nothing
//! before its timeout reports that instead of blocking.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_time::{Duration, with_timeout};

/// Readings buffered per source before producers start dropping data
pub const QUEUE_CAPACITY: usize = 10;

/// Result of offering a reading to a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Enqueued,
    /// No space became available before the timeout; the reading is lost
    Dropped,
}

/// Fixed-capacity single-producer/single-consumer queue for one source.
///
/// Usually placed in a `static` so tasks can hold `'static` halves:
///
/// ```rust,ignore
/// static HUMIDITY_QUEUE: ReadingChannel<Humidity> = ReadingChannel::new();
///
/// let tx = HUMIDITY_QUEUE.sender();
/// let rx = HUMIDITY_QUEUE.receiver();
/// ```
pub struct ReadingChannel<T, const N: usize = QUEUE_CAPACITY> {
    inner: Channel<CriticalSectionRawMutex, T, N>,
}

impl<T, const N: usize> ReadingChannel<T, N> {
    pub const fn new() -> Self {
        Self {
            inner: Channel::new(),
        }
    }

    pub fn sender(&self) -> ReadingSender<'_, T, N> {
        ReadingSender {
            inner: self.inner.sender(),
        }
    }

    pub fn receiver(&self) -> ReadingReceiver<'_, T, N> {
        ReadingReceiver {
            inner: self.inner.receiver(),
        }
    }

    /// Number of readings currently queued
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }
}

impl<T, const N: usize> Default for ReadingChannel<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Sending half, owned by a producer
#[derive(Clone, Copy)]
pub struct ReadingSender<'a, T, const N: usize = QUEUE_CAPACITY> {
    inner: Sender<'a, CriticalSectionRawMutex, T, N>,
}

impl<T, const N: usize> ReadingSender<'_, T, N> {
    /// Enqueue `item`, waiting at most `timeout` for space.
    ///
    /// If the queue still has no room when the timeout expires the reading is
    /// dropped; the caller decides how to report it.
    pub async fn put(&self, item: T, timeout: Duration) -> PutOutcome {
        match with_timeout(timeout, self.inner.send(item)).await {
            Ok(()) => PutOutcome::Enqueued,
            Err(_) => PutOutcome::Dropped,
        }
    }

    /// Enqueue without waiting
    pub fn try_put(&self, item: T) -> PutOutcome {
        match self.inner.try_send(item) {
            Ok(()) => PutOutcome::Enqueued,
            Err(_) => PutOutcome::Dropped,
        }
    }
}

/// Receiving half, owned by the aggregator
#[derive(Clone, Copy)]
pub struct ReadingReceiver<'a, T, const N: usize = QUEUE_CAPACITY> {
    inner: Receiver<'a, CriticalSectionRawMutex, T, N>,
}

impl<T, const N: usize> ReadingReceiver<'_, T, N> {
    /// Dequeue the oldest reading, waiting at most `timeout` for one.
    ///
    /// Returns `None` on timeout.
    pub async fn get(&self, timeout: Duration) -> Option<T> {
        with_timeout(timeout, self.inner.receive()).await.ok()
    }

    /// Dequeue without waiting
    pub fn try_get(&self) -> Option<T> {
        self.inner.try_receive().ok()
    }
}

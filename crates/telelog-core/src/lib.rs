//! Hardware-independent core library for telelog
//!
//! This crate contains the platform-agnostic logic of the telelog sensor
//! logging pipeline: typed sensor readings, the bounded per-source channels,
//! the periodic producer and aggregator loops, the snapshot model, the
//! mutex-guarded shared-snapshot variant, flash storage with its mount
//! recovery ladder, and the supervisor that starts and stops tasks.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod aggregator;
pub mod channel;
pub mod config;
pub mod producer;
pub mod sensors;
pub mod shared;
pub mod snapshot;
pub mod storage;
pub mod supervisor;

pub use aggregator::{Aggregator, AggregatorStats, SourceChannels, SourceReceivers};
pub use channel::{PutOutcome, ReadingChannel, ReadingReceiver, ReadingSender, QUEUE_CAPACITY};
pub use config::PipelineConfig;
pub use producer::{ProducerStats, ReadingSink, SensorProducer};
pub use sensors::{Reading, Sensor, SensorError, SensorSource};
pub use shared::{SharedSnapshot, SnapshotLogger};
pub use snapshot::{Freshness, Snapshot};
pub use storage::{Filesystem, MountRecovery, SnapshotSink, StorageError, StorageManager};
pub use supervisor::{Supervisor, TaskControl, TaskControls, TaskId, TaskLauncher};

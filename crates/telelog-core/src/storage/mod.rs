pub mod fs;
pub mod manager;
pub mod memory;
pub mod record;

pub use fs::{Filesystem, FsError, OpenMode, PartitionId, path_under};
pub use manager::{LogContents, MountRecovery, MountState, RecoveryStage, StorageManager};
pub use memory::{FlashStats, MemoryFlash, VolumeState};
pub use record::{LEGACY_RECORD_SIZE, LogScanner, RecordError, RecordFormat, StorageRecord};

use thiserror_no_std::Error;

use crate::snapshot::Snapshot;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Every mount recovery step failed; persistence stays off until restart
    #[error("mount recovery exhausted at {stage}: {error}")]
    RecoveryExhausted { stage: RecoveryStage, error: FsError },
    #[error("storage is not mounted")]
    NotMounted,
    #[error("log file path is too long")]
    PathTooLong,
    #[error("failed to open log file: {0}")]
    Open(FsError),
    #[error("failed to write record: {0}")]
    Write(FsError),
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("failed to close log file: {0}")]
    Close(FsError),
    #[error("failed to read log file: {0}")]
    Read(FsError),
    #[error("failed to encode record: {0}")]
    Encode(RecordError),
}

/// Where the aggregator (or the shared-snapshot logger) hands finished
/// snapshots.
pub trait SnapshotSink {
    fn persist(&mut self, snapshot: &Snapshot) -> Result<(), StorageError>;
}

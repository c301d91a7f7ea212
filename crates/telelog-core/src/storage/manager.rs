use core::fmt::{self, Display};

use alloc::vec::Vec;
use log::{debug, error, info, warn};

use super::fs::{Filesystem, FsError, OpenMode, PartitionId};
use super::record::{LogScanner, StorageRecord};
use super::{SnapshotSink, StorageError};
use crate::config::StorageConfig;
use crate::snapshot::Snapshot;

/// Longest supported `mount_point/log_file` path
pub const MAX_PATH_LEN: usize = 64;

const READ_CHUNK: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    Mounted,
    /// Every recovery step failed; stays off until restart
    Disabled { stage: RecoveryStage, error: FsError },
}

/// Which rung of the recovery ladder brought the filesystem up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountRecovery {
    /// First mount attempt succeeded
    Direct,
    /// Succeeded after an unmount and a second attempt
    Remounted,
    /// Succeeded only after erasing the whole partition
    Erased,
}

/// Step of the erase rung that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStage {
    PartitionOpen,
    Erase,
    FinalMount,
}

impl Display for RecoveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Self::PartitionOpen => "partition open",
            Self::Erase => "partition erase",
            Self::FinalMount => "final mount",
        };
        f.write_str(stage)
    }
}

/// Everything read back from the log file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogContents {
    pub records: Vec<StorageRecord>,
    /// Damaged or truncated records skipped while scanning
    pub corrupt: usize,
}

/// Open log file that is closed on every exit path.
///
/// [`AppendGuard::close`] reports close/flush errors; dropping the guard
/// without closing (an early `?` return) still closes the file and only logs
/// the outcome.
struct AppendGuard<'f, F: Filesystem> {
    fs: &'f mut F,
    file: Option<F::File>,
    /// File length before this record
    start: usize,
}

impl<'f, F: Filesystem> AppendGuard<'f, F> {
    fn open(fs: &'f mut F, path: &str) -> Result<Self, StorageError> {
        let file = fs
            .open(path, OpenMode::CreateAppend)
            .map_err(StorageError::Open)?;
        let mut guard = Self {
            fs,
            file: Some(file),
            start: 0,
        };
        if let Some(file) = &guard.file {
            guard.start = guard.fs.size(file).map_err(StorageError::Open)?;
        }
        Ok(guard)
    }

    /// Write the whole record in a single call
    fn write_record(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        let Some(file) = self.file.as_mut() else {
            return Err(StorageError::Write(FsError::Io));
        };
        let written = self.fs.write(file, bytes).map_err(StorageError::Write)?;
        if written != bytes.len() {
            self.discard_torn(bytes.len().saturating_sub(written));
            return Err(StorageError::ShortWrite {
                written,
                expected: bytes.len(),
            });
        }
        Ok(())
    }

    /// Cut a partially written record off the end of the file. If the file
    /// cannot be cut back, pad the record to its full length so the records
    /// after it stay aligned.
    fn discard_torn(&mut self, missing: usize) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let Err(e) = self.fs.truncate(file, self.start) else {
            return;
        };
        warn!("Could not drop torn record ({}), padding {} bytes", e, missing);

        let padding = [0u8; 16];
        let mut left = missing;
        while left > 0 {
            match self.fs.write(file, &padding[..left.min(padding.len())]) {
                Ok(0) | Err(_) => break,
                Ok(n) => left = left.saturating_sub(n),
            }
        }
        if left > 0 {
            error!("Log is misaligned: {} bytes of padding missing", left);
        }
    }

    fn close(mut self) -> Result<(), StorageError> {
        match self.file.take() {
            Some(file) => self.fs.close(file).map_err(StorageError::Close),
            None => Ok(()),
        }
    }
}

impl<F: Filesystem> Drop for AppendGuard<'_, F> {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = self.fs.close(file) {
                warn!("Failed to close log file after error: {}", e);
            }
        }
    }
}

/// Owns the flash filesystem: brings it up through the recovery ladder and
/// appends one record per snapshot to the log file.
pub struct StorageManager<'a, F: Filesystem> {
    fs: F,
    config: StorageConfig<'a>,
    path: heapless::String<MAX_PATH_LEN>,
    state: MountState,
}

impl<'a, F: Filesystem> StorageManager<'a, F> {
    pub fn new(fs: F, config: StorageConfig<'a>) -> Result<Self, StorageError> {
        let mut path = heapless::String::new();
        let separator = if config.mount_point.ends_with('/') { "" } else { "/" };
        for part in [config.mount_point, separator, config.log_file] {
            path.push_str(part).map_err(|_| StorageError::PathTooLong)?;
        }

        Ok(Self {
            fs,
            config,
            path,
            state: MountState::Unmounted,
        })
    }

    pub fn state(&self) -> MountState {
        self.state
    }

    pub fn is_mounted(&self) -> bool {
        self.state == MountState::Mounted
    }

    /// Full path of the log file
    pub fn log_path(&self) -> &str {
        &self.path
    }

    pub fn config(&self) -> &StorageConfig<'a> {
        &self.config
    }

    pub fn filesystem(&self) -> &F {
        &self.fs
    }

    pub fn into_inner(self) -> F {
        self.fs
    }

    /// Bring the filesystem up, escalating through remount and erase.
    ///
    /// On exhaustion the manager is disabled: later mounts return the same
    /// error without touching the flash, and every append fails with
    /// [`StorageError::NotMounted`].
    pub fn mount(&mut self) -> Result<MountRecovery, StorageError> {
        match self.state {
            MountState::Mounted => {
                debug!("{} already mounted", self.config.mount_point);
                return Ok(MountRecovery::Direct);
            }
            MountState::Disabled { stage, error } => {
                return Err(StorageError::RecoveryExhausted { stage, error });
            }
            MountState::Unmounted => {}
        }

        match self.run_mount_ladder() {
            Ok(rung) => {
                self.state = MountState::Mounted;
                info!("Mounted {} ({:?})", self.config.mount_point, rung);
                Ok(rung)
            }
            Err((stage, error)) => {
                self.state = MountState::Disabled { stage, error };
                let e = StorageError::RecoveryExhausted { stage, error };
                error!("Storage disabled: {}", e);
                Err(e)
            }
        }
    }

    fn run_mount_ladder(&mut self) -> Result<MountRecovery, (RecoveryStage, FsError)> {
        let mount_point = self.config.mount_point;

        let Err(e) = self.fs.mount(mount_point) else {
            return Ok(MountRecovery::Direct);
        };
        warn!("Mount of {} failed ({}), remounting", mount_point, e);

        // May already be unmounted
        let _ = self.fs.unmount(mount_point);
        let Err(e) = self.fs.mount(mount_point) else {
            return Ok(MountRecovery::Remounted);
        };
        warn!(
            "Remount of {} failed ({}), erasing partition {}",
            mount_point, e, self.config.partition
        );

        let mut partition = self
            .fs
            .open_partition(PartitionId(self.config.partition))
            .map_err(|e| (RecoveryStage::PartitionOpen, e))?;
        let erased = self.fs.erase_partition(&mut partition);
        self.fs.close_partition(partition);
        erased.map_err(|e| (RecoveryStage::Erase, e))?;

        self.fs
            .mount(mount_point)
            .map_err(|e| (RecoveryStage::FinalMount, e))?;
        Ok(MountRecovery::Erased)
    }

    /// Release the filesystem; a later [`mount`](Self::mount) brings it back
    pub fn unmount(&mut self) -> Result<(), StorageError> {
        if !self.is_mounted() {
            return Err(StorageError::NotMounted);
        }
        self.state = MountState::Unmounted;
        self.fs
            .unmount(self.config.mount_point)
            .map_err(StorageError::Close)
    }

    /// Append one record for `snapshot` at the end of the log.
    ///
    /// A failed write loses this record only; earlier records and the mount
    /// state are untouched.
    pub fn append(&mut self, snapshot: &Snapshot) -> Result<(), StorageError> {
        if !self.is_mounted() {
            return Err(StorageError::NotMounted);
        }

        let bytes = StorageRecord::from_snapshot(snapshot)
            .encode(self.config.format)
            .map_err(StorageError::Encode)?;

        let mut guard = AppendGuard::open(&mut self.fs, &self.path)?;
        guard.write_record(&bytes)?;
        guard.close()?;

        debug!("Appended {} bytes to {}", bytes.len(), self.path);
        Ok(())
    }

    /// Read the whole log and decode it in the configured format
    pub fn read_log(&mut self) -> Result<LogContents, StorageError> {
        if !self.is_mounted() {
            return Err(StorageError::NotMounted);
        }

        let mut file = match self.fs.open(&self.path, OpenMode::ReadOnly) {
            Ok(file) => file,
            Err(FsError::NotFound) => return Ok(LogContents::default()),
            Err(e) => return Err(StorageError::Open(e)),
        };

        let mut bytes = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        let read = loop {
            match self.fs.read(&mut file, &mut chunk) {
                Ok(0) => break Ok(()),
                Ok(n) => bytes.extend_from_slice(&chunk[..n]),
                Err(e) => break Err(StorageError::Read(e)),
            }
        };
        let closed = self.fs.close(file).map_err(StorageError::Close);
        read?;
        closed?;

        let mut contents = LogContents::default();
        for result in LogScanner::new(&bytes, self.config.format) {
            match result {
                Ok(record) => contents.records.push(record),
                Err(e) => {
                    warn!("Skipping damaged record in {}: {}", self.path, e);
                    contents.corrupt += 1;
                }
            }
        }
        Ok(contents)
    }
}

impl<F: Filesystem> SnapshotSink for StorageManager<'_, F> {
    fn persist(&mut self, snapshot: &Snapshot) -> Result<(), StorageError> {
        self.append(snapshot)
    }
}

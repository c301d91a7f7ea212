//! RAM-backed [`Filesystem`] with fault injection
//!
//! Behaves like a small LittleFS volume: a blank partition is formatted on
//! first mount, a corrupted one refuses to mount until it is erased, and file
//! data only becomes visible once the file is closed. Every operation is
//! counted so tests can assert exactly what the storage manager did.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use super::fs::{Filesystem, FsError, OpenMode, PartitionId, path_under};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeState {
    /// Freshly erased, formatted on next mount
    Blank,
    Formatted,
    /// Mounting fails until the partition is erased
    Corrupted,
}

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlashStats {
    pub mount_attempts: u32,
    pub unmounts: u32,
    pub partition_opens: u32,
    pub partition_closes: u32,
    pub erases: u32,
    pub file_opens: u32,
    pub file_closes: u32,
    pub writes: u32,
    pub truncates: u32,
    /// Partition wiped by the most recent erase
    pub last_erased: Option<PartitionId>,
}

#[derive(Debug, Default)]
struct Faults {
    /// Number of upcoming mounts that fail regardless of volume state
    mount_failures: u32,
    partition_unavailable: bool,
    erase_fails: bool,
    /// Number of upcoming writes that fail outright
    write_failures: u32,
    /// Next write stores only this many bytes
    short_write: Option<usize>,
    truncate_fails: bool,
}

#[derive(Debug)]
pub struct MemoryFile {
    path: String,
    mode: OpenMode,
    position: usize,
    pending: Vec<u8>,
}

#[derive(Debug)]
pub struct MemoryPartition {
    id: PartitionId,
}

#[derive(Debug)]
pub struct MemoryFlash {
    volume: VolumeState,
    mount_point: Option<String>,
    files: BTreeMap<String, Vec<u8>>,
    open_files: u32,
    faults: Faults,
    stats: FlashStats,
}

impl MemoryFlash {
    /// A blank partition; the first mount formats it
    pub fn new() -> Self {
        Self {
            volume: VolumeState::Blank,
            mount_point: None,
            files: BTreeMap::new(),
            open_files: 0,
            faults: Faults::default(),
            stats: FlashStats::default(),
        }
    }

    /// A partition holding a damaged filesystem
    pub fn corrupted() -> Self {
        let mut flash = Self::new();
        flash.volume = VolumeState::Corrupted;
        flash
    }

    /// Make the next `count` mounts fail
    pub fn fail_mounts(&mut self, count: u32) {
        self.faults.mount_failures = count;
    }

    pub fn fail_partition_open(&mut self, fail: bool) {
        self.faults.partition_unavailable = fail;
    }

    pub fn fail_erase(&mut self, fail: bool) {
        self.faults.erase_fails = fail;
    }

    /// Make the next `count` writes fail
    pub fn fail_writes(&mut self, count: u32) {
        self.faults.write_failures = count;
    }

    /// Make the next write store only `len` bytes
    pub fn short_write(&mut self, len: usize) {
        self.faults.short_write = Some(len);
    }

    pub fn fail_truncate(&mut self, fail: bool) {
        self.faults.truncate_fails = fail;
    }

    pub fn volume(&self) -> VolumeState {
        self.volume
    }

    pub fn is_mounted(&self) -> bool {
        self.mount_point.is_some()
    }

    pub fn stats(&self) -> FlashStats {
        self.stats
    }

    /// Files currently open
    pub fn open_files(&self) -> u32 {
        self.open_files
    }

    /// Committed contents of `path`
    pub fn contents(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn file_len(&self, path: &str) -> Option<usize> {
        self.files.get(path).map(Vec::len)
    }

    fn check_path(&self, path: &str) -> Result<(), FsError> {
        let mount_point = self.mount_point.as_deref().ok_or(FsError::NotMounted)?;
        path_under(mount_point, path)
            .map(|_| ())
            .ok_or(FsError::NotFound)
    }
}

impl Default for MemoryFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl Filesystem for MemoryFlash {
    type File = MemoryFile;
    type Partition = MemoryPartition;

    fn mount(&mut self, mount_point: &str) -> Result<(), FsError> {
        self.stats.mount_attempts += 1;
        if self.faults.mount_failures > 0 {
            self.faults.mount_failures -= 1;
            return Err(FsError::Corrupted);
        }

        match self.volume {
            VolumeState::Corrupted => return Err(FsError::Corrupted),
            VolumeState::Blank => {
                self.files.clear();
                self.volume = VolumeState::Formatted;
            }
            VolumeState::Formatted => {}
        }
        self.mount_point = Some(mount_point.to_string());
        Ok(())
    }

    fn unmount(&mut self, _mount_point: &str) -> Result<(), FsError> {
        self.stats.unmounts += 1;
        self.mount_point.take().map(|_| ()).ok_or(FsError::NotMounted)
    }

    fn open_partition(&mut self, id: PartitionId) -> Result<MemoryPartition, FsError> {
        self.stats.partition_opens += 1;
        if self.faults.partition_unavailable {
            return Err(FsError::PartitionUnavailable);
        }
        Ok(MemoryPartition { id })
    }

    fn erase_partition(&mut self, partition: &mut MemoryPartition) -> Result<(), FsError> {
        if self.faults.erase_fails {
            return Err(FsError::EraseFailed);
        }
        self.stats.erases += 1;
        self.stats.last_erased = Some(partition.id);
        self.files.clear();
        self.mount_point = None;
        self.volume = VolumeState::Blank;
        Ok(())
    }

    fn close_partition(&mut self, _partition: MemoryPartition) {
        self.stats.partition_closes += 1;
    }

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<MemoryFile, FsError> {
        self.check_path(path)?;
        match mode {
            OpenMode::CreateAppend => {
                self.files.entry(path.to_string()).or_default();
            }
            OpenMode::ReadOnly if !self.files.contains_key(path) => {
                return Err(FsError::NotFound);
            }
            OpenMode::ReadOnly => {}
        }

        self.stats.file_opens += 1;
        self.open_files += 1;
        Ok(MemoryFile {
            path: path.to_string(),
            mode,
            position: 0,
            pending: Vec::new(),
        })
    }

    fn write(&mut self, file: &mut MemoryFile, data: &[u8]) -> Result<usize, FsError> {
        if !self.is_mounted() {
            return Err(FsError::NotMounted);
        }
        if file.mode != OpenMode::CreateAppend {
            return Err(FsError::Io);
        }
        self.stats.writes += 1;
        if self.faults.write_failures > 0 {
            self.faults.write_failures -= 1;
            return Err(FsError::Io);
        }

        let len = self
            .faults
            .short_write
            .take()
            .map_or(data.len(), |limit| limit.min(data.len()));
        file.pending.extend_from_slice(&data[..len]);
        Ok(len)
    }

    fn read(&mut self, file: &mut MemoryFile, buf: &mut [u8]) -> Result<usize, FsError> {
        if !self.is_mounted() {
            return Err(FsError::NotMounted);
        }
        let data = self.files.get(&file.path).ok_or(FsError::NotFound)?;
        let rest = data.get(file.position..).unwrap_or_default();
        let len = rest.len().min(buf.len());
        buf[..len].copy_from_slice(&rest[..len]);
        file.position += len;
        Ok(len)
    }

    fn size(&mut self, file: &MemoryFile) -> Result<usize, FsError> {
        if !self.is_mounted() {
            return Err(FsError::NotMounted);
        }
        let committed = self.file_len(&file.path).unwrap_or(0);
        Ok(committed + file.pending.len())
    }

    fn truncate(&mut self, file: &mut MemoryFile, len: usize) -> Result<(), FsError> {
        if !self.is_mounted() {
            return Err(FsError::NotMounted);
        }
        if file.mode != OpenMode::CreateAppend || self.faults.truncate_fails {
            return Err(FsError::Io);
        }
        self.stats.truncates += 1;

        let data = self.files.entry(file.path.clone()).or_default();
        match len.checked_sub(data.len()) {
            Some(keep) => file.pending.truncate(keep),
            None => {
                data.truncate(len);
                file.pending.clear();
            }
        }
        Ok(())
    }

    fn close(&mut self, file: MemoryFile) -> Result<(), FsError> {
        self.stats.file_closes += 1;
        self.open_files = self.open_files.saturating_sub(1);
        if !self.is_mounted() {
            return Err(FsError::NotMounted);
        }
        if !file.pending.is_empty() {
            self.files
                .entry(file.path)
                .or_default()
                .extend_from_slice(&file.pending);
        }
        Ok(())
    }
}

//! Flash filesystem capability consumed by the storage manager
//!
//! The pipeline assumes the block device underneath is already initialised.
//! Implementations map these calls onto whatever the platform provides
//! (LittleFS on a flash partition, a host directory in the simulator, RAM in
//! tests).

use thiserror_no_std::Error;

/// Identifier of a raw flash partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionId(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create the file if needed and position every write at its end
    CreateAppend,
    ReadOnly,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("filesystem is corrupted")]
    Corrupted,
    #[error("filesystem is not mounted")]
    NotMounted,
    #[error("no such file")]
    NotFound,
    #[error("flash partition unavailable")]
    PartitionUnavailable,
    #[error("flash erase failed")]
    EraseFailed,
    #[error("no space left on device")]
    NoSpace,
    #[error("i/o error")]
    Io,
}

/// Part of `path` below `mount_point`, without leading slashes.
///
/// `None` unless `path` names a file inside the mount point: `/lfs10/log`
/// is not under `/lfs1`.
pub fn path_under<'p>(mount_point: &str, path: &'p str) -> Option<&'p str> {
    let rest = path.strip_prefix(mount_point)?;
    let rest = if mount_point.ends_with('/') {
        rest
    } else {
        rest.strip_prefix('/')?
    };
    let rest = rest.trim_start_matches('/');
    (!rest.is_empty()).then_some(rest)
}

pub trait Filesystem {
    /// Handle to an open file
    type File;
    /// Handle to a raw partition opened for erasing
    type Partition;

    fn mount(&mut self, mount_point: &str) -> Result<(), FsError>;

    fn unmount(&mut self, mount_point: &str) -> Result<(), FsError>;

    /// Open the raw partition underneath the filesystem, bypassing it
    fn open_partition(&mut self, id: PartitionId) -> Result<Self::Partition, FsError>;

    /// Erase the whole partition
    fn erase_partition(&mut self, partition: &mut Self::Partition) -> Result<(), FsError>;

    fn close_partition(&mut self, partition: Self::Partition);

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<Self::File, FsError>;

    /// Write `data` at the file position; returns the number of bytes written
    fn write(&mut self, file: &mut Self::File, data: &[u8]) -> Result<usize, FsError>;

    /// Read into `buf`; returns 0 at end of file
    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> Result<usize, FsError>;

    /// Current file length, including data written but not yet flushed
    fn size(&mut self, file: &Self::File) -> Result<usize, FsError>;

    /// Cut the file back to `len` bytes
    fn truncate(&mut self, file: &mut Self::File, len: usize) -> Result<(), FsError>;

    /// Flush and release the file
    fn close(&mut self, file: Self::File) -> Result<(), FsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_must_sit_below_the_mount_point() {
        assert_eq!(path_under("/lfs1", "/lfs1/sensor_data.bin"), Some("sensor_data.bin"));
        assert_eq!(path_under("/lfs1/", "/lfs1/a/b"), Some("a/b"));
        assert_eq!(path_under("/lfs1", "/lfs10/sensor_data.bin"), None);
        assert_eq!(path_under("/lfs1", "/lfs1"), None);
        assert_eq!(path_under("/lfs1", "/lfs1/"), None);
        assert_eq!(path_under("/lfs1", "/other/file"), None);
    }
}

//! Host directory standing in for a LittleFS flash partition.
//!
//! The directory is the partition. A superblock file marks it as formatted:
//! mounting an empty (or missing) directory formats it, mounting a directory
//! whose superblock is missing or damaged fails until the partition is erased.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use telelog_core::storage::{Filesystem, FsError, OpenMode, PartitionId, path_under};

const SUPERBLOCK: &str = ".superblock";
const SUPERBLOCK_MAGIC: &[u8] = b"telelog-fs v1\n";

pub struct DirFile {
    file: File,
}

pub struct DirPartition {
    id: PartitionId,
}

pub struct DirFlash {
    root: PathBuf,
    mount_point: Option<String>,
}

impl DirFlash {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mount_point: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Overwrite the superblock with garbage so the next mount fails
    pub fn corrupt_superblock(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::write(self.root.join(SUPERBLOCK), b"\xde\xad\xbe\xef")
    }

    fn format(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::write(self.root.join(SUPERBLOCK), SUPERBLOCK_MAGIC)
    }

    fn is_blank(&self) -> io::Result<bool> {
        match fs::read_dir(&self.root) {
            Ok(mut entries) => Ok(entries.next().is_none()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Map a path under the mount point to a file inside the partition
    fn host_path(&self, path: &str) -> Result<PathBuf, FsError> {
        let mount_point = self.mount_point.as_deref().ok_or(FsError::NotMounted)?;
        let relative = path_under(mount_point, path)
            .filter(|rest| *rest != SUPERBLOCK)
            .ok_or(FsError::NotFound)?;
        Ok(self.root.join(relative))
    }
}

fn io_error(e: io::Error) -> FsError {
    match e.kind() {
        io::ErrorKind::NotFound => FsError::NotFound,
        io::ErrorKind::StorageFull => FsError::NoSpace,
        _ => FsError::Io,
    }
}

impl Filesystem for DirFlash {
    type File = DirFile;
    type Partition = DirPartition;

    fn mount(&mut self, mount_point: &str) -> Result<(), FsError> {
        if self.is_blank().map_err(io_error)? {
            info!("Formatting blank partition at {}", self.root.display());
            self.format().map_err(io_error)?;
        }

        match fs::read(self.root.join(SUPERBLOCK)) {
            Ok(superblock) if superblock == SUPERBLOCK_MAGIC => {}
            Ok(_) => return Err(FsError::Corrupted),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(FsError::Corrupted),
            Err(e) => return Err(io_error(e)),
        }

        debug!("Mounted {} at {}", self.root.display(), mount_point);
        self.mount_point = Some(mount_point.to_string());
        Ok(())
    }

    fn unmount(&mut self, _mount_point: &str) -> Result<(), FsError> {
        self.mount_point.take().map(|_| ()).ok_or(FsError::NotMounted)
    }

    fn open_partition(&mut self, id: PartitionId) -> Result<DirPartition, FsError> {
        fs::create_dir_all(&self.root).map_err(|_| FsError::PartitionUnavailable)?;
        Ok(DirPartition { id })
    }

    fn erase_partition(&mut self, partition: &mut DirPartition) -> Result<(), FsError> {
        info!(
            "Erasing partition {} at {}",
            partition.id.0,
            self.root.display()
        );
        self.mount_point = None;
        fs::remove_dir_all(&self.root).map_err(|_| FsError::EraseFailed)?;
        fs::create_dir_all(&self.root).map_err(|_| FsError::EraseFailed)
    }

    fn close_partition(&mut self, _partition: DirPartition) {}

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<DirFile, FsError> {
        let host_path = self.host_path(path)?;
        let file = match mode {
            OpenMode::CreateAppend => OpenOptions::new()
                .create(true)
                .append(true)
                .open(host_path),
            OpenMode::ReadOnly => File::open(host_path),
        }
        .map_err(io_error)?;
        Ok(DirFile { file })
    }

    fn write(&mut self, file: &mut DirFile, data: &[u8]) -> Result<usize, FsError> {
        if self.mount_point.is_none() {
            return Err(FsError::NotMounted);
        }
        file.file.write(data).map_err(io_error)
    }

    fn read(&mut self, file: &mut DirFile, buf: &mut [u8]) -> Result<usize, FsError> {
        file.file.read(buf).map_err(io_error)
    }

    fn size(&mut self, file: &DirFile) -> Result<usize, FsError> {
        let len = file.file.metadata().map_err(io_error)?.len();
        usize::try_from(len).map_err(|_| FsError::Io)
    }

    fn truncate(&mut self, file: &mut DirFile, len: usize) -> Result<(), FsError> {
        file.file.set_len(len as u64).map_err(io_error)
    }

    fn close(&mut self, file: DirFile) -> Result<(), FsError> {
        file.file.sync_all().map_err(io_error)
    }
}

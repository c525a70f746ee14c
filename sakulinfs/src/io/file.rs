use crate::io::{Position, VolumeStorage};
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{ErrorKind, SeekFrom};
use std::path::Path;

/// Backs a volume with a regular file on the host.
pub struct FileVolume {
    fd: File,
    /// Cached length of the file, kept in step by `set_len`.
    size: u64,
}

impl FileVolume {
    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }

    fn check_range(&self, pos: Position, len: usize) -> std::io::Result<()> {
        let end = pos.checked_add(len as u64);
        match end {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "range {}..{} out of volume bounds ({} bytes)",
                    pos,
                    pos.saturating_add(len as u64),
                    self.size
                ),
            )),
        }
    }
}

impl VolumeStorage for FileVolume {
    fn open_volume<P: AsRef<Path>>(dest: P) -> std::io::Result<Self>
    where
        Self: std::marker::Sized,
    {
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dest)?;
        let size = fd.metadata()?.len();
        Ok(FileVolume { fd, size })
    }

    fn read_at(&mut self, pos: Position, buf: &mut [u8]) -> std::io::Result<()> {
        self.check_range(pos, buf.len())?;
        self.fd.seek(SeekFrom::Start(pos))?;
        self.fd.read_exact(buf)
    }

    fn write_at(&mut self, pos: Position, buf: &[u8]) -> std::io::Result<()> {
        self.check_range(pos, buf.len())?;
        self.fd.seek(SeekFrom::Start(pos))?;
        self.fd.write_all(buf)
    }

    fn len(&mut self) -> std::io::Result<u64> {
        Ok(self.size)
    }

    fn set_len(&mut self, size: u64) -> std::io::Result<()> {
        self.fd.set_len(size)?;
        self.size = size;
        Ok(())
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()?;
        Ok(())
    }
}

pub struct FileVolumeBuilder {
    fd: File,
    size: Option<u64>,
    clear: bool,
}

impl From<File> for FileVolumeBuilder {
    fn from(fd: File) -> Self {
        FileVolumeBuilder {
            fd,
            size: None,
            clear: true,
        }
    }
}

impl FileVolumeBuilder {
    /// Sets the number of bytes the backing file should hold.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Whether existing content is wiped before use. Defaults to true, pass false
    /// to reopen a file that already carries a volume.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    /// The builder assumes ownership of the file descriptor and, when clearing,
    /// does destructive things to prepare the file for use.
    pub fn build(self) -> std::io::Result<FileVolume> {
        let fd = self.fd;
        let size = match (self.clear, self.size) {
            (true, Some(size)) => {
                // Truncating first guarantees the whole medium reads back as zeroes.
                fd.set_len(0)?;
                fd.set_len(size)?;
                size
            }
            (true, None) => {
                return Err(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    "a size is required to clear the medium",
                ))
            }
            (false, Some(size)) => {
                fd.set_len(size)?;
                size
            }
            (false, None) => fd.metadata()?.len(),
        };
        Ok(FileVolume { fd, size })
    }
}

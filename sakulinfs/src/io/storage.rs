use std::path::Path;

/// A byte offset into the backing file.
pub type Position = u64;

/// Positioned access to the flat file a volume lives in.
///
/// Unlike a block device every transfer is addressed by byte offset and may have
/// any length. The volume layer owns all semantics, implementations only move bytes.
pub trait VolumeStorage {
    /// Opens the backing file at the specified path, creating an empty one if it
    /// does not exist. This method does not validate the content, it is up to the
    /// volume to check the superblock.
    fn open_volume<P: AsRef<Path>>(path: P) -> std::io::Result<Self>
    where
        Self: std::marker::Sized;
    /// Reads exactly `buf.len()` bytes starting at `pos`.
    ///
    /// # Errors
    ///
    /// Attempting to read past the end of the storage will return an error.
    fn read_at(&mut self, pos: Position, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes all of `buf` starting at `pos`.
    ///
    /// # Errors
    ///
    /// Attempting to write past the end of the storage will return an error, the
    /// storage is never grown implicitly.
    fn write_at(&mut self, pos: Position, buf: &[u8]) -> std::io::Result<()>;
    /// The current size of the storage in bytes.
    fn len(&mut self) -> std::io::Result<u64>;
    /// Truncates or zero-extends the storage to exactly `size` bytes.
    fn set_len(&mut self, size: u64) -> std::io::Result<()>;
    /// Flush any buffered IO from memory.
    fn sync(&mut self) -> std::io::Result<()>;
}

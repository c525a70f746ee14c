use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::error::{FsError, Result};
use crate::io::Position;
use crate::node::UNDEFINED;

type U64LE = zerocopy::byteorder::U64<zerocopy::byteorder::LittleEndian>;

pub const SB_MAGIC: &[u8; 8] = b"SakulinF";
pub const SB_SIZE: u64 = 64;
/// The chain always begins right after the superblock.
pub const FILE_INDEX_START: Position = SB_SIZE;

pub const ROOT_START: u64 = 16;
pub const EMPTY_START: u64 = 24;

/// The fixed 64 byte header at offset 0 of every volume.
///
/// Stores what is needed to mount the volume and verify the backing file was
/// formatted by us, plus the two list heads the rest of the engine hangs off:
/// the top-level sibling list and the free list.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone, Copy, Debug, PartialEq)]
pub struct SuperBlock {
    /// The 8 byte identifying string, `SakulinF`.
    sb_magic: [u8; 8],
    /// Must equal the length of the backing file.
    declared_size: U64LE,
    /// Head of the top-level sibling list.
    root: U64LE,
    /// Head of the free list.
    first_empty: U64LE,
    /// SHA-256 of the superuser password.
    password_digest: [u8; 32],
}

impl SuperBlock {
    pub fn new(declared_size: u64, password_digest: [u8; 32]) -> Self {
        Self {
            sb_magic: *SB_MAGIC,
            declared_size: U64LE::new(declared_size),
            root: U64LE::new(UNDEFINED),
            first_empty: U64LE::new(FILE_INDEX_START),
            password_digest,
        }
    }

    /// Reads the superblock from the first `SB_SIZE` bytes of `buf` and checks
    /// the magic constant.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let sb = Self::read_from_prefix(buf)
            .ok_or_else(|| FsError::format("SuperBlock::parse", "volume shorter than superblock"))?;
        if &sb.sb_magic != SB_MAGIC {
            return Err(FsError::format(
                "SuperBlock::parse",
                "superblock magic constant invalid",
            ));
        }
        Ok(sb)
    }

    pub fn serialize(&self) -> &[u8] {
        self.as_bytes()
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size.get()
    }

    pub fn root(&self) -> Position {
        self.root.get()
    }

    pub fn set_root(&mut self, pos: Position) {
        self.root.set(pos);
    }

    pub fn first_empty(&self) -> Position {
        self.first_empty.get()
    }

    pub fn set_first_empty(&mut self, pos: Position) {
        self.first_empty.set(pos);
    }

    pub fn password_digest(&self) -> &[u8; 32] {
        &self.password_digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_encode_and_decode_superblocks() {
        let mut sb = SuperBlock::new(65536, [7; 32]);
        sb.set_root(128);
        let encoded = sb.serialize().to_vec();

        assert_eq!(encoded.len() as u64, SB_SIZE);
        assert_eq!(&encoded[0..8], b"SakulinF");
        assert_eq!(&encoded[8..16], &65536u64.to_le_bytes());
        assert_eq!(&encoded[ROOT_START as usize..24], &128u64.to_le_bytes());
        assert_eq!(&encoded[EMPTY_START as usize..32], &64u64.to_le_bytes());
        assert_eq!(&encoded[32..64], &[7; 32]);

        assert_eq!(SuperBlock::parse(&encoded).unwrap(), sb);
    }

    #[test]
    fn parsing_buffer_with_invalid_magic_fails() {
        let zero_buffer_with_right_size = vec![0; 64];
        match SuperBlock::parse(&zero_buffer_with_right_size) {
            Err(FsError::Format { reason, .. }) => assert!(reason.contains("magic")),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn parsing_short_buffer_fails() {
        let wrong_size_buffer = vec![0; 40];
        assert!(SuperBlock::parse(&wrong_size_buffer).is_err());
    }
}

use log::{info, warn};

use crate::auth::digest;
use crate::error::{FsError, Result};
use crate::io::{Position, VolumeStorage};
use crate::node::{
    peek_tag, EmptyNode, FileNode, INode, Node, NodeTag, EXPANSION_OCC, MIN_REQUIRE_SIZE,
    NODE_HEADER_SIZE, UNDEFINED,
};
use crate::perm::Permission;
use crate::sb::{SuperBlock, EMPTY_START, FILE_INDEX_START, ROOT_START, SB_SIZE};

/// One open backing file.
///
/// # Layout
/// ========================================================================
/// | SuperBlock (64 bytes) | Data Region: File and Empty nodes, chained   |
/// ========================================================================
///
/// The superblock is cached and written through on every change. Nodes are
/// never cached, every access goes to the storage.
pub struct Volume<S: VolumeStorage> {
    pub(crate) dev: S,
    super_block: SuperBlock,
}

impl<S: VolumeStorage> Volume<S> {
    /// Resizes `dev` to `size` bytes and lays out an empty volume: the header
    /// followed by one free node spanning the whole data region. Destroys any
    /// prior content.
    pub fn format(mut dev: S, size: u64, root_password: &str) -> Result<Self> {
        if size < FILE_INDEX_START + MIN_REQUIRE_SIZE {
            return Err(FsError::InvalidArgument(format!(
                "volume of {} bytes is too small, need at least {}",
                size,
                FILE_INDEX_START + MIN_REQUIRE_SIZE
            )));
        }
        dev.set_len(size)?;

        let super_block = SuperBlock::new(size, digest(root_password));
        dev.write_at(0, super_block.serialize())?;

        let data_region = EmptyNode::new(
            UNDEFINED,
            UNDEFINED,
            size - FILE_INDEX_START,
            UNDEFINED,
            UNDEFINED,
        );
        dev.write_at(FILE_INDEX_START, &data_region.to_bytes())?;
        dev.sync()?;

        info!("formatted volume of {} bytes", size);
        Ok(Volume { dev, super_block })
    }

    /// Mounts an already formatted volume, checking the magic and that the
    /// declared size matches the backing file.
    pub fn open(mut dev: S) -> Result<Self> {
        let len = dev.len()?;
        if len < SB_SIZE {
            return Err(FsError::format(
                "Volume::open",
                format!("backing file of {} bytes cannot hold a superblock", len),
            ));
        }
        let mut buf = [0; SB_SIZE as usize];
        dev.read_at(0, &mut buf)?;
        let super_block = SuperBlock::parse(&buf)?;
        if super_block.declared_size() != len {
            return Err(FsError::format(
                "Volume::open",
                format!(
                    "declared size {} does not match backing file size {}",
                    super_block.declared_size(),
                    len
                ),
            ));
        }

        info!("opened volume of {} bytes", len);
        Ok(Volume { dev, super_block })
    }

    pub fn size(&self) -> u64 {
        self.super_block.declared_size()
    }

    /// Head of the top-level sibling list.
    pub fn root(&self) -> Position {
        self.super_block.root()
    }

    pub fn set_root(&mut self, pos: Position) -> Result<()> {
        self.write_u64(ROOT_START, pos)?;
        self.super_block.set_root(pos);
        Ok(())
    }

    /// Head of the free list.
    pub fn first_empty(&self) -> Position {
        self.super_block.first_empty()
    }

    pub(crate) fn update_first_empty(&mut self, pos: Position) -> Result<()> {
        self.write_u64(EMPTY_START, pos)?;
        self.super_block.set_first_empty(pos);
        Ok(())
    }

    pub fn assert_super_user(&self, password: &str) -> Result<()> {
        if &digest(password) == self.super_block.password_digest() {
            Ok(())
        } else {
            warn!("superuser authentication failed");
            Err(FsError::auth("Volume::assert_super_user", "wrong superuser password"))
        }
    }

    pub fn sync(&mut self) -> Result<()> {
        self.dev.sync()?;
        Ok(())
    }

    /// Returns ownership of the backing storage.
    pub fn into_storage(self) -> S {
        self.dev
    }

    pub(crate) fn read_u64(&mut self, pos: Position) -> Result<u64> {
        let mut buf = [0; 8];
        self.dev.read_at(pos, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub(crate) fn write_u64(&mut self, pos: Position, value: u64) -> Result<()> {
        self.dev.write_at(pos, &value.to_le_bytes())?;
        Ok(())
    }

    fn check_position(&self, pos: Position, func: &'static str) -> Result<()> {
        let fits = pos
            .checked_add(MIN_REQUIRE_SIZE)
            .map_or(false, |end| end <= self.size());
        if pos < FILE_INDEX_START || !fits {
            return Err(FsError::format(
                func,
                format!("position {} lies outside the data region", pos),
            ));
        }
        Ok(())
    }

    /// Tag of the node at `pos`, `None` for `UNDEFINED`.
    pub fn tag_at(&mut self, pos: Position) -> Result<Option<NodeTag>> {
        if pos == UNDEFINED {
            return Ok(None);
        }
        self.check_position(pos, "Volume::tag_at")?;
        let mut tag = [0; 4];
        self.dev.read_at(pos, &mut tag)?;
        match NodeTag::from_magic(&tag) {
            Some(tag) => Ok(Some(tag)),
            None => Err(FsError::format(
                "Volume::tag_at",
                format!("unknown node tag {:?} at {}", tag, pos),
            )),
        }
    }

    pub fn empty_at(&mut self, pos: Position) -> Result<EmptyNode> {
        self.check_position(pos, "Volume::empty_at")?;
        let mut buf = [0; MIN_REQUIRE_SIZE as usize];
        self.dev.read_at(pos, &mut buf)?;
        EmptyNode::parse(&buf)
    }

    /// Reads only the inode of the file node at `pos`, skipping the payload.
    pub fn file_inode_at(&mut self, pos: Position) -> Result<INode> {
        self.check_position(pos, "Volume::file_inode_at")?;
        let mut prefix = [0; NODE_HEADER_SIZE as usize + 1];
        self.dev.read_at(pos, &mut prefix)?;
        if peek_tag(&prefix) != Some(NodeTag::File) {
            return Err(FsError::format(
                "Volume::file_inode_at",
                format!("no file node at {}", pos),
            ));
        }
        let name_len = prefix[NODE_HEADER_SIZE as usize] as u64;
        let mut buf = vec![0; (INode::FIXED_SIZE + name_len) as usize];
        self.read_in_region(pos + FileNode::INODE_START, &mut buf, "Volume::file_inode_at")?;
        INode::parse(&buf)
    }

    pub fn file_at(&mut self, pos: Position) -> Result<FileNode> {
        let inode = self.file_inode_at(pos)?;
        let record_len = inode
            .size
            .checked_add(FileNode::INODE_START + inode.encoded_len() + EXPANSION_OCC)
            .filter(|len| *len <= self.size())
            .ok_or_else(|| {
                FsError::format("Volume::file_at", format!("oversized record at {}", pos))
            })?;
        let mut buf = vec![0; record_len as usize];
        self.read_in_region(pos, &mut buf, "Volume::file_at")?;
        FileNode::parse(&buf)
    }

    pub fn node_at(&mut self, pos: Position) -> Result<Node> {
        match self.tag_at(pos)? {
            Some(NodeTag::File) => self.file_at(pos).map(Node::File),
            Some(NodeTag::Empty) => self.empty_at(pos).map(Node::Empty),
            None => Err(FsError::format("Volume::node_at", "no node at position 0")),
        }
    }

    fn read_in_region(&mut self, pos: Position, buf: &mut [u8], func: &'static str) -> Result<()> {
        let fits = pos
            .checked_add(buf.len() as u64)
            .map_or(false, |end| end <= self.size());
        if !fits {
            return Err(FsError::format(
                func,
                format!("record at {} runs past the volume end", pos),
            ));
        }
        self.dev.read_at(pos, buf)?;
        Ok(())
    }

    /// Rewrites the sibling link of the file at `pos` in place.
    pub(crate) fn update_next_at(&mut self, pos: Position, next: Position) -> Result<()> {
        let inode = self.file_inode_at(pos)?;
        self.write_u64(pos + FileNode::INODE_START + inode.next_offset(), next)
    }

    pub(crate) fn update_permission_at(
        &mut self,
        pos: Position,
        permission: Permission,
    ) -> Result<()> {
        let inode = self.file_inode_at(pos)?;
        let at = pos + FileNode::INODE_START + inode.permission_offset();
        self.dev.write_at(at, &[permission.bits()])?;
        Ok(())
    }

    pub(crate) fn update_open_counter_at(&mut self, pos: Position, counter: i32) -> Result<()> {
        let inode = self.file_inode_at(pos)?;
        let at = pos + FileNode::INODE_START + inode.open_counter_offset();
        self.dev.write_at(at, &counter.to_le_bytes())?;
        Ok(())
    }

    /// Child list head stored as the payload of the folder at `pos`.
    pub fn folder_head_at(&mut self, pos: Position) -> Result<Position> {
        let inode = self.file_inode_at(pos)?;
        if !inode.is_folder() || inode.size != 8 {
            return Err(FsError::format(
                "Volume::folder_head_at",
                format!("{} at {} is not a folder", inode.name, pos),
            ));
        }
        self.read_u64(pos + FileNode::INODE_START + inode.encoded_len() + EXPANSION_OCC)
    }

    pub(crate) fn update_folder_head_at(&mut self, pos: Position, head: Position) -> Result<()> {
        let inode = self.file_inode_at(pos)?;
        debug_assert!(inode.is_folder());
        self.write_u64(pos + FileNode::INODE_START + inode.encoded_len() + EXPANSION_OCC, head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FileVolume, FileVolumeBuilder};

    fn create_test_device() -> FileVolume {
        FileVolumeBuilder::from(tempfile::tempfile().unwrap())
            .with_size(1)
            .build()
            .expect("Could not initialize backing file.")
    }

    #[test]
    fn format_writes_header_and_one_empty_node() {
        let mut vol = Volume::format(create_test_device(), 4096, "abc123").unwrap();

        assert_eq!(vol.size(), 4096);
        assert_eq!(vol.root(), UNDEFINED);
        assert_eq!(vol.first_empty(), FILE_INDEX_START);

        let empty = vol.empty_at(FILE_INDEX_START).unwrap();
        assert_eq!(empty, EmptyNode::new(0, 0, 4096 - 64, 0, 0));
    }

    #[test]
    fn too_small_volume_is_rejected() {
        match Volume::format(create_test_device(), 100, "pw") {
            Err(FsError::InvalidArgument(_)) => (),
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn can_format_and_reopen() {
        let disk = tempfile::NamedTempFile::new().unwrap();
        let dev = FileVolumeBuilder::from(disk.reopen().unwrap())
            .with_size(8192)
            .build()
            .unwrap();
        let mut vol = Volume::format(dev, 8192, "abc123").unwrap();
        vol.set_root(1234).unwrap();
        vol.sync().unwrap();

        let dev = FileVolumeBuilder::from(disk.reopen().unwrap())
            .clear_medium(false)
            .build()
            .unwrap();
        let vol = Volume::open(dev).unwrap();
        assert_eq!(vol.root(), 1234);
        assert_eq!(vol.size(), 8192);
        assert!(vol.assert_super_user("abc123").is_ok());
        assert!(matches!(
            vol.assert_super_user("abc124"),
            Err(FsError::Auth { .. })
        ));
    }

    #[test]
    fn unformatted_file_is_rejected() {
        let dev = FileVolumeBuilder::from(tempfile::tempfile().unwrap())
            .with_size(4096)
            .build()
            .unwrap();
        assert!(matches!(Volume::open(dev), Err(FsError::Format { .. })));
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let vol = Volume::format(create_test_device(), 4096, "pw").unwrap();
        let mut dev = vol.into_storage();
        dev.set_len(8192).unwrap();

        match Volume::open(dev) {
            Err(FsError::Format { reason, .. }) => assert!(reason.contains("declared size")),
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn positions_outside_data_region_are_format_errors() {
        let mut vol = Volume::format(create_test_device(), 4096, "pw").unwrap();

        assert!(vol.tag_at(UNDEFINED).unwrap().is_none());
        assert!(matches!(vol.tag_at(8), Err(FsError::Format { .. })));
        assert!(matches!(vol.empty_at(4090), Err(FsError::Format { .. })));
        assert!(matches!(vol.file_at(FILE_INDEX_START), Err(FsError::Format { .. })));
    }
}

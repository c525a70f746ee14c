//! Binary layout of everything living in the data region.
//!
//! Every node starts with the same 20 byte header:
//!
//! ```text
//! | tag 4 | last node 8 | next node 8 |
//! ```
//!
//! followed either by a file body
//!
//! ```text
//! | inode | expansion 8 | data |
//! ```
//!
//! where the inode is
//!
//! ```text
//! | name len 1 | name | size 8 | permission 1 | type 1 | open counter 4 | next 8 |
//! ```
//!
//! or by an empty body `| empty size 8 | last empty 8 | next empty 8 |`.
//! All integers are little endian.

use std::convert::TryFrom;
use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::error::{FsError, Result};
use crate::io::Position;
use crate::perm::Permission;

type U64LE = zerocopy::byteorder::U64<zerocopy::byteorder::LittleEndian>;

/// Marks "no node", position 0 always lies inside the superblock.
pub const UNDEFINED: Position = 0;

pub const NODE_HEADER_SIZE: u64 = 20;
pub const LAST_NODE_OFFSET: u64 = 4;
pub const NEXT_NODE_OFFSET: u64 = 12;

pub const EMPTY_SIZE_OFFSET: u64 = 20;
pub const LAST_EMPTY_OFFSET: u64 = 28;
pub const NEXT_EMPTY_OFFSET: u64 = 36;
/// An empty node is its own header, any span smaller than this cannot hold one.
pub const MIN_REQUIRE_SIZE: u64 = 44;

/// Width of the expansion size field that follows the inode.
pub const EXPANSION_OCC: u64 = 8;
pub const MAX_NAME_LEN: usize = 255;

#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone, Copy)]
struct RawHeader {
    tag: [u8; 4],
    last_node: U64LE,
    next_node: U64LE,
}

#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone, Copy)]
struct RawEmptyNode {
    header: RawHeader,
    empty_size: U64LE,
    last_empty: U64LE,
    next_empty: U64LE,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTag {
    File,
    Empty,
}

impl NodeTag {
    pub fn magic(self) -> &'static [u8; 4] {
        match self {
            NodeTag::File => b"FILE",
            NodeTag::Empty => b"EMPT",
        }
    }

    pub fn from_magic(magic: &[u8]) -> Option<Self> {
        match magic {
            b"FILE" => Some(NodeTag::File),
            b"EMPT" => Some(NodeTag::Empty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    UserFile = 0,
    Folder = 1,
}

impl TryFrom<u8> for FileType {
    type Error = FsError;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(FileType::UserFile),
            1 => Ok(FileType::Folder),
            other => Err(FsError::format(
                "INode::parse",
                format!("unknown file type {}", other),
            )),
        }
    }
}

fn truncated(func: &'static str) -> impl Fn(io::Error) -> FsError {
    move |e| FsError::format(func, format!("truncated record: {}", e))
}

/// Directory entry metadata embedded in every file node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct INode {
    pub name: String,
    /// Payload length in bytes.
    pub size: u64,
    pub permission: Permission,
    pub file_type: FileType,
    /// Non-zero while the file is checked out for editing.
    pub open_counter: i32,
    /// Next sibling in the same directory.
    pub next: Position,
}

impl INode {
    /// Bytes taken by every field except the name itself.
    pub const FIXED_SIZE: u64 = 23;

    pub fn new(name: &str, file_type: FileType, size: u64, permission: Permission) -> Self {
        Self {
            name: name.to_string(),
            size,
            permission,
            file_type,
            open_counter: 0,
            next: UNDEFINED,
        }
    }

    /// Names are 1..=255 bytes, contain no `/` and are not `.` or `..`.
    pub fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(FsError::InvalidArgument(format!(
                "name must be 1 to {} bytes long, got {}",
                MAX_NAME_LEN,
                name.len()
            )));
        }
        if name.contains('/') || name == "." || name == ".." {
            return Err(FsError::InvalidArgument(format!("illegal name {:?}", name)));
        }
        Ok(())
    }

    pub fn is_folder(&self) -> bool {
        self.file_type == FileType::Folder
    }

    pub fn is_locked(&self) -> bool {
        self.open_counter > 0
    }

    pub fn encoded_len(&self) -> u64 {
        self.name.len() as u64 + Self::FIXED_SIZE
    }

    /// Offsets of the mutable fields, relative to the start of the inode.
    pub(crate) fn permission_offset(&self) -> u64 {
        1 + self.name.len() as u64 + 8
    }

    pub(crate) fn open_counter_offset(&self) -> u64 {
        self.permission_offset() + 2
    }

    pub(crate) fn next_offset(&self) -> u64 {
        self.open_counter_offset() + 4
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        if self.name.len() > MAX_NAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("name of {} bytes does not fit the length prefix", self.name.len()),
            ));
        }
        w.write_u8(self.name.len() as u8)?;
        w.write_all(self.name.as_bytes())?;
        w.write_u64::<LittleEndian>(self.size)?;
        w.write_u8(self.permission.bits())?;
        w.write_u8(self.file_type as u8)?;
        w.write_i32::<LittleEndian>(self.open_counter)?;
        w.write_u64::<LittleEndian>(self.next)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len() as usize);
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut buf);
        buf
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let eof = truncated("INode::parse");
        let name_len = r.read_u8().map_err(&eof)?;
        let mut name = vec![0; name_len as usize];
        r.read_exact(&mut name).map_err(&eof)?;
        let name = String::from_utf8(name)
            .map_err(|_| FsError::format("INode::parse", "name is not valid utf-8"))?;
        let size = r.read_u64::<LittleEndian>().map_err(&eof)?;
        let permission = Permission::from_byte(r.read_u8().map_err(&eof)?);
        let file_type = FileType::try_from(r.read_u8().map_err(&eof)?)?;
        let open_counter = r.read_i32::<LittleEndian>().map_err(&eof)?;
        let next = r.read_u64::<LittleEndian>().map_err(&eof)?;
        Ok(Self {
            name,
            size,
            permission,
            file_type,
            open_counter,
            next,
        })
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        Self::read_from(&mut Cursor::new(buf))
    }
}

/// A live allocation: metadata plus payload. `expansion_size` counts slack
/// bytes absorbed from a free remainder too small to stand on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub last_node: Position,
    pub next_node: Position,
    pub inode: INode,
    pub expansion_size: u64,
    pub data: Vec<u8>,
}

impl FileNode {
    pub const INODE_START: u64 = NODE_HEADER_SIZE;

    /// Builds an unlinked node, the inode size is taken from `data`.
    pub fn new(mut inode: INode, data: Vec<u8>) -> Self {
        inode.size = data.len() as u64;
        Self {
            last_node: UNDEFINED,
            next_node: UNDEFINED,
            inode,
            expansion_size: 0,
            data,
        }
    }

    /// Span a node holding `inode` and `payload_len` bytes needs, without slack.
    pub fn required_size(inode: &INode, payload_len: u64) -> u64 {
        Self::INODE_START + inode.encoded_len() + EXPANSION_OCC + payload_len
    }

    /// Span the node occupies in the chain, slack included.
    pub fn main_size(&self) -> u64 {
        debug_assert_eq!(self.data.len() as u64, self.inode.size);
        Self::required_size(&self.inode, self.inode.size) + self.expansion_size
    }

    /// Offset of the first payload byte from the start of the node.
    pub fn data_offset(&self) -> u64 {
        Self::INODE_START + self.inode.encoded_len() + EXPANSION_OCC
    }

    /// Encodes header, inode, expansion size and payload. The slack bytes
    /// themselves are not part of the record.
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = RawHeader {
            tag: *NodeTag::File.magic(),
            last_node: U64LE::new(self.last_node),
            next_node: U64LE::new(self.next_node),
        };
        let mut buf = Vec::with_capacity((self.main_size() - self.expansion_size) as usize);
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(&self.inode.to_bytes());
        buf.extend_from_slice(&self.expansion_size.to_le_bytes());
        buf.extend_from_slice(&self.data);
        debug_assert_eq!(buf.len() as u64 + self.expansion_size, self.main_size());
        buf
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        let header = parse_header(buf, NodeTag::File, "FileNode::parse")?;
        let eof = truncated("FileNode::parse");
        let mut cursor = Cursor::new(&buf[NODE_HEADER_SIZE as usize..]);
        let inode = INode::read_from(&mut cursor)?;
        let expansion_size = cursor.read_u64::<LittleEndian>().map_err(&eof)?;
        let remaining = buf.len() as u64 - NODE_HEADER_SIZE - cursor.position();
        if inode.size > remaining {
            return Err(FsError::format(
                "FileNode::parse",
                format!("payload of {} bytes exceeds record", inode.size),
            ));
        }
        let mut data = vec![0; inode.size as usize];
        cursor.read_exact(&mut data).map_err(&eof)?;
        Ok(Self {
            last_node: header.last_node.get(),
            next_node: header.next_node.get(),
            inode,
            expansion_size,
            data,
        })
    }
}

/// A free span of the data region, linked both into the chain and into the
/// free list. `empty_size` is the whole span, header included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmptyNode {
    pub last_node: Position,
    pub next_node: Position,
    pub empty_size: u64,
    pub last_empty: Position,
    pub next_empty: Position,
}

impl EmptyNode {
    pub fn new(
        last_node: Position,
        next_node: Position,
        empty_size: u64,
        last_empty: Position,
        next_empty: Position,
    ) -> Self {
        Self {
            last_node,
            next_node,
            empty_size,
            last_empty,
            next_empty,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let raw = RawEmptyNode {
            header: RawHeader {
                tag: *NodeTag::Empty.magic(),
                last_node: U64LE::new(self.last_node),
                next_node: U64LE::new(self.next_node),
            },
            empty_size: U64LE::new(self.empty_size),
            last_empty: U64LE::new(self.last_empty),
            next_empty: U64LE::new(self.next_empty),
        };
        raw.as_bytes().to_vec()
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        parse_header(buf, NodeTag::Empty, "EmptyNode::parse")?;
        let raw = RawEmptyNode::read_from_prefix(buf)
            .ok_or_else(|| FsError::format("EmptyNode::parse", "truncated record"))?;
        Ok(Self {
            last_node: raw.header.last_node.get(),
            next_node: raw.header.next_node.get(),
            empty_size: raw.empty_size.get(),
            last_empty: raw.last_empty.get(),
            next_empty: raw.next_empty.get(),
        })
    }
}

fn parse_header(buf: &[u8], expected: NodeTag, func: &'static str) -> Result<RawHeader> {
    let header = RawHeader::read_from_prefix(buf)
        .ok_or_else(|| FsError::format(func, "truncated node header"))?;
    match NodeTag::from_magic(&header.tag) {
        Some(tag) if tag == expected => Ok(header),
        _ => Err(FsError::format(
            func,
            format!("expected {:?} node, found tag {:?}", expected, header.tag),
        )),
    }
}

/// Reads only the tag of an encoded node.
pub fn peek_tag(buf: &[u8]) -> Option<NodeTag> {
    buf.get(..4).and_then(NodeTag::from_magic)
}

/// One decoded chain element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    File(FileNode),
    Empty(EmptyNode),
}

impl Node {
    pub fn tag(&self) -> NodeTag {
        match self {
            Node::File(_) => NodeTag::File,
            Node::Empty(_) => NodeTag::Empty,
        }
    }

    pub fn last_node(&self) -> Position {
        match self {
            Node::File(f) => f.last_node,
            Node::Empty(e) => e.last_node,
        }
    }

    pub fn next_node(&self) -> Position {
        match self {
            Node::File(f) => f.next_node,
            Node::Empty(e) => e.next_node,
        }
    }

    /// Bytes of the data region covered by this node.
    pub fn span(&self) -> u64 {
        match self {
            Node::File(f) => f.main_size(),
            Node::Empty(e) => e.empty_size,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        match peek_tag(buf) {
            Some(NodeTag::File) => FileNode::parse(buf).map(Node::File),
            Some(NodeTag::Empty) => EmptyNode::parse(buf).map(Node::Empty),
            None => Err(FsError::format("Node::parse", "unknown node tag")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> FileNode {
        let mut node = FileNode::new(
            INode::new("notes.txt", FileType::UserFile, 0, Permission::OPEN),
            b"hello world".to_vec(),
        );
        node.last_node = 64;
        node.next_node = 300;
        node.expansion_size = 12;
        node.inode.next = 512;
        node.inode.open_counter = 1;
        node
    }

    #[test]
    fn inode_layout_matches_declared_widths() {
        let inode = INode::new("ab", FileType::Folder, 8, Permission::ADMIN_ONLY);
        let bytes = inode.to_bytes();

        assert_eq!(bytes.len() as u64, inode.encoded_len());
        assert_eq!(bytes.len(), 2 + 23);
        assert_eq!(bytes[0], 2);
        assert_eq!(&bytes[1..3], b"ab");
        assert_eq!(&bytes[3..11], &8u64.to_le_bytes());
        assert_eq!(bytes[inode.permission_offset() as usize], 0b110_000);
        assert_eq!(bytes[inode.permission_offset() as usize + 1], 1);
        assert_eq!(inode.next_offset(), 17);
    }

    #[test]
    fn file_node_survives_encoding() {
        let node = sample_file();
        let bytes = node.to_bytes();

        assert_eq!(&bytes[0..4], b"FILE");
        assert_eq!(bytes.len() as u64 + node.expansion_size, node.main_size());
        assert_eq!(FileNode::parse(&bytes).unwrap(), node);
    }

    #[test]
    fn main_size_counts_header_inode_expansion_and_payload() {
        let node = sample_file();
        assert_eq!(node.main_size(), 20 + (9 + 23) + 8 + 11 + 12);
        assert_eq!(node.data_offset(), 20 + 9 + 23 + 8);
    }

    #[test]
    fn empty_node_is_exactly_min_require_size() {
        let node = EmptyNode::new(64, 0, 4000, 0, 9000);
        let bytes = node.to_bytes();

        assert_eq!(bytes.len() as u64, MIN_REQUIRE_SIZE);
        assert_eq!(&bytes[0..4], b"EMPT");
        assert_eq!(&bytes[EMPTY_SIZE_OFFSET as usize..28], &4000u64.to_le_bytes());
        assert_eq!(&bytes[NEXT_EMPTY_OFFSET as usize..44], &9000u64.to_le_bytes());
        assert_eq!(EmptyNode::parse(&bytes).unwrap(), node);
    }

    #[test]
    fn node_dispatches_on_tag() {
        let file = sample_file();
        let empty = EmptyNode::new(0, 0, 100, 0, 0);

        assert_eq!(Node::parse(&file.to_bytes()).unwrap(), Node::File(file.clone()));
        assert_eq!(Node::parse(&empty.to_bytes()).unwrap().span(), 100);
        assert_eq!(peek_tag(b"EMPTxxxx"), Some(NodeTag::Empty));
        assert_eq!(peek_tag(b"FI"), None);
    }

    #[test]
    fn corrupt_records_are_format_errors() {
        let mut bytes = sample_file().to_bytes();

        assert!(matches!(Node::parse(b"JUNKJUNK"), Err(FsError::Format { .. })));
        assert!(matches!(
            EmptyNode::parse(&bytes),
            Err(FsError::Format { .. })
        ));
        assert!(matches!(
            FileNode::parse(&bytes[..bytes.len() - 1]),
            Err(FsError::Format { .. })
        ));

        let type_at = (NODE_HEADER_SIZE + sample_file().inode.permission_offset() + 1) as usize;
        bytes[type_at] = 7;
        assert!(matches!(FileNode::parse(&bytes), Err(FsError::Format { .. })));
    }

    #[test]
    fn names_are_validated() {
        assert!(INode::validate_name("a.txt").is_ok());
        assert!(INode::validate_name(&"x".repeat(255)).is_ok());
        assert!(INode::validate_name("").is_err());
        assert!(INode::validate_name(&"x".repeat(256)).is_err());
        assert!(INode::validate_name("a/b").is_err());
        assert!(INode::validate_name("..").is_err());
    }
}

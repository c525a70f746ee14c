//! SakulinFS: a small filesystem living inside one flat backing file.
//!
//! Everything on the volume is addressed by byte position. A 64 byte
//! superblock is followed by a physically ordered chain of file and empty
//! nodes; the empty ones double as a first-fit free list. Directories are
//! sibling lists threaded through the inodes.
//!
//! ```no_run
//! use sakulinfs::io::{FileVolume, VolumeStorage};
//! use sakulinfs::{FileSystem, Role, Session};
//!
//! # fn main() -> sakulinfs::Result<()> {
//! let dev = FileVolume::open_volume("disk.img")?;
//! let mut fs = FileSystem::format(dev, 64 * 1024, "abc123")?;
//! let mut session = Session::new();
//! fs.change_role(&mut session, Role::Admin, "abc123")?;
//! fs.create_dir(&session, "/docs", None)?;
//! fs.create_file(&session, "/docs/a.txt", b"hello", None)?;
//! # Ok(())
//! # }
//! ```

mod alloc;
mod auth;
mod error;
mod fs;
pub mod io;
mod node;
mod perm;
mod sb;
mod session;
mod volume;

pub use crate::auth::{digest, PasswordDigest, UserItem, UserTable, DIGEST_LEN, USER_TABLE_NAME};
pub use crate::error::{FsError, Result};
pub use crate::fs::{DirEntry, EditSession, FileSystem};
pub use crate::node::{
    EmptyNode, FileNode, FileType, INode, Node, NodeTag, MAX_NAME_LEN, MIN_REQUIRE_SIZE, UNDEFINED,
};
pub use crate::perm::{Operation, Permission, PermissionGroup, Role};
pub use crate::sb::{SuperBlock, FILE_INDEX_START, SB_MAGIC, SB_SIZE};
pub use crate::session::Session;
pub use crate::volume::Volume;

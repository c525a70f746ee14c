use log::{debug, info, warn};

use crate::auth::{UserItem, UserTable, USER_TABLE_NAME};
use crate::error::{FsError, Result};
use crate::io::{Position, VolumeStorage};
use crate::node::{FileNode, FileType, INode, Node, MIN_REQUIRE_SIZE, UNDEFINED};
use crate::perm::{Operation, Permission, Role};
use crate::session::Session;
use crate::volume::Volume;

/// One line of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileType,
    pub size: u64,
    pub permission: Permission,
    pub locked: bool,
    pub position: Position,
}

impl DirEntry {
    fn new(position: Position, inode: INode) -> Self {
        Self {
            locked: inode.is_locked(),
            name: inode.name,
            kind: inode.file_type,
            size: inode.size,
            permission: inode.permission,
            position,
        }
    }
}

/// An exclusive checkout of one file, obtained from [`FileSystem::edit_file`].
///
/// The file stays locked on disk until the session is handed back through
/// [`FileSystem::commit_edit`] or [`FileSystem::cancel_edit`].
#[derive(Debug)]
pub struct EditSession {
    path: String,
    inode: INode,
    data: Vec<u8>,
}

impl EditSession {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn inode(&self) -> &INode {
        &self.inode
    }

    /// Payload at the time of checkout.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Owner of a sibling list: either the volume root or a folder node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parent {
    Root,
    Dir(Position),
}

impl Parent {
    fn head<S: VolumeStorage>(self, volume: &mut Volume<S>) -> Result<Position> {
        match self {
            Parent::Root => Ok(volume.root()),
            Parent::Dir(pos) => volume.folder_head_at(pos),
        }
    }

    fn set_head<S: VolumeStorage>(self, volume: &mut Volume<S>, head: Position) -> Result<()> {
        match self {
            Parent::Root => volume.set_root(head),
            Parent::Dir(pos) => volume.update_folder_head_at(pos, head),
        }
    }
}

/// A resolved entry together with what is needed to unlink or replace it.
#[derive(Debug, Clone)]
struct Located {
    parent: Parent,
    /// Preceding sibling, `None` when the entry is the list head.
    prev: Option<Position>,
    pos: Position,
    inode: INode,
}

/// Splits an absolute path into validated components. `.` is dropped and
/// `..` removes the previous component.
fn parse_path(path: &str) -> Result<Vec<String>> {
    if !path.starts_with('/') {
        return Err(FsError::InvalidArgument(format!(
            "path must start with \"/\", got {:?}",
            path
        )));
    }
    let mut components: Vec<String> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => (),
            ".." => {
                if components.pop().is_none() {
                    return Err(FsError::InvalidArgument(format!(
                        "{:?} climbs above the root",
                        path
                    )));
                }
            }
            name => {
                INode::validate_name(name)?;
                components.push(name.to_string());
            }
        }
    }
    Ok(components)
}

fn join(components: &[String]) -> String {
    format!("/{}", components.join("/"))
}

/// The directory tree, user table and write locks on top of a [`Volume`].
pub struct FileSystem<S: VolumeStorage> {
    volume: Volume<S>,
}

impl<S: VolumeStorage> FileSystem<S> {
    /// Formats `dev` and creates the admin-only user table at `/user.map`.
    pub fn format(dev: S, size: u64, root_password: &str) -> Result<Self> {
        let mut fs = FileSystem {
            volume: Volume::format(dev, size, root_password)?,
        };
        fs.insert(
            Parent::Root,
            USER_TABLE_NAME,
            FileType::UserFile,
            &[],
            Permission::ADMIN_ONLY,
            "FileSystem::format",
        )?;
        fs.volume.sync()?;
        Ok(fs)
    }

    pub fn open(dev: S) -> Result<Self> {
        Ok(FileSystem {
            volume: Volume::open(dev)?,
        })
    }

    pub fn volume(&self) -> &Volume<S> {
        &self.volume
    }

    pub fn sync(&mut self) -> Result<()> {
        self.volume.sync()
    }

    pub fn into_storage(self) -> S {
        self.volume.into_storage()
    }

    /// Switches the session's role. Entering `Role::Admin` needs the superuser
    /// password, dropping to `Role::User` needs nothing.
    pub fn change_role(&self, session: &mut Session, role: Role, password: &str) -> Result<()> {
        if role == Role::Admin {
            self.volume.assert_super_user(password)?;
        }
        session.set_role(role);
        info!("session role changed to {:?}", role);
        Ok(())
    }

    /// Logs `session` in as a registered user.
    pub fn login(&mut self, session: &mut Session, username: &str, password: &str) -> Result<()> {
        let table = self.load_user_table()?;
        match table.login(username, password) {
            Some(user) => {
                session.set_user(user.username.clone());
                info!("user {:?} logged in", username);
                Ok(())
            }
            None => {
                warn!("login failed for user {:?}", username);
                Err(FsError::auth(
                    "FileSystem::login",
                    format!("unknown user {:?} or wrong password", username),
                ))
            }
        }
    }

    /// Adds a user to `/user.map`. Only an admin session may do this.
    pub fn register_user(
        &mut self,
        session: &Session,
        username: &str,
        password: &str,
    ) -> Result<()> {
        const FUNC: &str = "FileSystem::register_user";
        let path = join(&[USER_TABLE_NAME.to_string()]);
        session.require_login(FUNC)?;
        if session.role() != Role::Admin {
            return Err(FsError::PermissionDenied {
                func: FUNC,
                path,
                op: Operation::Edit,
                role: session.role(),
            });
        }
        let located = self
            .lookup(Parent::Root, USER_TABLE_NAME)?
            .ok_or_else(|| FsError::not_found(FUNC, path.as_str()))?;
        session.require(located.inode.permission, Operation::Edit, FUNC, &path)?;

        let mut table = UserTable::parse(&self.volume.file_at(located.pos)?.data)?;
        table.push_user(UserItem::new(username, password))?;
        self.replace(&located, &table.to_bytes(), FUNC)?;
        info!("registered user {:?}", username);
        Ok(())
    }

    fn load_user_table(&mut self) -> Result<UserTable> {
        let located = self.lookup(Parent::Root, USER_TABLE_NAME)?.ok_or_else(|| {
            FsError::not_found("FileSystem::load_user_table", join(&[USER_TABLE_NAME.to_string()]))
        })?;
        UserTable::parse(&self.volume.file_at(located.pos)?.data)
    }

    pub fn create_dir(
        &mut self,
        session: &Session,
        path: &str,
        permission: Option<Permission>,
    ) -> Result<Position> {
        self.create(
            session,
            path,
            FileType::Folder,
            &UNDEFINED.to_le_bytes(),
            permission,
            "FileSystem::create_dir",
        )
    }

    pub fn create_file(
        &mut self,
        session: &Session,
        path: &str,
        data: &[u8],
        permission: Option<Permission>,
    ) -> Result<Position> {
        self.create(
            session,
            path,
            FileType::UserFile,
            data,
            permission,
            "FileSystem::create_file",
        )
    }

    fn create(
        &mut self,
        session: &Session,
        path: &str,
        file_type: FileType,
        data: &[u8],
        permission: Option<Permission>,
        func: &'static str,
    ) -> Result<Position> {
        session.require_login(func)?;
        let components = parse_path(path)?;
        let (name, dir) = match components.split_last() {
            Some(split) => split,
            None => {
                return Err(FsError::InvalidArgument(
                    "the root directory always exists".to_string(),
                ))
            }
        };
        let parent = self.resolve_dir(dir, func)?;
        if let Parent::Dir(pos) = parent {
            let folder = self.volume.file_inode_at(pos)?;
            session.require(folder.permission, Operation::Edit, func, &join(dir))?;
        }
        self.insert(parent, name, file_type, data, permission.unwrap_or_default(), func)
    }

    /// Allocates a node and appends it to the sibling list of `parent`.
    fn insert(
        &mut self,
        parent: Parent,
        name: &str,
        file_type: FileType,
        data: &[u8],
        permission: Permission,
        func: &'static str,
    ) -> Result<Position> {
        let siblings = self.children(parent)?;
        if siblings.iter().any(|(_, inode)| inode.name == name) {
            return Err(FsError::DuplicateName {
                func,
                name: name.to_string(),
            });
        }

        let inode = INode::new(name, file_type, data.len() as u64, permission);
        let pos = self.volume.add_file(&inode, data)?.ok_or(FsError::OutOfSpace {
            func,
            required: FileNode::required_size(&inode, data.len() as u64),
        })?;
        match siblings.last() {
            Some((tail, _)) => self.volume.update_next_at(*tail, pos)?,
            None => parent.set_head(&mut self.volume, pos)?,
        }
        debug!("{}: linked {:?} at {}", func, name, pos);
        Ok(pos)
    }

    /// Entries of one sibling list, in list order.
    fn children(&mut self, parent: Parent) -> Result<Vec<(Position, INode)>> {
        let limit = self.volume.size() / MIN_REQUIRE_SIZE;
        let mut entries = Vec::new();
        let mut pos = parent.head(&mut self.volume)?;
        while pos != UNDEFINED {
            if entries.len() as u64 > limit {
                return Err(FsError::format("FileSystem::children", "sibling list has a cycle"));
            }
            let inode = self.volume.file_inode_at(pos)?;
            let next = inode.next;
            entries.push((pos, inode));
            pos = next;
        }
        Ok(entries)
    }

    fn lookup(&mut self, parent: Parent, name: &str) -> Result<Option<Located>> {
        let mut prev = None;
        for (pos, inode) in self.children(parent)? {
            if inode.name == name {
                return Ok(Some(Located {
                    parent,
                    prev,
                    pos,
                    inode,
                }));
            }
            prev = Some(pos);
        }
        Ok(None)
    }

    /// Walks `components`, each of which must name a folder.
    fn resolve_dir(&mut self, components: &[String], func: &'static str) -> Result<Parent> {
        let mut parent = Parent::Root;
        for (depth, name) in components.iter().enumerate() {
            let walked = join(&components[..=depth]);
            let located = self
                .lookup(parent, name)?
                .ok_or_else(|| FsError::not_found(func, walked.as_str()))?;
            if !located.inode.is_folder() {
                return Err(FsError::TypeMismatch {
                    func,
                    path: walked,
                    expected: "directory",
                });
            }
            parent = Parent::Dir(located.pos);
        }
        Ok(parent)
    }

    fn resolve(&mut self, components: &[String], func: &'static str) -> Result<Located> {
        let (name, dir) = components.split_last().ok_or_else(|| {
            FsError::InvalidArgument("the root directory has no node of its own".to_string())
        })?;
        let parent = self.resolve_dir(dir, func)?;
        self.lookup(parent, name)?
            .ok_or_else(|| FsError::not_found(func, join(components)))
    }

    /// Resolves `path` to a regular file, rejecting folders.
    fn resolve_file(&mut self, path: &str, func: &'static str) -> Result<(String, Located)> {
        let components = parse_path(path)?;
        let located = self.resolve(&components, func)?;
        let path = join(&components);
        if located.inode.is_folder() {
            return Err(FsError::TypeMismatch {
                func,
                path,
                expected: "file",
            });
        }
        Ok((path, located))
    }

    /// Lists a folder, or the root for `/`.
    pub fn list_dir(&mut self, session: &Session, path: &str) -> Result<Vec<DirEntry>> {
        const FUNC: &str = "FileSystem::list_dir";
        session.require_login(FUNC)?;
        let components = parse_path(path)?;
        let parent = if components.is_empty() {
            Parent::Root
        } else {
            let located = self.resolve(&components, FUNC)?;
            if !located.inode.is_folder() {
                return Err(FsError::TypeMismatch {
                    func: FUNC,
                    path: join(&components),
                    expected: "directory",
                });
            }
            session.require(located.inode.permission, Operation::Read, FUNC, &join(&components))?;
            Parent::Dir(located.pos)
        };
        Ok(self
            .children(parent)?
            .into_iter()
            .map(|(pos, inode)| DirEntry::new(pos, inode))
            .collect())
    }

    pub fn stat(&mut self, session: &Session, path: &str) -> Result<INode> {
        session.require_login("FileSystem::stat")?;
        let components = parse_path(path)?;
        Ok(self.resolve(&components, "FileSystem::stat")?.inode)
    }

    pub fn read_file(&mut self, session: &Session, path: &str) -> Result<Vec<u8>> {
        self.read_payload(session, path, Operation::Read, "FileSystem::read_file")
    }

    /// Payload of a file the session may execute, for an external runner.
    pub fn read_executable(&mut self, session: &Session, path: &str) -> Result<Vec<u8>> {
        self.read_payload(session, path, Operation::Execute, "FileSystem::read_executable")
    }

    fn read_payload(
        &mut self,
        session: &Session,
        path: &str,
        op: Operation,
        func: &'static str,
    ) -> Result<Vec<u8>> {
        session.require_login(func)?;
        let (path, located) = self.resolve_file(path, func)?;
        session.require(located.inode.permission, op, func, &path)?;
        Ok(self.volume.file_at(located.pos)?.data)
    }

    /// Replaces the payload of an existing file.
    pub fn write_file(&mut self, session: &Session, path: &str, data: &[u8]) -> Result<Position> {
        const FUNC: &str = "FileSystem::write_file";
        session.require_login(FUNC)?;
        let (path, located) = self.resolve_file(path, FUNC)?;
        session.require(located.inode.permission, Operation::Edit, FUNC, &path)?;
        if located.inode.is_locked() {
            warn!("{}: {} is checked out for editing", FUNC, path);
            return Err(FsError::Locked { func: FUNC, path });
        }
        self.replace(&located, data, FUNC)
    }

    pub fn set_permission(
        &mut self,
        session: &Session,
        path: &str,
        permission: Permission,
    ) -> Result<()> {
        const FUNC: &str = "FileSystem::set_permission";
        session.require_login(FUNC)?;
        let components = parse_path(path)?;
        let located = self.resolve(&components, FUNC)?;
        session.require(located.inode.permission, Operation::Edit, FUNC, &join(&components))?;
        self.volume.update_permission_at(located.pos, permission)
    }

    pub fn remove_file(&mut self, session: &Session, path: &str) -> Result<()> {
        const FUNC: &str = "FileSystem::remove_file";
        session.require_login(FUNC)?;
        let (path, located) = self.resolve_file(path, FUNC)?;
        if located.parent == Parent::Root && located.inode.name == USER_TABLE_NAME {
            return Err(FsError::InvalidArgument(format!(
                "{} holds the registered users and cannot be removed",
                path
            )));
        }
        session.require(located.inode.permission, Operation::Edit, FUNC, &path)?;
        if located.inode.is_locked() {
            warn!("{}: {} is checked out for editing", FUNC, path);
            return Err(FsError::Locked { func: FUNC, path });
        }
        self.unlink(&located)?;
        self.volume.remove_file_at(located.pos)?;
        debug!("{}: removed {}", FUNC, path);
        Ok(())
    }

    /// Removes a folder and everything below it. Nothing is changed unless the
    /// session may edit every node of the subtree and none of them is locked.
    pub fn remove_dir(&mut self, session: &Session, path: &str) -> Result<()> {
        const FUNC: &str = "FileSystem::remove_dir";
        session.require_login(FUNC)?;
        let components = parse_path(path)?;
        if components.is_empty() {
            return Err(FsError::InvalidArgument(
                "the root directory cannot be removed".to_string(),
            ));
        }
        let located = self.resolve(&components, FUNC)?;
        let path = join(&components);
        if !located.inode.is_folder() {
            return Err(FsError::TypeMismatch {
                func: FUNC,
                path,
                expected: "directory",
            });
        }

        self.check_removable(session, located.pos, &located.inode, &path)?;
        self.unlink(&located)?;
        self.release_subtree(located.pos, true)?;
        debug!("{}: removed {}", FUNC, path);
        Ok(())
    }

    fn check_removable(
        &mut self,
        session: &Session,
        pos: Position,
        inode: &INode,
        path: &str,
    ) -> Result<()> {
        const FUNC: &str = "FileSystem::remove_dir";
        session.require(inode.permission, Operation::Edit, FUNC, path)?;
        if inode.is_locked() {
            warn!("{}: {} is checked out for editing", FUNC, path);
            return Err(FsError::Locked {
                func: FUNC,
                path: path.to_string(),
            });
        }
        if inode.is_folder() {
            for (child, child_inode) in self.children(Parent::Dir(pos))? {
                let child_path = format!("{}/{}", path, child_inode.name);
                self.check_removable(session, child, &child_inode, &child_path)?;
            }
        }
        Ok(())
    }

    /// Releases `pos` and, for a folder, all of its descendants first.
    fn release_subtree(&mut self, pos: Position, is_folder: bool) -> Result<()> {
        if is_folder {
            for (child, inode) in self.children(Parent::Dir(pos))? {
                self.release_subtree(child, inode.is_folder())?;
            }
        }
        self.volume.remove_file_at(pos)
    }

    fn unlink(&mut self, located: &Located) -> Result<()> {
        self.point_at(located, located.inode.next)
    }

    /// Makes whatever referenced `located` reference `target` instead.
    fn point_at(&mut self, located: &Located, target: Position) -> Result<()> {
        match located.prev {
            Some(prev) => self.volume.update_next_at(prev, target),
            None => located.parent.set_head(&mut self.volume, target),
        }
    }

    /// Swaps the node of `located` for one carrying `data`, keeping name,
    /// permission and sibling slot. The new node is always unlocked. When the
    /// payload does not fit, the old payload is put back and `OutOfSpace` is
    /// returned.
    fn replace(&mut self, located: &Located, data: &[u8], func: &'static str) -> Result<Position> {
        let old = self.volume.file_at(located.pos)?;
        let mut inode = old.inode;
        inode.open_counter = 0;

        self.volume.remove_file_at(located.pos)?;
        let (pos, result) = match self.volume.add_file(&inode, data)? {
            Some(pos) => (pos, Ok(pos)),
            None => {
                let required = FileNode::required_size(&inode, data.len() as u64);
                // The old span was just released, so the old payload fits again.
                let pos = self.volume.add_file(&inode, &old.data)?.ok_or_else(|| {
                    FsError::format(func, "released span vanished while restoring")
                })?;
                warn!("{}: {:?} needs {} bytes, kept old payload", func, inode.name, required);
                (pos, Err(FsError::OutOfSpace { func, required }))
            }
        };
        self.point_at(located, pos)?;
        debug!("{}: {:?} moved from {} to {}", func, inode.name, located.pos, pos);
        result
    }

    /// Checks out a file for exclusive editing.
    pub fn edit_file(&mut self, session: &Session, path: &str) -> Result<EditSession> {
        const FUNC: &str = "FileSystem::edit_file";
        session.require_login(FUNC)?;
        let (path, located) = self.resolve_file(path, FUNC)?;
        session.require(located.inode.permission, Operation::Edit, FUNC, &path)?;
        if located.inode.is_locked() {
            warn!("{}: {} is already checked out", FUNC, path);
            return Err(FsError::Locked { func: FUNC, path });
        }
        self.volume.update_open_counter_at(located.pos, 1)?;
        let data = self.volume.file_at(located.pos)?.data;
        let mut inode = located.inode;
        inode.open_counter = 1;
        debug!("{}: checked out {}", FUNC, path);
        Ok(EditSession { path, inode, data })
    }

    /// Stores `data` as the new payload of a checked out file and unlocks it.
    /// The lock is released even when the write fails.
    pub fn commit_edit(
        &mut self,
        session: &Session,
        edit: EditSession,
        data: &[u8],
    ) -> Result<Position> {
        const FUNC: &str = "FileSystem::commit_edit";
        let result = session.require_login(FUNC).and_then(|_| {
            let (path, located) = self.resolve_file(&edit.path, FUNC)?;
            session.require(located.inode.permission, Operation::Edit, FUNC, &path)?;
            self.replace(&located, data, FUNC)
        });
        if result.is_err() {
            if let Err(e) = self.unlock(&edit.path, FUNC) {
                warn!("{}: could not unlock {}: {}", FUNC, edit.path, e);
            }
        }
        result
    }

    /// Gives up a checkout without changing the file.
    pub fn cancel_edit(&mut self, edit: EditSession) -> Result<()> {
        self.unlock(&edit.path, "FileSystem::cancel_edit")
    }

    /// Clears a write lock left behind by an edit session that was never
    /// committed or cancelled, e.g. after a crash.
    pub fn release_write_lock(&mut self, session: &Session, path: &str) -> Result<()> {
        const FUNC: &str = "FileSystem::release_write_lock";
        session.require_login(FUNC)?;
        let (path, located) = self.resolve_file(path, FUNC)?;
        session.require(located.inode.permission, Operation::Edit, FUNC, &path)?;
        if located.inode.is_locked() {
            info!("{}: unlocking {}", FUNC, path);
            self.volume.update_open_counter_at(located.pos, 0)?;
        }
        Ok(())
    }

    fn unlock(&mut self, path: &str, func: &'static str) -> Result<()> {
        let (_, located) = self.resolve_file(path, func)?;
        self.volume.update_open_counter_at(located.pos, 0)
    }

    /// Every node of the chain, for diagnostics.
    pub fn dump(&mut self) -> Result<Vec<(Position, Node)>> {
        self.volume.chain()
    }

    pub fn verify(&mut self) -> Result<()> {
        self.volume.verify()
    }
}

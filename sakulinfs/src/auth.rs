use std::io::{Cursor, Read};

use byteorder::{ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};

use crate::error::{FsError, Result};
use crate::node::MAX_NAME_LEN;

pub const DIGEST_LEN: usize = 32;

/// Well-known location of the user table.
pub const USER_TABLE_NAME: &str = "user.map";

pub type PasswordDigest = [u8; DIGEST_LEN];

pub fn digest(password: &str) -> PasswordDigest {
    let mut out = [0; DIGEST_LEN];
    out.copy_from_slice(&Sha256::digest(password.as_bytes()));
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserItem {
    pub username: String,
    pub password_digest: PasswordDigest,
}

impl UserItem {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password_digest: digest(password),
        }
    }
}

/// Registered users, stored as the payload of `/user.map`.
///
/// Each entry is `| name len 1 | name | sha256 32 |`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserTable {
    users: Vec<UserItem>,
}

impl UserTable {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let eof = |_| FsError::format("UserTable::parse", "truncated user entry");
        let mut cursor = Cursor::new(bytes);
        let mut table = UserTable::default();
        while (cursor.position() as usize) < bytes.len() {
            let len = cursor.read_u8().map_err(eof)?;
            let mut name = vec![0; len as usize];
            cursor.read_exact(&mut name).map_err(eof)?;
            let username = String::from_utf8(name)
                .map_err(|_| FsError::format("UserTable::parse", "username is not valid utf-8"))?;
            let mut password_digest = [0; DIGEST_LEN];
            cursor.read_exact(&mut password_digest).map_err(eof)?;
            table.users.push(UserItem {
                username,
                password_digest,
            });
        }
        Ok(table)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for user in &self.users {
            // Writing into a Vec cannot fail.
            let _ = buf.write_u8(user.username.len() as u8);
            buf.extend_from_slice(user.username.as_bytes());
            buf.extend_from_slice(&user.password_digest);
        }
        buf
    }

    pub fn users(&self) -> &[UserItem] {
        &self.users
    }

    /// Appends a user, rejecting a name that is already taken.
    pub fn push_user(&mut self, user: UserItem) -> Result<()> {
        if user.username.is_empty() || user.username.len() > MAX_NAME_LEN {
            return Err(FsError::InvalidArgument(format!(
                "username must be 1 to {} bytes long",
                MAX_NAME_LEN
            )));
        }
        if self.users.iter().any(|u| u.username == user.username) {
            return Err(FsError::DuplicateName {
                func: "UserTable::push_user",
                name: user.username,
            });
        }
        self.users.push(user);
        Ok(())
    }

    /// Returns the matching entry when both name and password agree.
    pub fn login(&self, username: &str, password: &str) -> Option<&UserItem> {
        let hashed = digest(password);
        self.users
            .iter()
            .find(|u| u.username == username)
            .filter(|u| u.password_digest == hashed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_sha256() {
        let d = digest("abc");
        assert_eq!(d[0..4], [0xba, 0x78, 0x16, 0xbf]);
        assert_ne!(digest("abc"), digest("abd"));
    }

    #[test]
    fn table_survives_encoding() {
        let mut table = UserTable::default();
        table.push_user(UserItem::new("alice", "pw1")).unwrap();
        table.push_user(UserItem::new("bob", "pw2")).unwrap();

        let bytes = table.to_bytes();
        assert_eq!(bytes.len(), (1 + 5 + 32) + (1 + 3 + 32));
        assert_eq!(UserTable::parse(&bytes).unwrap(), table);
        assert_eq!(UserTable::parse(&[]).unwrap().users().len(), 0);
    }

    #[test]
    fn duplicate_usernames_are_rejected() {
        let mut table = UserTable::default();
        table.push_user(UserItem::new("alice", "pw1")).unwrap();

        match table.push_user(UserItem::new("alice", "other")) {
            Err(FsError::DuplicateName { name, .. }) => assert_eq!(name, "alice"),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(table.users().len(), 1);
    }

    #[test]
    fn login_checks_name_and_password() {
        let mut table = UserTable::default();
        table.push_user(UserItem::new("alice", "secret")).unwrap();

        assert!(table.login("alice", "secret").is_some());
        assert!(table.login("alice", "wrong").is_none());
        assert!(table.login("mallory", "secret").is_none());
    }

    #[test]
    fn truncated_table_is_a_format_error() {
        let mut table = UserTable::default();
        table.push_user(UserItem::new("alice", "secret")).unwrap();
        let bytes = table.to_bytes();

        assert!(matches!(
            UserTable::parse(&bytes[..bytes.len() - 3]),
            Err(FsError::Format { .. })
        ));
    }
}

use crate::error::{FsError, Result};
use crate::perm::{Operation, Permission, Role};

/// Caller context for every tree and auth operation.
///
/// A fresh session is logged out: it holds `Role::User` without a user name and
/// is refused by everything except login and role elevation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    role: Role,
    user: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.role == Role::Admin || self.user.is_some()
    }

    pub fn logout(&mut self) {
        self.role = Role::User;
        self.user = None;
    }

    pub(crate) fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    pub(crate) fn set_user(&mut self, user: String) {
        self.user = Some(user);
        self.role = Role::User;
    }

    pub(crate) fn require_login(&self, func: &'static str) -> Result<()> {
        if self.is_logged_in() {
            Ok(())
        } else {
            Err(FsError::auth(func, "login required"))
        }
    }

    pub(crate) fn require(
        &self,
        permission: Permission,
        op: Operation,
        func: &'static str,
        path: &str,
    ) -> Result<()> {
        if permission.allows(self.role, op) {
            Ok(())
        } else {
            log::debug!("{}: {:?} denied {:?} on {} ({})", func, self.role, op, path, permission);
            Err(FsError::PermissionDenied {
                func,
                path: path.to_string(),
                op,
                role: self.role,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_logged_out() {
        let session = Session::new();
        assert!(!session.is_logged_in());
        match session.require_login("test").unwrap_err() {
            FsError::Auth { func, .. } => assert_eq!(func, "test"),
            e => panic!("unexpected error {:?}", e),
        }
    }

    #[test]
    fn user_or_admin_counts_as_logged_in() {
        let mut session = Session::new();
        session.set_user("alice".to_string());
        assert!(session.is_logged_in());
        assert_eq!(session.user(), Some("alice"));

        let mut admin = Session::new();
        admin.set_role(Role::Admin);
        assert!(admin.is_logged_in());

        admin.logout();
        assert!(!admin.is_logged_in());
    }

    #[test]
    fn require_reports_role_and_operation() {
        let mut session = Session::new();
        session.set_user("bob".to_string());

        let err = session
            .require(Permission::ADMIN_ONLY, Operation::Edit, "write_file", "/user.map")
            .unwrap_err();
        match err {
            FsError::PermissionDenied { op, role, path, .. } => {
                assert_eq!(op, Operation::Edit);
                assert_eq!(role, Role::User);
                assert_eq!(path, "/user.map");
            }
            e => panic!("unexpected error {:?}", e),
        }
    }
}

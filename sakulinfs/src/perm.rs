use bitflags::bitflags;
use std::fmt;
use std::str::FromStr;

use crate::error::FsError;

/// Who is acting. Each role is judged only by its own half of a node's
/// permission byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Edit,
    Execute,
}

bitflags! {
    /// Six bit access matrix stored in every inode: the high triple applies to
    /// `Role::Admin`, the low triple to `Role::User`.
    pub struct Permission: u8 {
        const ADMIN_READ = 0b10_0000;
        const ADMIN_EDIT = 0b01_0000;
        const ADMIN_RUN = 0b00_1000;
        const USER_READ = 0b00_0100;
        const USER_EDIT = 0b00_0010;
        const USER_RUN = 0b00_0001;

        const OPEN = Self::ADMIN_READ.bits
            | Self::ADMIN_EDIT.bits
            | Self::ADMIN_RUN.bits
            | Self::USER_READ.bits
            | Self::USER_EDIT.bits
            | Self::USER_RUN.bits;
        /// Used for `/user.map`.
        const ADMIN_ONLY = Self::ADMIN_READ.bits | Self::ADMIN_EDIT.bits;
    }
}

impl Default for Permission {
    fn default() -> Self {
        Permission::OPEN
    }
}

/// One role's triple of the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermissionGroup {
    pub readable: bool,
    pub editable: bool,
    pub runnable: bool,
}

impl PermissionGroup {
    pub const ALL: PermissionGroup = PermissionGroup {
        readable: true,
        editable: true,
        runnable: true,
    };
    pub const NONE: PermissionGroup = PermissionGroup {
        readable: false,
        editable: false,
        runnable: false,
    };

    fn bits(self) -> u8 {
        (self.readable as u8) << 2 | (self.editable as u8) << 1 | self.runnable as u8
    }

    fn from_bits(bits: u8) -> Self {
        PermissionGroup {
            readable: bits & 0b100 != 0,
            editable: bits & 0b010 != 0,
            runnable: bits & 0b001 != 0,
        }
    }
}

impl Permission {
    pub fn new(admin: PermissionGroup, user: PermissionGroup) -> Self {
        Permission::from_bits_truncate(admin.bits() << 3 | user.bits())
    }

    /// Decodes the on-disk byte. The two spare high bits are ignored.
    pub fn from_byte(byte: u8) -> Self {
        Permission::from_bits_truncate(byte)
    }

    pub fn group(self, role: Role) -> PermissionGroup {
        match role {
            Role::Admin => PermissionGroup::from_bits(self.bits() >> 3),
            Role::User => PermissionGroup::from_bits(self.bits() & 0b111),
        }
    }

    pub fn allows(self, role: Role, op: Operation) -> bool {
        let group = self.group(role);
        match op {
            Operation::Read => group.readable,
            Operation::Edit => group.editable,
            Operation::Execute => group.runnable,
        }
    }
}

impl fmt::Display for Permission {
    /// Renders as `rex/r--`, admin triple first.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let triple = |g: PermissionGroup| {
            format!(
                "{}{}{}",
                if g.readable { 'r' } else { '-' },
                if g.editable { 'e' } else { '-' },
                if g.runnable { 'x' } else { '-' }
            )
        };
        write!(
            f,
            "{}/{}",
            triple(self.group(Role::Admin)),
            triple(self.group(Role::User))
        )
    }
}

impl FromStr for Permission {
    type Err = FsError;

    /// Parses two octal digits, admin then user, e.g. `"74"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FsError::InvalidArgument(format!("bad permission {:?}", s));
        if s.len() != 2 {
            return Err(invalid());
        }
        let bits = u8::from_str_radix(s, 8).map_err(|_| invalid())?;
        Ok(Permission::from_bits_truncate(bits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_is_judged_by_user_bits_only() {
        let perm = Permission::ADMIN_EDIT | Permission::USER_READ;

        assert!(!perm.allows(Role::User, Operation::Edit));
        assert!(perm.allows(Role::User, Operation::Read));
        assert!(perm.allows(Role::Admin, Operation::Edit));
    }

    #[test]
    fn admin_role_does_not_bypass_admin_bits() {
        let perm = Permission::USER_READ | Permission::USER_EDIT | Permission::USER_RUN;

        assert!(!perm.allows(Role::Admin, Operation::Read));
        assert!(!perm.allows(Role::Admin, Operation::Edit));
        assert!(!perm.allows(Role::Admin, Operation::Execute));
        assert!(perm.allows(Role::User, Operation::Execute));
    }

    #[test]
    fn groups_pack_into_one_byte() {
        let perm = Permission::new(
            PermissionGroup::ALL,
            PermissionGroup {
                readable: true,
                editable: false,
                runnable: true,
            },
        );

        assert_eq!(perm.bits(), 0b111_101);
        assert_eq!(perm.group(Role::User).editable, false);
        assert_eq!(Permission::new(PermissionGroup::ALL, PermissionGroup::ALL), Permission::OPEN);
        assert_eq!(Permission::from_byte(0xFF), Permission::OPEN);
    }

    #[test]
    fn parses_and_renders_octal_pairs() {
        let perm: Permission = "64".parse().unwrap();
        assert_eq!(perm, Permission::ADMIN_READ | Permission::ADMIN_EDIT | Permission::USER_READ);
        assert_eq!(perm.to_string(), "re-/r--");

        assert!("8".parse::<Permission>().is_err());
        assert!("78".parse::<Permission>().is_err());
        assert!("777".parse::<Permission>().is_err());
    }
}

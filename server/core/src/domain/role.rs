// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Role / Capability Value Objects
//!
//! A [`Role`] is a named bundle of [`Capabilities`]. The mapping is fixed
//! configuration: there are no per-session overrides.
//!
//! | Role | read | write | execute | delete | manage users |
//! |------|------|-------|---------|--------|--------------|
//! | `admin` | ✓ | ✓ | ✓ | ✓ | ✓ |
//! | `power_user` | ✓ | ✓ | ✓ | | |
//! | `moderator` | ✓ | ✓ | | | |
//! | `user` | ✓ | | | | |
//!
//! Unknown role names resolve to the `user` set so lookups fail closed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single permission a role may grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Read,
    Write,
    Execute,
    Delete,
    ManageUsers,
}

impl Capability {
    /// Verb phrase used in permission-denied messages.
    pub const fn verb_phrase(self) -> &'static str {
        match self {
            Self::Read => "read files",
            Self::Write => "write files",
            Self::Execute => "execute files",
            Self::Delete => "delete files",
            Self::ManageUsers => "manage users",
        }
    }
}

/// Capability set granted by a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub can_read: bool,
    pub can_write: bool,
    pub can_execute: bool,
    pub can_delete: bool,
    pub can_manage_users: bool,
    pub description: &'static str,
}

impl Capabilities {
    pub const fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::Read => self.can_read,
            Capability::Write => self.can_write,
            Capability::Execute => self.can_execute,
            Capability::Delete => self.can_delete,
            Capability::ManageUsers => self.can_manage_users,
        }
    }
}

const ADMIN: Capabilities = Capabilities {
    can_read: true,
    can_write: true,
    can_execute: true,
    can_delete: true,
    can_manage_users: true,
    description: "Full system access",
};

const POWER_USER: Capabilities = Capabilities {
    can_read: true,
    can_write: true,
    can_execute: true,
    can_delete: false,
    can_manage_users: false,
    description: "Can read, write, and execute files",
};

const MODERATOR: Capabilities = Capabilities {
    can_read: true,
    can_write: true,
    can_execute: false,
    can_delete: false,
    can_manage_users: false,
    description: "Can read and write files",
};

const USER: Capabilities = Capabilities {
    can_read: true,
    can_write: false,
    can_execute: false,
    can_delete: false,
    can_manage_users: false,
    description: "Can only read files",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    PowerUser,
    Moderator,
    User,
}

impl Role {
    /// Roles an administrator may hand out. `admin` is never assignable.
    pub const fn assignable() -> [Role; 3] {
        [Role::User, Role::Moderator, Role::PowerUser]
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::PowerUser => "power_user",
            Self::Moderator => "moderator",
            Self::User => "user",
        }
    }

    pub const fn capabilities(self) -> Capabilities {
        match self {
            Self::Admin => ADMIN,
            Self::PowerUser => POWER_USER,
            Self::Moderator => MODERATOR,
            Self::User => USER,
        }
    }

    pub fn is_assignable(self) -> bool {
        Self::assignable().contains(&self)
    }

    pub fn allows(self, capability: Capability) -> bool {
        self.capabilities().allows(capability)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "power_user" => Ok(Self::PowerUser),
            "moderator" => Ok(Self::Moderator),
            "user" => Ok(Self::User),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Capability lookup by role name. Unknown names get the `user` set.
pub fn capabilities_of(role: &str) -> Capabilities {
    role.parse::<Role>()
        .map(Role::capabilities)
        .unwrap_or(USER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_table() {
        assert!(!capabilities_of("user").can_write);
        assert!(capabilities_of("admin").can_write);
        assert!(!capabilities_of("moderator").can_execute);
        assert!(!capabilities_of("power_user").can_delete);
        assert!(capabilities_of("power_user").can_execute);
        assert!(capabilities_of("moderator").can_write);
    }

    #[test]
    fn test_only_admin_manages_users() {
        for role in [Role::PowerUser, Role::Moderator, Role::User] {
            assert!(!role.allows(Capability::ManageUsers), "{role} manages users");
        }
        assert!(Role::Admin.allows(Capability::ManageUsers));
    }

    #[test]
    fn test_unknown_role_fails_closed() {
        assert_eq!(capabilities_of("root"), Role::User.capabilities());
        assert_eq!(capabilities_of(""), Role::User.capabilities());
    }

    #[test]
    fn test_assignable_roles() {
        assert!(!Role::Admin.is_assignable());
        assert!(Role::User.is_assignable());
        assert!(Role::Moderator.is_assignable());
        assert!(Role::PowerUser.is_assignable());
    }

    #[test]
    fn test_parse_and_display_agree() {
        for role in [Role::Admin, Role::PowerUser, Role::Moderator, Role::User] {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
        assert_eq!("root".parse::<Role>(), Err(UnknownRole("root".to_string())));
    }

    #[test]
    fn test_serde_uses_wire_names() {
        assert_eq!(serde_json::to_string(&Role::PowerUser).unwrap(), "\"power_user\"");
    }
}

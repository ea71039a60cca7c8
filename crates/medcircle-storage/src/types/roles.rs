//! Role and permission types for the group roster.

use std::str::FromStr;

/// Role of a member within a group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemberRole {
    Admin,
    Member,
}

/// Error type for parsing MemberRole from string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMemberRoleError(pub String);

impl std::fmt::Display for ParseMemberRoleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid member role: {}", self.0)
    }
}

impl std::error::Error for ParseMemberRoleError {}

impl FromStr for MemberRole {
    type Err = ParseMemberRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(MemberRole::Admin),
            "member" => Ok(MemberRole::Member),
            _ => Err(ParseMemberRoleError(s.to_string())),
        }
    }
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Admin => "admin",
            MemberRole::Member => "member",
        }
    }
}

/// Content permission of a member within a group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Permission {
    Write,
    Read,
}

/// Error type for parsing Permission from string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePermissionError(pub String);

impl std::fmt::Display for ParsePermissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid permission: {}", self.0)
    }
}

impl std::error::Error for ParsePermissionError {}

impl FromStr for Permission {
    type Err = ParsePermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "write" => Ok(Permission::Write),
            "read" => Ok(Permission::Read),
            _ => Err(ParsePermissionError(s.to_string())),
        }
    }
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Write => "write",
            Permission::Read => "read",
        }
    }

    /// Check if this permission covers another (Write covers Read)
    pub fn includes(&self, other: &Permission) -> bool {
        match self {
            Permission::Write => true,
            Permission::Read => matches!(other, Permission::Read),
        }
    }
}

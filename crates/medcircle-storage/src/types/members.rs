//! Roster entry types, one per actor per group.

use chrono::{DateTime, Utc};

use super::{GroupId, MemberRole, Permission, UserId};

/// Member record (roster entry)
#[derive(Clone, Debug)]
pub struct Member {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub role: MemberRole,
    pub permission: Permission,
    pub display_name: String,
    /// An admin can disable access without removing the member
    /// (temporary revocation).
    pub is_access_enabled: bool,
    pub joined_at: DateTime<Utc>,
}

/// Parameters for a new roster entry, passed to a transactional join
/// or approval commit.
#[derive(Clone, Debug)]
pub struct NewMemberParams {
    pub user_id: UserId,
    pub display_name: String,
    pub role: MemberRole,
    pub permission: Permission,
}

impl NewMemberParams {
    /// An ordinary joiner: `role = member`, `permission = read`.
    pub fn joiner(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            role: MemberRole::Member,
            permission: Permission::Read,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn joiner_defaults_to_read_only_member() {
        let p = NewMemberParams::joiner(UserId(Uuid::new_v4()), "Bob");
        assert_eq!(p.role, MemberRole::Member);
        assert_eq!(p.permission, Permission::Read);
        assert_eq!(p.display_name, "Bob");
    }
}

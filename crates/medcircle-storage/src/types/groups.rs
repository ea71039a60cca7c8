//! Group document types.

use chrono::{DateTime, Utc};

use super::{GroupId, UserId};

/// Hard cap on group roster size (product policy, not configuration).
pub const MAX_MEMBERS: usize = 3;

/// Group document: the single mutable object contended over by
/// concurrent roster operations.
///
/// The roster sets live on the group document so a single optimistic
/// version check covers all of them; per-member detail lives in child
/// [`Member`](super::Member) rows.
#[derive(Clone, Debug)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    /// Current invite code, immutable for the life of the group.
    pub invite_code: String,
    pub created_by: UserId,
    pub admin_ids: Vec<UserId>,
    pub member_ids: Vec<UserId>,
    pub write_permission_ids: Vec<UserId>,
    pub trial_end_date: DateTime<Utc>,
    pub has_active_subscription: bool,
    /// Monotonic counter bumped by every roster commit; the optimistic
    /// concurrency token.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    pub fn is_member(&self, user_id: &UserId) -> bool {
        self.member_ids.contains(user_id)
    }

    pub fn is_admin(&self, user_id: &UserId) -> bool {
        self.admin_ids.contains(user_id)
    }

    pub fn can_write(&self, user_id: &UserId) -> bool {
        self.write_permission_ids.contains(user_id)
    }

    pub fn is_full(&self) -> bool {
        self.member_ids.len() >= MAX_MEMBERS
    }
}

/// Parameters for creating a group
#[derive(Clone, Debug)]
pub struct CreateGroupParams {
    pub name: String,
    /// Pre-allocated invite code; uniqueness is enforced by the store
    /// (`AlreadyExists` on collision).
    pub invite_code: String,
    pub created_by: UserId,
    /// Display name for the creator's member row.
    pub creator_display_name: String,
    pub trial_end_date: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn group_with_members(member_ids: Vec<UserId>) -> Group {
        let creator = member_ids[0].clone();
        Group {
            id: GroupId(Uuid::new_v4()),
            name: "Family".to_string(),
            invite_code: "ABC123".to_string(),
            created_by: creator.clone(),
            admin_ids: vec![creator.clone()],
            member_ids,
            write_permission_ids: vec![creator],
            trial_end_date: Utc::now(),
            has_active_subscription: false,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn roster_membership_checks() {
        let a = UserId(Uuid::new_v4());
        let b = UserId(Uuid::new_v4());
        let g = group_with_members(vec![a.clone()]);

        assert!(g.is_member(&a));
        assert!(g.is_admin(&a));
        assert!(g.can_write(&a));
        assert!(!g.is_member(&b));
        assert!(!g.is_admin(&b));
        assert!(!g.can_write(&b));
    }

    #[test]
    fn full_at_max_members() {
        let members: Vec<UserId> = (0..MAX_MEMBERS).map(|_| UserId(Uuid::new_v4())).collect();
        let g = group_with_members(members);
        assert!(g.is_full());

        let g2 = group_with_members(vec![UserId(Uuid::new_v4())]);
        assert!(!g2.is_full());
    }
}

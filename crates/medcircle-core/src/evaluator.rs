//! The role & permission evaluator.
//!
//! A pure predicate over (actor, group snapshot, optional member row,
//! operation class, now). This is the sole authorization entry point the
//! content layer calls before any read or write; it never inspects
//! content-layer fields, only group/roster state.

use chrono::{DateTime, Utc};

use medcircle_storage::{Group, Member, UserId};

use crate::error::EngineError;

/// Classes of protected operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpClass {
    /// Inspect group name/roster size. Any authenticated actor: a
    /// non-member needs this to decide whether to request to join, and
    /// trial-expiry banners need it to render.
    ReadGroupMeta,
    /// Read content gated by this group.
    ReadContent,
    /// Mutate content gated by this group.
    WriteContent,
    /// Ordinary roster administration (approve/deny). Forced removal and
    /// promotion additionally require `actor == created_by`, enforced by
    /// the roster service.
    ManageRoster,
    /// Rename and settings. Roster-affecting fields are excluded from
    /// this path and only mutable through the roster service.
    ManageGroupMeta,
}

/// `true` while the group is inside its trial window or has an active
/// subscription. Must be evaluated with the server's clock.
pub fn trial_valid(group: &Group, now: DateTime<Utc>) -> bool {
    group.has_active_subscription || now < group.trial_end_date
}

/// Allow/deny for a protected operation.
pub fn can_perform(
    actor: &UserId,
    group: &Group,
    member: Option<&Member>,
    op: OpClass,
    now: DateTime<Utc>,
) -> bool {
    check(actor, group, member, op, now).is_ok()
}

/// Like [`can_perform`], but distinguishes *why* an operation is denied so
/// callers can render the right remediation.
pub fn check(
    actor: &UserId,
    group: &Group,
    member: Option<&Member>,
    op: OpClass,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    match op {
        OpClass::ReadGroupMeta => Ok(()),
        OpClass::ReadContent => {
            if !group.is_member(actor) {
                return Err(EngineError::Unauthorized("not a member"));
            }
            ensure_access_enabled(member)?;
            ensure_trial_valid(group, now)
        }
        OpClass::WriteContent => {
            if !group.can_write(actor) {
                return Err(EngineError::Unauthorized("no write permission"));
            }
            ensure_access_enabled(member)?;
            ensure_trial_valid(group, now)
        }
        OpClass::ManageRoster | OpClass::ManageGroupMeta => {
            if !group.is_admin(actor) {
                return Err(EngineError::Unauthorized("not an admin"));
            }
            Ok(())
        }
    }
}

fn ensure_access_enabled(member: Option<&Member>) -> Result<(), EngineError> {
    match member {
        Some(m) if m.is_access_enabled => Ok(()),
        // no member row means the roster and member table disagree;
        // deny rather than guess
        _ => Err(EngineError::Unauthorized("access disabled")),
    }
}

fn ensure_trial_valid(group: &Group, now: DateTime<Utc>) -> Result<(), EngineError> {
    if trial_valid(group, now) {
        Ok(())
    } else {
        Err(EngineError::TrialExpired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use medcircle_storage::{GroupId, MemberRole, Permission};
    use uuid::Uuid;

    struct Fixture {
        owner: UserId,
        member: UserId,
        stranger: UserId,
        group: Group,
    }

    fn fixture() -> Fixture {
        let owner = UserId(Uuid::new_v4());
        let member = UserId(Uuid::new_v4());
        let now = Utc::now();
        let group = Group {
            id: GroupId(Uuid::new_v4()),
            name: "Family".to_string(),
            invite_code: "ABC123".to_string(),
            created_by: owner.clone(),
            admin_ids: vec![owner.clone()],
            member_ids: vec![owner.clone(), member.clone()],
            write_permission_ids: vec![owner.clone()],
            trial_end_date: now + Duration::days(14),
            has_active_subscription: false,
            version: 2,
            created_at: now,
            updated_at: now,
        };
        Fixture {
            owner,
            member,
            stranger: UserId(Uuid::new_v4()),
            group,
        }
    }

    fn member_row(f: &Fixture, user: &UserId, enabled: bool) -> Member {
        Member {
            group_id: f.group.id.clone(),
            user_id: user.clone(),
            role: if f.group.is_admin(user) {
                MemberRole::Admin
            } else {
                MemberRole::Member
            },
            permission: if f.group.can_write(user) {
                Permission::Write
            } else {
                Permission::Read
            },
            display_name: "x".to_string(),
            is_access_enabled: enabled,
            joined_at: f.group.created_at,
        }
    }

    #[test]
    fn read_group_meta_open_to_any_authenticated_actor() {
        let f = fixture();
        let now = Utc::now();
        assert!(can_perform(&f.stranger, &f.group, None, OpClass::ReadGroupMeta, now));
    }

    #[test]
    fn read_content_requires_membership() {
        let f = fixture();
        let now = Utc::now();
        let row = member_row(&f, &f.member, true);
        assert!(can_perform(&f.member, &f.group, Some(&row), OpClass::ReadContent, now));
        assert!(matches!(
            check(&f.stranger, &f.group, None, OpClass::ReadContent, now),
            Err(EngineError::Unauthorized(_))
        ));
    }

    #[test]
    fn write_content_requires_write_permission() {
        let f = fixture();
        let now = Utc::now();
        let owner_row = member_row(&f, &f.owner, true);
        let member_row = member_row(&f, &f.member, true);
        assert!(can_perform(&f.owner, &f.group, Some(&owner_row), OpClass::WriteContent, now));
        assert!(matches!(
            check(&f.member, &f.group, Some(&member_row), OpClass::WriteContent, now),
            Err(EngineError::Unauthorized(_))
        ));
    }

    #[test]
    fn disabled_member_denied_but_still_on_roster() {
        let f = fixture();
        let now = Utc::now();
        let row = member_row(&f, &f.member, false);
        assert!(matches!(
            check(&f.member, &f.group, Some(&row), OpClass::ReadContent, now),
            Err(EngineError::Unauthorized(_))
        ));
        assert!(f.group.is_member(&f.member));
    }

    #[test]
    fn trial_boundary() {
        let f = fixture();
        let row = member_row(&f, &f.member, true);
        let before = f.group.trial_end_date - Duration::seconds(1);
        let after = f.group.trial_end_date + Duration::seconds(1);

        assert!(can_perform(&f.member, &f.group, Some(&row), OpClass::ReadContent, before));
        assert!(matches!(
            check(&f.member, &f.group, Some(&row), OpClass::ReadContent, after),
            Err(EngineError::TrialExpired)
        ));
    }

    #[test]
    fn subscription_overrides_trial_expiry() {
        let mut f = fixture();
        f.group.has_active_subscription = true;
        let row = member_row(&f, &f.member, true);
        let after = f.group.trial_end_date + Duration::seconds(1);
        assert!(can_perform(&f.member, &f.group, Some(&row), OpClass::ReadContent, after));
    }

    #[test]
    fn manage_roster_requires_admin() {
        let f = fixture();
        let now = Utc::now();
        assert!(can_perform(&f.owner, &f.group, None, OpClass::ManageRoster, now));
        assert!(matches!(
            check(&f.member, &f.group, None, OpClass::ManageRoster, now),
            Err(EngineError::Unauthorized(_))
        ));
        assert!(matches!(
            check(&f.member, &f.group, None, OpClass::ManageGroupMeta, now),
            Err(EngineError::Unauthorized(_))
        ));
    }

    #[test]
    fn trial_expiry_does_not_block_meta_or_admin() {
        let f = fixture();
        let after = f.group.trial_end_date + Duration::days(1);
        assert!(can_perform(&f.member, &f.group, None, OpClass::ReadGroupMeta, after));
        assert!(can_perform(&f.owner, &f.group, None, OpClass::ManageRoster, after));
    }
}

//! The Store trait that backends implement.

use chrono::{DateTime, NaiveDate, Utc};

use crate::types::*;
use crate::StoreError;

/// The storage trait `medcircle-core` depends on.
///
/// The `commit_*` methods are the only multi-field roster mutations in the
/// system. Each runs as a single backend transaction that re-checks the
/// group's `version` against `expected_version` and fails with
/// [`StoreError::Conflict`] when another writer got there first. Everything
/// else is a single-field update with no cross-field invariant to re-check.
#[cfg_attr(feature = "test-support", mockall::automock)]
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    // ───────────────────────────────────── Groups ─────────────────────────────────────────

    /// Create a group plus its creator's member row and invite code mapping,
    /// atomically. Fails with `AlreadyExists` if the invite code is taken.
    async fn create_group(&self, params: &CreateGroupParams) -> Result<GroupId, StoreError>;

    /// Get group by ID.
    async fn get_group(&self, group_id: &GroupId) -> Result<Group, StoreError>;

    /// Resolve an invite code to its live group. Codes of deleted groups
    /// resolve as `NotFound`.
    async fn get_group_by_invite_code(&self, code: &str) -> Result<Group, StoreError>;

    /// Find the live group created by this actor, if any.
    async fn find_group_created_by(&self, user_id: &UserId)
        -> Result<Option<Group>, StoreError>;

    /// List all groups this actor is a member of.
    async fn list_groups_for_member(&self, user_id: &UserId) -> Result<Vec<Group>, StoreError>;

    /// Rename a group (single-field, no roster invariant involved).
    async fn rename_group(&self, group_id: &GroupId, name: &str) -> Result<(), StoreError>;

    /// Set the subscription override flag.
    async fn set_subscription(&self, group_id: &GroupId, active: bool) -> Result<(), StoreError>;

    /// Delete a group; cascades members, join requests, and the invite code
    /// mapping.
    async fn delete_group(&self, group_id: &GroupId) -> Result<(), StoreError>;

    // ─────────────────────────── Roster commits (transactional) ───────────────────────────

    /// Add a member to the roster. Inserts the member row and updates the
    /// group's `member_ids` in one transaction.
    async fn commit_join(
        &self,
        group_id: &GroupId,
        expected_version: i64,
        member: &NewMemberParams,
    ) -> Result<(), StoreError>;

    /// Approve a pending join request and add the requester to the roster in
    /// one transaction. The request stays `pending` if the commit aborts.
    async fn commit_approval(
        &self,
        group_id: &GroupId,
        expected_version: i64,
        request_id: &JoinRequestId,
        member: &NewMemberParams,
    ) -> Result<(), StoreError>;

    /// Remove a member from the roster and start their cooldown, in one
    /// transaction: member row deleted, roster sets updated, and the
    /// profile's `cooldown_end_date`/`can_create_group` written.
    async fn commit_leave(
        &self,
        group_id: &GroupId,
        expected_version: i64,
        user_id: &UserId,
        cooldown_end: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Promote a member to admin: adds them to `admin_ids` and
    /// `write_permission_ids` and upgrades the member row, in one
    /// transaction.
    async fn commit_promotion(
        &self,
        group_id: &GroupId,
        expected_version: i64,
        user_id: &UserId,
    ) -> Result<(), StoreError>;

    // ───────────────────────────────────── Members ────────────────────────────────────────

    /// Get one roster entry.
    async fn get_member(
        &self,
        group_id: &GroupId,
        user_id: &UserId,
    ) -> Result<Member, StoreError>;

    /// List all roster entries for a group.
    async fn list_members(&self, group_id: &GroupId) -> Result<Vec<Member>, StoreError>;

    /// Toggle a member's access without removing them (single-field).
    async fn set_member_access(
        &self,
        group_id: &GroupId,
        user_id: &UserId,
        enabled: bool,
    ) -> Result<(), StoreError>;

    // ─────────────────────────────────── Join requests ────────────────────────────────────

    /// Create a pending join request. Fails with `AlreadyExists` if a
    /// pending request already exists for this (user, group).
    async fn create_join_request(
        &self,
        params: &CreateJoinRequestParams,
    ) -> Result<JoinRequestId, StoreError>;

    /// Get a join request by ID.
    async fn get_join_request(&self, id: &JoinRequestId) -> Result<JoinRequest, StoreError>;

    /// List join requests for a group, optionally filtered by status.
    async fn list_join_requests(
        &self,
        group_id: &GroupId,
        status: Option<JoinRequestStatus>,
    ) -> Result<Vec<JoinRequest>, StoreError>;

    /// Transition a request out of `pending` (deny/cancel path). Fails with
    /// `Conflict` if the request is no longer pending.
    async fn resolve_join_request(
        &self,
        id: &JoinRequestId,
        status: JoinRequestStatus,
    ) -> Result<(), StoreError>;

    // ───────────────────────────────────── Profiles ───────────────────────────────────────

    /// Get the actor's profile, creating a default one on first interaction.
    async fn get_or_create_profile(&self, user_id: &UserId) -> Result<UserProfile, StoreError>;

    /// Get an existing profile.
    async fn get_profile(&self, user_id: &UserId) -> Result<UserProfile, StoreError>;

    /// Re-enable group creation once a cooldown has elapsed (lazy heal).
    async fn restore_create_permission(&self, user_id: &UserId) -> Result<(), StoreError>;

    /// Increment the lifetime transition counter, guarded by `limit`.
    /// Returns the new count, or `Conflict` if the counter is already at the
    /// limit.
    async fn increment_transition(
        &self,
        user_id: &UserId,
        at: DateTime<Utc>,
        limit: i32,
    ) -> Result<i32, StoreError>;

    // ─────────────────────────────────── Access sessions ──────────────────────────────────

    /// Fetch the daily quota row for (device, date), if any.
    async fn get_access_session(
        &self,
        device_id: &DeviceId,
        date: NaiveDate,
    ) -> Result<Option<AccessSession>, StoreError>;

    /// Mark today's quota as used. Idempotent per (device, date).
    async fn mark_access_used(
        &self,
        device_id: &DeviceId,
        date: NaiveDate,
    ) -> Result<(), StoreError>;
}

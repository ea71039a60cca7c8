//! The join/leave/approval state machine.
//!
//! [`RosterService`] is the only component that mutates roster fields. All
//! multi-field roster updates go through the store's transactional commits,
//! guarded by the group's version; the service wraps each commit in a
//! bounded retry that re-reads state before every attempt, so for any two
//! operations racing on the same roster exactly one observes the post-state
//! of the other.

use chrono::Duration;
use rand::thread_rng;
use std::sync::Arc;

use medcircle_audit::{AuditAction, AuditEvent, AuditLog};
use medcircle_events::{EventBus, RosterChangeEvent, RosterChangeKind};
use medcircle_storage::{
    CreateGroupParams, CreateJoinRequestParams, Group, GroupId, JoinRequest, JoinRequestId,
    JoinRequestStatus, Member, NewMemberParams, Store, StoreError, UserId,
};

use crate::clock::Clock;
use crate::codes;
use crate::entitlement::EntitlementClock;
use crate::error::EngineError;
use crate::evaluator::{self, OpClass};
use crate::policy::{
    CODE_ALLOC_ATTEMPTS, COMMIT_RETRY_ATTEMPTS, COOLDOWN_DAYS, MAX_GROUP_NAME_LEN,
    PROMOTION_MIN_TENURE_DAYS, TRANSITION_LIMIT, TRIAL_DAYS,
};

/// How `request_join` admits a new member.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinPolicy {
    /// `NotMember -> Member` in one optimistic transaction.
    Direct,
    /// `NotMember -> Pending`; an admin must approve.
    RequireApproval,
}

/// Result of `request_join`, depending on the active [`JoinPolicy`].
#[derive(Debug)]
pub enum JoinOutcome {
    Joined(Group),
    Pending(JoinRequest),
}

pub struct RosterService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    entitlements: Arc<EntitlementClock>,
    audit: Arc<dyn AuditLog>,
    events: Arc<dyn EventBus>,
    join_policy: JoinPolicy,
}

fn group_err(e: StoreError) -> EngineError {
    match e {
        StoreError::NotFound => EngineError::GroupNotFound,
        other => other.into(),
    }
}

fn request_err(e: StoreError) -> EngineError {
    match e {
        StoreError::NotFound => EngineError::RequestNotFound,
        // already resolved; there is no pending request to act on
        StoreError::Conflict => EngineError::RequestNotFound,
        other => other.into(),
    }
}

fn validate_name(name: &str) -> Result<String, EngineError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidName("name is empty"));
    }
    if trimmed.chars().count() > MAX_GROUP_NAME_LEN {
        return Err(EngineError::InvalidName("name exceeds 50 characters"));
    }
    Ok(trimmed.to_string())
}

impl RosterService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        entitlements: Arc<EntitlementClock>,
        audit: Arc<dyn AuditLog>,
        events: Arc<dyn EventBus>,
        join_policy: JoinPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            entitlements,
            audit,
            events,
            join_policy,
        }
    }

    // ──────────────────────────── Group lifecycle ─────────────────────────

    /// Create a group with the actor as owner, sole admin, and sole writer.
    ///
    /// Fails with `CooldownActive` while a leave cooldown runs and with
    /// `AlreadyOwnsGroup` if the actor already administers a live group;
    /// the explicit remediation for the latter is `delete_group` + recreate.
    pub async fn create_group(
        &self,
        actor: &UserId,
        name: &str,
        display_name: &str,
    ) -> Result<Group, EngineError> {
        let name = validate_name(name)?;
        self.entitlements.ensure_can_create(actor).await?;
        if self.store.find_group_created_by(actor).await?.is_some() {
            return Err(EngineError::AlreadyOwnsGroup);
        }

        let group_id = self.allocate_group(actor, &name, display_name).await?;
        let group = self.store.get_group(&group_id).await.map_err(group_err)?;

        tracing::info!(group = %group.id.0, actor = %actor.0, "group created");
        self.record_audit(
            AuditEvent::builder(actor, AuditAction::GroupCreate)
                .group_id(&group.id)
                .build(),
        )
        .await;
        self.publish(&group.id, RosterChangeKind::GroupCreated, Some(actor), group.version)
            .await;
        Ok(group)
    }

    /// Allocate an invite code and create the group atomically, redrawing
    /// on collision up to the attempt budget.
    async fn allocate_group(
        &self,
        actor: &UserId,
        name: &str,
        display_name: &str,
    ) -> Result<GroupId, EngineError> {
        let trial_end = self.clock.now() + Duration::days(TRIAL_DAYS);
        for attempt in 1..=CODE_ALLOC_ATTEMPTS {
            let code = codes::generate_code(&mut thread_rng());
            let params = CreateGroupParams {
                name: name.to_string(),
                invite_code: code,
                created_by: actor.clone(),
                creator_display_name: display_name.to_string(),
                trial_end_date: trial_end,
            };
            match self.store.create_group(&params).await {
                Ok(id) => return Ok(id),
                Err(StoreError::AlreadyExists) => {
                    tracing::debug!(attempt, "invite code collision; redrawing");
                }
                Err(e) => return Err(e.into()),
            }
        }
        tracing::error!(attempts = CODE_ALLOC_ATTEMPTS, "invite code allocation exhausted");
        Err(EngineError::AllocationExhausted(CODE_ALLOC_ATTEMPTS))
    }

    /// A former member starting their own circle. Gated by the cooldown and
    /// the lifetime transition cap; the cap check comes first so it applies
    /// regardless of elapsed cooldown.
    pub async fn start_own_group_after_leaving(
        &self,
        actor: &UserId,
        name: &str,
        display_name: &str,
    ) -> Result<Group, EngineError> {
        let name = validate_name(name)?;
        let profile = self.store.get_or_create_profile(actor).await?;
        if profile.transition_count >= TRANSITION_LIMIT {
            return Err(EngineError::TransitionLimitReached);
        }
        self.entitlements.ensure_can_create(actor).await?;
        if self.store.find_group_created_by(actor).await?.is_some() {
            return Err(EngineError::AlreadyOwnsGroup);
        }

        let group_id = self.allocate_group(actor, &name, display_name).await?;
        match self
            .store
            .increment_transition(actor, self.clock.now(), TRANSITION_LIMIT)
            .await
        {
            Ok(count) => {
                tracing::info!(actor = %actor.0, count, "member-to-admin transition");
            }
            Err(e) => {
                // the counter raced the cap (or the write failed): the new
                // group must not outlive the failed transition
                if let Err(del) = self.store.delete_group(&group_id).await {
                    tracing::error!(
                        error = %del,
                        group = %group_id.0,
                        "failed to remove group after aborted transition"
                    );
                }
                return Err(match e {
                    StoreError::Conflict => EngineError::TransitionLimitReached,
                    other => other.into(),
                });
            }
        }

        let group = self.store.get_group(&group_id).await.map_err(group_err)?;
        self.record_audit(
            AuditEvent::builder(actor, AuditAction::TransitionStart)
                .group_id(&group.id)
                .build(),
        )
        .await;
        self.publish(&group.id, RosterChangeKind::GroupCreated, Some(actor), group.version)
            .await;
        Ok(group)
    }

    /// Rename a group. Roster fields are not reachable from this path.
    pub async fn rename_group(
        &self,
        actor: &UserId,
        group_id: &GroupId,
        name: &str,
    ) -> Result<(), EngineError> {
        let name = validate_name(name)?;
        let group = self.store.get_group(group_id).await.map_err(group_err)?;
        evaluator::check(actor, &group, None, OpClass::ManageGroupMeta, self.clock.now())?;

        self.store.rename_group(group_id, &name).await.map_err(group_err)?;
        self.record_audit(
            AuditEvent::builder(actor, AuditAction::GroupRename)
                .group_id(group_id)
                .details(serde_json::json!({ "name": name }))
                .build(),
        )
        .await;
        self.publish(group_id, RosterChangeKind::GroupRenamed, Some(actor), group.version)
            .await;
        Ok(())
    }

    /// Record the subscription override (driven by the payment layer).
    pub async fn set_subscription(
        &self,
        actor: &UserId,
        group_id: &GroupId,
        active: bool,
    ) -> Result<(), EngineError> {
        let group = self.store.get_group(group_id).await.map_err(group_err)?;
        evaluator::check(actor, &group, None, OpClass::ManageGroupMeta, self.clock.now())?;

        self.store.set_subscription(group_id, active).await.map_err(group_err)?;
        self.record_audit(
            AuditEvent::builder(actor, AuditAction::SubscriptionChange)
                .group_id(group_id)
                .details(serde_json::json!({ "active": active }))
                .build(),
        )
        .await;
        self.publish(
            group_id,
            RosterChangeKind::SubscriptionChanged,
            Some(actor),
            group.version,
        )
        .await;
        Ok(())
    }

    /// Owner-only. Cascades members, join requests, and the invite code
    /// mapping; the code becomes reusable.
    pub async fn delete_group(&self, actor: &UserId, group_id: &GroupId) -> Result<(), EngineError> {
        let group = self.store.get_group(group_id).await.map_err(group_err)?;
        if *actor != group.created_by {
            return Err(EngineError::Unauthorized("only the group owner can delete the group"));
        }

        self.store.delete_group(group_id).await.map_err(group_err)?;
        tracing::info!(group = %group_id.0, actor = %actor.0, "group deleted");
        self.record_audit(
            AuditEvent::builder(actor, AuditAction::GroupDelete)
                .group_id(group_id)
                .build(),
        )
        .await;
        self.publish(group_id, RosterChangeKind::GroupDeleted, Some(actor), group.version)
            .await;
        Ok(())
    }

    // ─────────────────────────────── Joining ──────────────────────────────

    /// Resolve an invite code (case-insensitive) to its live group.
    pub async fn resolve_code(&self, code: &str) -> Result<Group, EngineError> {
        let code = codes::normalize_code(code)?;
        self.store
            .get_group_by_invite_code(&code)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => EngineError::CodeNotFound,
                other => other.into(),
            })
    }

    /// Submit an invite code. Direct policy commits the membership; the
    /// approval policy files a pending request and stops.
    pub async fn request_join(
        &self,
        actor: &UserId,
        code: &str,
        display_name: &str,
    ) -> Result<JoinOutcome, EngineError> {
        let group = self.resolve_code(code).await?;
        if group.is_member(actor) {
            return Err(EngineError::AlreadyMember);
        }
        if group.is_full() {
            return Err(EngineError::GroupFull);
        }

        match self.join_policy {
            JoinPolicy::Direct => {
                let member = NewMemberParams::joiner(actor.clone(), display_name);
                let updated = self.try_join(group, member).await?;
                self.record_audit(
                    AuditEvent::builder(actor, AuditAction::MemberJoin)
                        .group_id(&updated.id)
                        .build(),
                )
                .await;
                self.publish(
                    &updated.id,
                    RosterChangeKind::MemberJoined,
                    Some(actor),
                    updated.version,
                )
                .await;
                Ok(JoinOutcome::Joined(updated))
            }
            JoinPolicy::RequireApproval => {
                let params = CreateJoinRequestParams {
                    group_id: group.id.clone(),
                    user_id: actor.clone(),
                    user_name: display_name.to_string(),
                };
                let request_id =
                    self.store
                        .create_join_request(&params)
                        .await
                        .map_err(|e| match e {
                            StoreError::AlreadyExists => EngineError::DuplicatePending,
                            other => other.into(),
                        })?;
                let request = self
                    .store
                    .get_join_request(&request_id)
                    .await
                    .map_err(request_err)?;
                self.record_audit(
                    AuditEvent::builder(actor, AuditAction::RequestCreate)
                        .group_id(&group.id)
                        .build(),
                )
                .await;
                self.publish(
                    &group.id,
                    RosterChangeKind::RequestCreated,
                    Some(actor),
                    group.version,
                )
                .await;
                Ok(JoinOutcome::Pending(request))
            }
        }
    }

    /// Bounded-retry direct join. Each retry re-reads the group; the abort
    /// reason observed on the final attempt is surfaced verbatim.
    async fn try_join(&self, mut group: Group, member: NewMemberParams) -> Result<Group, EngineError> {
        for _ in 0..COMMIT_RETRY_ATTEMPTS {
            if group.is_member(&member.user_id) {
                return Err(EngineError::AlreadyMember);
            }
            if group.is_full() {
                return Err(EngineError::GroupFull);
            }
            match self.store.commit_join(&group.id, group.version, &member).await {
                Ok(()) => return self.store.get_group(&group.id).await.map_err(group_err),
                Err(StoreError::Conflict) => {
                    group = self.store.get_group(&group.id).await.map_err(group_err)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Storage(StoreError::Conflict))
    }

    // ────────────────────────── Approval workflow ─────────────────────────

    /// Approve a pending request. Capacity is re-validated at commit time:
    /// the roster may have filled since the request was filed, in which
    /// case the request stays pending and the caller gets `GroupFull`.
    pub async fn approve(
        &self,
        admin: &UserId,
        request_id: &JoinRequestId,
    ) -> Result<Group, EngineError> {
        let mut request = self
            .store
            .get_join_request(request_id)
            .await
            .map_err(request_err)?;
        let mut group = self
            .store
            .get_group(&request.group_id)
            .await
            .map_err(group_err)?;
        evaluator::check(admin, &group, None, OpClass::ManageRoster, self.clock.now())?;

        for _ in 0..COMMIT_RETRY_ATTEMPTS {
            if request.status != JoinRequestStatus::Pending {
                return Err(EngineError::RequestNotFound);
            }
            if group.is_member(&request.user_id) {
                return Err(EngineError::AlreadyMember);
            }
            if group.is_full() {
                return Err(EngineError::GroupFull);
            }
            let member = NewMemberParams::joiner(request.user_id.clone(), request.user_name.clone());
            match self
                .store
                .commit_approval(&group.id, group.version, request_id, &member)
                .await
            {
                Ok(()) => {
                    let updated = self.store.get_group(&group.id).await.map_err(group_err)?;
                    self.record_audit(
                        AuditEvent::builder(admin, AuditAction::RequestApprove)
                            .group_id(&updated.id)
                            .subject_id(&request.user_id)
                            .build(),
                    )
                    .await;
                    self.publish(
                        &updated.id,
                        RosterChangeKind::RequestApproved,
                        Some(&request.user_id),
                        updated.version,
                    )
                    .await;
                    return Ok(updated);
                }
                Err(StoreError::Conflict) => {
                    request = self
                        .store
                        .get_join_request(request_id)
                        .await
                        .map_err(request_err)?;
                    group = self.store.get_group(&group.id).await.map_err(group_err)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Storage(StoreError::Conflict))
    }

    /// Deny a pending request. Terminal; the requester may file a new one.
    pub async fn deny(&self, admin: &UserId, request_id: &JoinRequestId) -> Result<(), EngineError> {
        let request = self
            .store
            .get_join_request(request_id)
            .await
            .map_err(request_err)?;
        let group = self
            .store
            .get_group(&request.group_id)
            .await
            .map_err(group_err)?;
        evaluator::check(admin, &group, None, OpClass::ManageRoster, self.clock.now())?;

        self.store
            .resolve_join_request(request_id, JoinRequestStatus::Denied)
            .await
            .map_err(request_err)?;
        self.record_audit(
            AuditEvent::builder(admin, AuditAction::RequestDeny)
                .group_id(&group.id)
                .subject_id(&request.user_id)
                .build(),
        )
        .await;
        self.publish(
            &group.id,
            RosterChangeKind::RequestDenied,
            Some(&request.user_id),
            group.version,
        )
        .await;
        Ok(())
    }

    /// Withdraw one's own pending request.
    pub async fn cancel(&self, actor: &UserId, request_id: &JoinRequestId) -> Result<(), EngineError> {
        let request = self
            .store
            .get_join_request(request_id)
            .await
            .map_err(request_err)?;
        if request.user_id != *actor {
            return Err(EngineError::Unauthorized("only the requester can cancel"));
        }
        let group = self
            .store
            .get_group(&request.group_id)
            .await
            .map_err(group_err)?;

        self.store
            .resolve_join_request(request_id, JoinRequestStatus::Cancelled)
            .await
            .map_err(request_err)?;
        self.record_audit(
            AuditEvent::builder(actor, AuditAction::RequestCancel)
                .group_id(&request.group_id)
                .build(),
        )
        .await;
        self.publish(
            &request.group_id,
            RosterChangeKind::RequestCancelled,
            Some(actor),
            group.version,
        )
        .await;
        Ok(())
    }

    // ─────────────────────────── Leaving & removal ────────────────────────

    /// Leave a group. The owner cannot leave; only deletion ends an owner's
    /// membership. Starts the actor's 30-day creation cooldown.
    pub async fn leave(&self, actor: &UserId, group_id: &GroupId) -> Result<(), EngineError> {
        let group = self.store.get_group(group_id).await.map_err(group_err)?;
        if *actor == group.created_by {
            return Err(EngineError::Unauthorized(
                "the owner cannot leave; delete the group instead",
            ));
        }
        let updated = self.commit_departure(group, actor).await?;

        self.record_audit(
            AuditEvent::builder(actor, AuditAction::MemberLeave)
                .group_id(group_id)
                .build(),
        )
        .await;
        self.publish(group_id, RosterChangeKind::MemberLeft, Some(actor), updated.version)
            .await;
        Ok(())
    }

    /// Forced removal, owner-only. The target gets the same cooldown as a
    /// voluntary leave.
    pub async fn remove_member(
        &self,
        admin: &UserId,
        group_id: &GroupId,
        target: &UserId,
    ) -> Result<(), EngineError> {
        let group = self.store.get_group(group_id).await.map_err(group_err)?;
        if *admin != group.created_by {
            return Err(EngineError::Unauthorized("only the group owner can remove members"));
        }
        if *target == group.created_by {
            return Err(EngineError::Unauthorized("the owner cannot be removed"));
        }
        let updated = self.commit_departure(group, target).await?;

        self.record_audit(
            AuditEvent::builder(admin, AuditAction::MemberRemove)
                .group_id(group_id)
                .subject_id(target)
                .build(),
        )
        .await;
        self.publish(group_id, RosterChangeKind::MemberRemoved, Some(target), updated.version)
            .await;
        Ok(())
    }

    async fn commit_departure(&self, mut group: Group, target: &UserId) -> Result<Group, EngineError> {
        for _ in 0..COMMIT_RETRY_ATTEMPTS {
            if !group.is_member(target) {
                return Err(EngineError::MemberNotFound);
            }
            let cooldown_end = self.clock.now() + Duration::days(COOLDOWN_DAYS);
            match self
                .store
                .commit_leave(&group.id, group.version, target, cooldown_end)
                .await
            {
                Ok(()) => return self.store.get_group(&group.id).await.map_err(group_err),
                Err(StoreError::Conflict) => {
                    group = self.store.get_group(&group.id).await.map_err(group_err)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Storage(StoreError::Conflict))
    }

    // ─────────────────────────── Roles & access ───────────────────────────

    /// Promote a member to admin (and writer). Owner-only, and the target
    /// must have at least 30 days of tenure so a fresh joiner cannot seize
    /// admin rights.
    pub async fn promote_to_admin(
        &self,
        actor: &UserId,
        group_id: &GroupId,
        target: &UserId,
    ) -> Result<Group, EngineError> {
        let mut group = self.store.get_group(group_id).await.map_err(group_err)?;
        if *actor != group.created_by {
            return Err(EngineError::Unauthorized("only the group owner can promote"));
        }
        let member = self
            .store
            .get_member(group_id, target)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => EngineError::MemberNotFound,
                other => other.into(),
            })?;
        let min_joined = self.clock.now() - Duration::days(PROMOTION_MIN_TENURE_DAYS);
        if member.joined_at > min_joined {
            return Err(EngineError::Unauthorized("member tenure too short to promote"));
        }
        if group.is_admin(target) {
            return Ok(group);
        }

        for _ in 0..COMMIT_RETRY_ATTEMPTS {
            match self.store.commit_promotion(group_id, group.version, target).await {
                Ok(()) => {
                    let updated = self.store.get_group(group_id).await.map_err(group_err)?;
                    self.record_audit(
                        AuditEvent::builder(actor, AuditAction::MemberPromote)
                            .group_id(group_id)
                            .subject_id(target)
                            .build(),
                    )
                    .await;
                    self.publish(
                        group_id,
                        RosterChangeKind::MemberPromoted,
                        Some(target),
                        updated.version,
                    )
                    .await;
                    return Ok(updated);
                }
                Err(StoreError::Conflict) => {
                    group = self.store.get_group(group_id).await.map_err(group_err)?;
                    if !group.is_member(target) {
                        return Err(EngineError::MemberNotFound);
                    }
                    if group.is_admin(target) {
                        return Ok(group);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Storage(StoreError::Conflict))
    }

    /// Temporarily revoke (or restore) a member's access without removing
    /// them. Single-field update; no roster transaction needed.
    pub async fn toggle_access(
        &self,
        admin: &UserId,
        group_id: &GroupId,
        target: &UserId,
        enabled: bool,
    ) -> Result<(), EngineError> {
        let group = self.store.get_group(group_id).await.map_err(group_err)?;
        evaluator::check(admin, &group, None, OpClass::ManageRoster, self.clock.now())?;
        if *target == group.created_by {
            return Err(EngineError::Unauthorized("the owner's access cannot be toggled"));
        }

        self.store
            .set_member_access(group_id, target, enabled)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => EngineError::MemberNotFound,
                other => other.into(),
            })?;
        self.record_audit(
            AuditEvent::builder(admin, AuditAction::MemberAccessToggle)
                .group_id(group_id)
                .subject_id(target)
                .details(serde_json::json!({ "enabled": enabled }))
                .build(),
        )
        .await;
        self.publish(group_id, RosterChangeKind::AccessToggled, Some(target), group.version)
            .await;
        Ok(())
    }

    // ──────────────────────────────── Queries ─────────────────────────────

    pub async fn get_group(&self, group_id: &GroupId) -> Result<Group, EngineError> {
        self.store.get_group(group_id).await.map_err(group_err)
    }

    /// Roster listing. Open to any authenticated actor, like group meta.
    pub async fn members(&self, group_id: &GroupId) -> Result<Vec<Member>, EngineError> {
        self.store.list_members(group_id).await.map_err(group_err)
    }

    pub async fn groups_for(&self, actor: &UserId) -> Result<Vec<Group>, EngineError> {
        Ok(self.store.list_groups_for_member(actor).await?)
    }

    /// Pending requests, admin-only.
    pub async fn pending_requests(
        &self,
        admin: &UserId,
        group_id: &GroupId,
    ) -> Result<Vec<JoinRequest>, EngineError> {
        let group = self.store.get_group(group_id).await.map_err(group_err)?;
        evaluator::check(admin, &group, None, OpClass::ManageRoster, self.clock.now())?;
        Ok(self
            .store
            .list_join_requests(group_id, Some(JoinRequestStatus::Pending))
            .await?)
    }

    // ──────────────────────────────── Helpers ─────────────────────────────

    async fn record_audit(&self, event: AuditEvent) {
        if let Err(e) = self.audit.record(event).await {
            tracing::warn!(error = %e, "failed to record audit event");
        }
    }

    async fn publish(
        &self,
        group_id: &GroupId,
        kind: RosterChangeKind,
        user: Option<&UserId>,
        version: i64,
    ) {
        let event = RosterChangeEvent {
            kind,
            user_id: user.map(|u| u.0),
            version,
            timestamp: self.clock.now().timestamp(),
        };
        if let Err(e) = self.events.publish(group_id, event).await {
            tracing::warn!(error = %e, "failed to publish roster change");
        }
    }
}

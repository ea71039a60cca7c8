//! Audit logging abstraction for medcircle.
//!
//! This crate defines the `AuditLog` trait for persisting audit events
//! and the types representing auditable actions in the system.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use medcircle_storage::{GroupId, UserId};

mod memory;
pub use memory::MemoryAuditLog;

/// Unique identifier for an audit log entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditLogId(pub Uuid);

impl AuditLogId {
    /// Generate a new audit log ID using UUID v7 (time-ordered)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for AuditLogId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AuditLogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AuditLogId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Categories of auditable actions
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // Group lifecycle
    GroupCreate,
    GroupRename,
    GroupDelete,

    // Roster operations
    MemberJoin,
    MemberLeave,
    MemberRemove,
    MemberPromote,
    MemberAccessToggle,

    // Join request operations
    RequestCreate,
    RequestApprove,
    RequestDeny,
    RequestCancel,

    // Entitlement operations
    SubscriptionChange,
    TransitionStart,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditAction::GroupCreate => "group.create",
            AuditAction::GroupRename => "group.rename",
            AuditAction::GroupDelete => "group.delete",
            AuditAction::MemberJoin => "member.join",
            AuditAction::MemberLeave => "member.leave",
            AuditAction::MemberRemove => "member.remove",
            AuditAction::MemberPromote => "member.promote",
            AuditAction::MemberAccessToggle => "member.access_toggle",
            AuditAction::RequestCreate => "request.create",
            AuditAction::RequestApprove => "request.approve",
            AuditAction::RequestDeny => "request.deny",
            AuditAction::RequestCancel => "request.cancel",
            AuditAction::SubscriptionChange => "subscription.change",
            AuditAction::TransitionStart => "transition.start",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "group.create" => Ok(AuditAction::GroupCreate),
            "group.rename" => Ok(AuditAction::GroupRename),
            "group.delete" => Ok(AuditAction::GroupDelete),
            "member.join" => Ok(AuditAction::MemberJoin),
            "member.leave" => Ok(AuditAction::MemberLeave),
            "member.remove" => Ok(AuditAction::MemberRemove),
            "member.promote" => Ok(AuditAction::MemberPromote),
            "member.access_toggle" => Ok(AuditAction::MemberAccessToggle),
            "request.create" => Ok(AuditAction::RequestCreate),
            "request.approve" => Ok(AuditAction::RequestApprove),
            "request.deny" => Ok(AuditAction::RequestDeny),
            "request.cancel" => Ok(AuditAction::RequestCancel),
            "subscription.change" => Ok(AuditAction::SubscriptionChange),
            "transition.start" => Ok(AuditAction::TransitionStart),
            _ => Err(format!("Unknown audit action: {}", s)),
        }
    }
}

/// An audit log entry representing a single auditable action.
///
/// Uses raw UUIDs for serialization compatibility. Use the builder
/// to construct events from typed IDs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique identifier for this audit entry
    pub id: AuditLogId,
    /// When the action occurred
    pub timestamp: DateTime<Utc>,
    /// Actor that performed the action (UUID)
    pub actor_id: Uuid,
    /// The action that was performed
    pub action: AuditAction,
    /// Group context (if applicable)
    pub group_id: Option<Uuid>,
    /// The member the action was about, when not the actor (removals,
    /// promotions, approvals)
    pub subject_id: Option<Uuid>,
    /// Additional details as JSON (e.g., old/new values)
    pub details: Option<serde_json::Value>,
}

impl AuditEvent {
    /// Create a new audit event builder
    pub fn builder(actor_id: &UserId, action: AuditAction) -> AuditEventBuilder {
        AuditEventBuilder::new(actor_id, action)
    }

    /// Get the actor ID as a typed ID
    pub fn get_actor_id(&self) -> UserId {
        UserId(self.actor_id)
    }

    /// Get the group ID as a typed ID (if present)
    pub fn get_group_id(&self) -> Option<GroupId> {
        self.group_id.map(GroupId)
    }

    /// Get the subject ID as a typed ID (if present)
    pub fn get_subject_id(&self) -> Option<UserId> {
        self.subject_id.map(UserId)
    }
}

/// Builder for constructing audit events
pub struct AuditEventBuilder {
    actor_id: Uuid,
    action: AuditAction,
    group_id: Option<Uuid>,
    subject_id: Option<Uuid>,
    details: Option<serde_json::Value>,
}

impl AuditEventBuilder {
    pub fn new(actor_id: &UserId, action: AuditAction) -> Self {
        Self {
            actor_id: actor_id.0,
            action,
            group_id: None,
            subject_id: None,
            details: None,
        }
    }

    pub fn group_id(mut self, group_id: &GroupId) -> Self {
        self.group_id = Some(group_id.0);
        self
    }

    pub fn subject_id(mut self, subject_id: &UserId) -> Self {
        self.subject_id = Some(subject_id.0);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn build(self) -> AuditEvent {
        AuditEvent {
            id: AuditLogId::new(),
            timestamp: Utc::now(),
            actor_id: self.actor_id,
            action: self.action,
            group_id: self.group_id,
            subject_id: self.subject_id,
            details: self.details,
        }
    }
}

/// Filter for querying audit logs
#[derive(Clone, Debug, Default)]
pub struct AuditLogFilter {
    /// Filter by actor ID
    pub actor_id: Option<UserId>,
    /// Filter by group ID
    pub group_id: Option<GroupId>,
    /// Filter by action
    pub action: Option<AuditAction>,
    /// Filter by start timestamp (inclusive)
    pub from: Option<DateTime<Utc>>,
    /// Filter by end timestamp (exclusive)
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of results to return
    pub limit: Option<u32>,
}

impl AuditLogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actor_id(mut self, actor_id: UserId) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn group_id(mut self, group_id: GroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn from(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Error type for audit log operations
#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("database error: {0}")]
    Database(String),

    #[error("audit log not found: {0}")]
    NotFound(AuditLogId),
}

/// Trait for audit log persistence.
///
/// Implementations store audit events and provide query capabilities
/// for support and abuse investigations.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Record an audit event.
    ///
    /// This should be called after each auditable operation completes.
    /// Failures to record audit events should be logged but should not
    /// fail the main operation.
    async fn record(&self, event: AuditEvent) -> Result<(), AuditLogError>;

    /// Query audit logs with optional filters.
    ///
    /// Returns events matching the filter criteria, ordered by timestamp descending.
    async fn query(&self, filter: AuditLogFilter) -> Result<Vec<AuditEvent>, AuditLogError>;

    /// Get a specific audit log entry by ID.
    async fn get(&self, id: AuditLogId) -> Result<AuditEvent, AuditLogError>;

    /// Count audit logs matching the filter criteria.
    async fn count(&self, filter: AuditLogFilter) -> Result<u64, AuditLogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_action_display() {
        assert_eq!(AuditAction::GroupCreate.to_string(), "group.create");
        assert_eq!(AuditAction::MemberJoin.to_string(), "member.join");
        assert_eq!(
            AuditAction::MemberAccessToggle.to_string(),
            "member.access_toggle"
        );
    }

    #[test]
    fn test_audit_action_parse() {
        assert_eq!(
            "request.approve".parse::<AuditAction>().unwrap(),
            AuditAction::RequestApprove
        );
        assert_eq!(
            "transition.start".parse::<AuditAction>().unwrap(),
            AuditAction::TransitionStart
        );
        assert!("secret.create".parse::<AuditAction>().is_err());
    }

    #[test]
    fn test_audit_action_roundtrip() {
        for action in [
            AuditAction::GroupCreate,
            AuditAction::GroupRename,
            AuditAction::GroupDelete,
            AuditAction::MemberJoin,
            AuditAction::MemberLeave,
            AuditAction::MemberRemove,
            AuditAction::MemberPromote,
            AuditAction::MemberAccessToggle,
            AuditAction::RequestCreate,
            AuditAction::RequestApprove,
            AuditAction::RequestDeny,
            AuditAction::RequestCancel,
            AuditAction::SubscriptionChange,
            AuditAction::TransitionStart,
        ] {
            let parsed: AuditAction = action.to_string().parse().unwrap();
            assert_eq!(action, parsed);
        }
    }

    #[test]
    fn test_audit_log_id_ordering() {
        // v7 IDs are time-ordered
        let a = AuditLogId::new();
        let b = AuditLogId::new();
        assert!(a.0 <= b.0);
    }

    #[test]
    fn test_builder_populates_context() {
        let actor = UserId(Uuid::new_v4());
        let group = GroupId(Uuid::new_v4());
        let subject = UserId(Uuid::new_v4());

        let event = AuditEvent::builder(&actor, AuditAction::MemberRemove)
            .group_id(&group)
            .subject_id(&subject)
            .details(serde_json::json!({"reason": "admin removal"}))
            .build();

        assert_eq!(event.get_actor_id(), actor);
        assert_eq!(event.get_group_id(), Some(group));
        assert_eq!(event.get_subject_id(), Some(subject));
        assert!(event.details.is_some());
    }

    #[test]
    fn test_event_serialization() {
        let actor = UserId(Uuid::new_v4());
        let event = AuditEvent::builder(&actor, AuditAction::GroupCreate).build();

        let json = serde_json::to_string(&event).unwrap();
        let back: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        assert_eq!(back.action, event.action);
        assert_eq!(back.actor_id, event.actor_id);
    }
}

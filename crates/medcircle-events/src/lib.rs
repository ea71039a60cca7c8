//! Event bus abstraction for roster change notifications.
//!
//! This crate defines the EventBus trait that allows different implementations
//! for broadcasting roster changes to group members:
//! - Memory (single server, tokio broadcast channels)
//! - Redis (multi-server, Redis pub/sub)

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

use medcircle_storage::GroupId;

/// Kind of roster change
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RosterChangeKind {
    GroupCreated,
    GroupRenamed,
    GroupDeleted,
    MemberJoined,
    MemberLeft,
    MemberRemoved,
    MemberPromoted,
    AccessToggled,
    RequestCreated,
    RequestApproved,
    RequestDenied,
    RequestCancelled,
    SubscriptionChanged,
}

/// Event representing a change to a group's roster or settings.
///
/// `version` is the group's version after the change, so subscribers can
/// detect gaps and re-fetch instead of replaying.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RosterChangeEvent {
    pub kind: RosterChangeKind,
    /// The member the change is about, if any.
    pub user_id: Option<Uuid>,
    pub version: i64,
    pub timestamp: i64,
}

/// Error type for event bus operations
#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("backend error: {0}")]
    Backend(String),
}

/// Stream of roster change events
pub type EventStream = Pin<Box<dyn Stream<Item = RosterChangeEvent> + Send>>;

/// Event bus trait for publishing and subscribing to roster changes.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a roster change to all watchers of this group.
    ///
    /// Called after a roster mutation commits. The event is broadcast to all
    /// active subscribers for this group.
    async fn publish(
        &self,
        group_id: &GroupId,
        event: RosterChangeEvent,
    ) -> Result<(), EventBusError>;

    /// Subscribe to roster changes for a group.
    ///
    /// Returns a stream that yields events as they occur.
    /// The stream will continue until dropped or the connection is closed.
    async fn subscribe(&self, group_id: &GroupId) -> Result<EventStream, EventBusError>;
}

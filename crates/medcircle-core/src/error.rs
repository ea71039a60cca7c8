use chrono::{DateTime, Utc};
use thiserror::Error;

use medcircle_storage::StoreError;

/// Engine error taxonomy.
///
/// Every invariant violation surfaces a specific, distinct error, because
/// the calling UI must distinguish "full", "already a member", "cooldown",
/// and "not authorized" to show the correct remediation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not authenticated")]
    Unauthenticated,

    #[error("group not found")]
    GroupNotFound,

    #[error("invite code not found")]
    CodeNotFound,

    #[error("join request not found")]
    RequestNotFound,

    #[error("member not found")]
    MemberNotFound,

    #[error("group is full")]
    GroupFull,

    #[error("already a member of this group")]
    AlreadyMember,

    #[error("you already own a group; delete it before creating another")]
    AlreadyOwnsGroup,

    #[error("a join request is already pending")]
    DuplicatePending,

    #[error("not authorized: {0}")]
    Unauthorized(&'static str),

    #[error("cooldown active until {0}")]
    CooldownActive(DateTime<Utc>),

    #[error("transition limit reached")]
    TransitionLimitReached,

    /// Operational alarm rather than a normal user-facing error: repeated
    /// collisions imply systemic exhaustion or a generator bug.
    #[error("invite code allocation exhausted after {0} attempts")]
    AllocationExhausted(u32),

    #[error("trial expired")]
    TrialExpired,

    #[error("invalid group name: {0}")]
    InvalidName(&'static str),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_messages_for_remediation() {
        assert_eq!(EngineError::GroupFull.to_string(), "group is full");
        assert_eq!(
            EngineError::AlreadyMember.to_string(),
            "already a member of this group"
        );
        assert!(EngineError::Unauthorized("not an admin")
            .to_string()
            .contains("not an admin"));
        assert!(EngineError::AllocationExhausted(10).to_string().contains("10"));
    }

    #[test]
    fn store_error_converts() {
        let err: EngineError = StoreError::Conflict.into();
        assert!(matches!(err, EngineError::Storage(StoreError::Conflict)));
    }
}

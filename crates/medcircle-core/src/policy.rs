//! Fixed product policy. These are product decisions, not configuration,
//! and are deliberately not overridable at runtime.

pub use medcircle_storage::MAX_MEMBERS;

/// Content access is granted without a subscription for this many days
/// after group creation.
pub const TRIAL_DAYS: i64 = 14;

/// Days after leaving/removal during which an actor cannot create a group.
pub const COOLDOWN_DAYS: i64 = 30;

/// Minimum tenure before a member can be promoted to admin.
pub const PROMOTION_MIN_TENURE_DAYS: i64 = 30;

/// Lifetime cap on member-to-own-admin transitions.
pub const TRANSITION_LIMIT: i32 = 3;

/// Invite code length.
pub const CODE_LEN: usize = 6;

/// Attempt budget for invite-code allocation. Repeated collisions at
/// 1/36^6 per draw signal a generator bug, not bad luck.
pub const CODE_ALLOC_ATTEMPTS: u32 = 10;

/// Maximum group name length in characters.
pub const MAX_GROUP_NAME_LEN: usize = 50;

/// Attempt budget for optimistic roster commits. Each retry re-reads the
/// group before deciding whether the precondition still holds.
pub const COMMIT_RETRY_ATTEMPTS: u32 = 3;

//! Per-actor, cross-group profile types.

use chrono::{DateTime, Utc};

use super::UserId;

/// User profile: cooldown and transition bookkeeping for one actor
/// across all groups.
#[derive(Clone, Debug)]
pub struct UserProfile {
    pub user_id: UserId,
    /// False while a leave/removal cooldown is active. Healed lazily by
    /// the entitlement clock once the cooldown has elapsed.
    pub can_create_group: bool,
    pub cooldown_end_date: Option<DateTime<Utc>>,
    pub last_transition_at: Option<DateTime<Utc>>,
    /// Lifetime count of member-to-own-admin transitions; only ever
    /// increments.
    pub transition_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//! Join request types for the approval-flow variant.

use chrono::{DateTime, Utc};
use std::str::FromStr;

use super::{GroupId, JoinRequestId, UserId};

/// Status of a join request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JoinRequestStatus {
    Pending,
    Approved,
    Denied,
    Cancelled,
}

impl FromStr for JoinRequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JoinRequestStatus::Pending),
            "approved" => Ok(JoinRequestStatus::Approved),
            "denied" => Ok(JoinRequestStatus::Denied),
            "cancelled" => Ok(JoinRequestStatus::Cancelled),
            _ => Err(format!("invalid join request status: {}", s)),
        }
    }
}

impl JoinRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinRequestStatus::Pending => "pending",
            JoinRequestStatus::Approved => "approved",
            JoinRequestStatus::Denied => "denied",
            JoinRequestStatus::Cancelled => "cancelled",
        }
    }
}

/// Join request record.
///
/// At most one `pending` request exists per (user, group); the store
/// enforces this with `AlreadyExists`.
#[derive(Clone, Debug)]
pub struct JoinRequest {
    pub id: JoinRequestId,
    pub group_id: GroupId,
    pub user_id: UserId,
    pub user_name: String,
    pub status: JoinRequestStatus,
    pub requested_at: DateTime<Utc>,
}

/// Parameters for creating a join request
#[derive(Clone, Debug)]
pub struct CreateJoinRequestParams {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub user_name: String,
}

//! Strongly-typed identifiers (avoid mixing strings/UUIDs arbitrarily).

use uuid::Uuid;

/// Actor identifier, issued by the identity provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub Uuid);

/// Group identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupId(pub Uuid);

/// Join request identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct JoinRequestId(pub Uuid);

/// Persistent device identifier, survives app reinstall.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

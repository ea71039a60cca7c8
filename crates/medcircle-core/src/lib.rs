//! The group authorization & entitlement engine.
//!
//! This crate decides, for any actor and any requested operation, whether
//! the operation is allowed, while maintaining the global invariants:
//! group size, role/permission assignment, trial windows, and
//! abuse-prevention cooldowns.
//!
//! The pieces:
//! - [`codes`]: invite-code generation and normalization
//! - [`evaluator`]: the pure role & permission predicate ([`can_perform`])
//! - [`EntitlementClock`]: trial windows, cooldowns, daily device quota
//! - [`RosterService`]: the join/leave/approval state machine, the only
//!   component that mutates roster fields
//!
//! All checks run against the server-side [`Clock`]; client timestamps are
//! never consulted.

mod clock;
mod entitlement;
mod error;
mod roster;

pub mod codes;
pub mod evaluator;
pub mod policy;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entitlement::{AttestationError, AttestationStore, EntitlementClock};
pub use error::EngineError;
pub use evaluator::{can_perform, trial_valid, OpClass};
pub use roster::{JoinOutcome, JoinPolicy, RosterService};

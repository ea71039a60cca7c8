//! Storage abstraction for medcircle.
//!
//! Backend crates (e.g., medcircle-store-sqlite) implement the [`Store`]
//! trait so `medcircle-core` doesn't depend on any specific database engine
//! or schema details.

use thiserror::Error;

mod store;
mod types;

pub use store::*;
pub use types::*;

/// Uniform error type for all storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    /// An optimistic version check failed; the caller should re-read and
    /// decide whether to retry.
    #[error("conflict")]
    Conflict,
    #[error("backend error: {0}")]
    Backend(String),
}

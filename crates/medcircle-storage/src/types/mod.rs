//! Type definitions for medcircle storage.

mod groups;
mod ids;
mod members;
mod profiles;
mod requests;
mod roles;
mod sessions;

// Re-export all types from submodules
pub use groups::*;
pub use ids::*;
pub use members::*;
pub use profiles::*;
pub use requests::*;
pub use roles::*;
pub use sessions::*;

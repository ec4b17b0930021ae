//! # ghr-id
//!
//! Typed handles and scope resolution shared by the runner fleet crates.
//!
//! Two independent resource spaces meet here:
//!
//! - **Compute instances**, identified by an opaque provider handle
//!   (`i-0abc123…`).
//! - **Runner registrations** at the CI coordinator, identified by a numeric
//!   id and registered under an owner scope (an organization, or a single
//!   repository).
//!
//! Keeping the handles typed prevents passing a runner id where an
//! installation id is expected, which is an easy mistake when both are bare
//! integers on the wire.

mod error;
mod macros;
mod scope;
mod types;

pub use error::IdError;
pub use scope::{OwnerScope, ScopeKey, ScopeKind};
pub use types::*;

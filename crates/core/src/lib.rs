//! `taskforge-core`: shared building blocks for the job subsystem.
//!
//! This crate holds **pure** primitives (identifiers, errors, run context) and
//! has no storage or process concerns.

pub mod context;
pub mod error;
pub mod id;

pub use context::RunContext;
pub use error::DomainError;
pub use id::JobId;

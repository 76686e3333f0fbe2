//! Shared building blocks for the event delivery gateway.
//!
//! - [`error`] -- the domain error taxonomy shared by every crate.
//! - [`topic`] -- topic pattern parsing, allow-list validation and matching.
//! - [`types`] -- common type aliases.

pub mod error;
pub mod topic;
pub mod types;

//! Authentication primitives.
//!
//! - [`jwt`] -- access-token validation and identity resolution.

pub mod jwt;

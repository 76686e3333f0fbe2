//! HTTP request handlers.

pub mod poll;

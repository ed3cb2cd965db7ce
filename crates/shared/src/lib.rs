//! Collabsphere Shared Types and Utilities
//!
//! Domain types, storage errors, database helpers and the per-connection
//! rate limiter used by the collabsphere server.

pub mod db;
pub mod error;
pub mod rate_limit;
pub mod types;

pub use db::*;
pub use error::*;
pub use rate_limit::{RateLimitConfig, RateLimitError, RateLimiter};
pub use types::*;

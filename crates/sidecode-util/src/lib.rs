//! Shared utilities for sidecode.
//!
//! This crate provides common utilities used across the sidecode workspace:
//! - ULID-based identifier generation
//! - Logging setup with tracing
//! - Wildcard pattern matching for policy rules
//! - RAII-based timing for tool and provider calls

pub mod id;
pub mod log;
pub mod timing;
pub mod wildcard;

pub use id::{IdPrefix, Identifier};
pub use timing::TimingGuard;

//! DLM Common - Shared types and utilities
//!
//! This crate provides the foundational pieces used across all dlm crates:
//! - The lock error taxonomy and `Result` alias
//! - Injectable random sources for fencing tokens and retry backoff
//! - Common constants

pub mod error;
pub mod random;

// Re-exports for convenience
pub use error::{LockError, Result};
pub use random::{RandomSource, SeededRandom, ThreadRandom};

/// Prefix prepended to every resource name to form the storage key
pub const KEY_PREFIX: &str = "dlm:";

/// Length of the random fencing token minted per acquisition attempt
pub const TOKEN_LENGTH: usize = 20;

/// Smallest TTL accepted by `lock`, in milliseconds
pub const MIN_TTL_MS: u64 = 200;

/// Clock drift is one part in this many of the TTL
pub const CLOCK_DRIFT_DIVISOR: u64 = 100;

/// Fixed part of the clock drift margin, in milliseconds
pub const CLOCK_DRIFT_BASE_MS: u64 = 2;

/// Renewal fires this long before the validity window closes
pub const RENEW_BUFFER_MS: u64 = 50;

pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MIN_MS: u64 = 100;
pub const DEFAULT_RETRY_DELAY_MAX_MS: u64 = 300;
pub const DEFAULT_NAME: &str = "default";

/// Number of agreeing nodes required out of `node_count` configured nodes
pub fn quorum(node_count: usize) -> usize {
    node_count / 2 + 1
}

/// Clock drift compensation margin for a TTL, in milliseconds
pub fn drift_ms(ttl_ms: u64) -> u64 {
    ttl_ms / CLOCK_DRIFT_DIVISOR + CLOCK_DRIFT_BASE_MS
}

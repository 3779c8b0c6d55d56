//! Random sources for fencing tokens and retry backoff
//!
//! The lock manager never reaches for a process-wide generator directly;
//! it is handed a `RandomSource` so tests can pin tokens and delays.

use parking_lot::Mutex;
use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::TOKEN_LENGTH;

/// Source of fencing tokens and backoff delays
pub trait RandomSource: Send + Sync {
    /// Mint a fresh alphanumeric token of `TOKEN_LENGTH` characters
    fn next_token(&self) -> String;

    /// Draw a delay uniformly from `[min_ms, max_ms)`, or `min_ms` when the range is empty
    fn next_delay_ms(&self, min_ms: u64, max_ms: u64) -> u64;
}

fn token_from<R: Rng + ?Sized>(rng: &mut R) -> String {
    rng.sample_iter(Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

fn delay_from<R: Rng + ?Sized>(rng: &mut R, min_ms: u64, max_ms: u64) -> u64 {
    if max_ms <= min_ms {
        return min_ms;
    }
    min_ms + rng.random_range(0..max_ms - min_ms)
}

/// Thread-local OS-seeded generator
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_token(&self) -> String {
        token_from(&mut rand::rng())
    }

    fn next_delay_ms(&self, min_ms: u64, max_ms: u64) -> u64 {
        delay_from(&mut rand::rng(), min_ms, max_ms)
    }
}

/// Deterministic generator seeded from a fixed value
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_token(&self) -> String {
        token_from(&mut *self.rng.lock())
    }

    fn next_delay_ms(&self, min_ms: u64, max_ms: u64) -> u64 {
        delay_from(&mut *self.rng.lock(), min_ms, max_ms)
    }
}

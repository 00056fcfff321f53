// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Retry backoff policy value object.
//!
//! Failed image tasks back off exponentially: `2^attempt` seconds capped at
//! 30 seconds, with +/-20% jitter so concurrent retries across sessions do not
//! synchronise against the model backend.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential backoff with cap and jitter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts per task, including the first.
    pub max_attempts: u32,
    /// Cap on a single backoff delay, in seconds.
    pub cap_secs: u64,
    /// Jitter fraction applied symmetrically around the nominal delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cap_secs: 30,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Nominal delay before retrying after the given failed attempt
    /// (one-based), without jitter: `2^attempt` seconds, capped.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(63);
        let secs = 2u64.saturating_pow(exp).min(self.cap_secs);
        Duration::from_secs(secs)
    }

    /// Delay with jitter applied, for actual scheduling.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let factor = rand::rng().random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        Duration::from_secs_f64(base * factor)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

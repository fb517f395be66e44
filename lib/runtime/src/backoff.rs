// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Exponential-with-jitter retry delays.
//!
//! Each sample multiplies the basis wait time by the square of the attempt
//! count and by a unit-mean exponential jitter, so the expected delay grows
//! as `basis × attempts²` while the superposition of many sessions
//! approximates a Poisson retry process instead of a thundering herd.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Duration;

/// Largest uniform sample fed to the jitter transform; bounds the
/// exponential tail at `-ln(1 - 0.995) ≈ 5.3×` the nominal delay.
const UNIFORM_CLAMP: f64 = 0.995;

/// Per-caller backoff state: a basis wait time and an attempt counter.
pub struct BackoffSession {
    basis: Duration,
    attempts: u32,
    rng: StdRng,
}

impl BackoffSession {
    pub fn new(basis: Duration) -> Self {
        Self::with_rng(basis, StdRng::from_entropy())
    }

    /// Create a session with an explicit RNG, for deterministic tests.
    pub fn with_rng(basis: Duration, rng: StdRng) -> Self {
        Self {
            basis,
            attempts: 0,
            rng,
        }
    }

    /// Sample the delay before the next attempt. Increments the attempt
    /// counter first, so the first call is already attempt 1.
    pub fn next_sleep_time(&mut self) -> Duration {
        self.attempts += 1;
        let uniform: f64 = self.rng.gen::<f64>().min(UNIFORM_CLAMP);
        let jitter = -(1.0 - uniform).ln();
        self.basis
            .mul_f64(jitter * f64::from(self.attempts).powi(2))
    }

    pub fn reset_attempts(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

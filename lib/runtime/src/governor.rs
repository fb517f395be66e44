// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-second admission pacing.
//!
//! [`QuotaGovernor::wait`] admits at most `rate_per_second` callers per
//! second, queueing fairly by arrival: each caller sleeps out the remainder
//! of the current period plus one full period per caller already pacing
//! ahead of it.

use parking_lot::Mutex;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::time::sleep;

/// Admission governor pacing callers to a per-second quota.
pub struct QuotaGovernor {
    wait_period: Duration,
    state: Mutex<GovernorState>,
}

struct GovernorState {
    /// Completion instant of the most recent admission, if any.
    last_time: Option<Instant>,
    /// Callers currently pacing inside [`QuotaGovernor::wait`].
    outstanding: usize,
}

impl QuotaGovernor {
    /// Create a governor admitting `rate_per_second` callers per second.
    pub fn new(rate_per_second: f64) -> Self {
        Self {
            wait_period: Duration::from_secs(1).div_f64(rate_per_second),
            state: Mutex::new(GovernorState {
                last_time: None,
                outstanding: 0,
            }),
        }
    }

    /// Pace the caller into the admission quota.
    ///
    /// Returns `true` once the pacing sleep elapsed in full and `false` when
    /// `cancel` fired first. On every exit — cancelled, or the future dropped
    /// mid-sleep — the last admission time is refreshed and the outstanding
    /// count drops, so later callers keep pacing against the most recent
    /// activity.
    pub async fn wait(&self, cancel: Option<&CancellationToken>) -> bool {
        let sleep_for = {
            let mut state = self.state.lock();
            let prior = state.outstanding;
            state.outstanding += 1;

            // Remainder of the current period; a governor that has never
            // admitted anyone owes no remainder at all.
            let remainder = match state.last_time {
                Some(last) => self.wait_period.saturating_sub(last.elapsed()),
                None => Duration::ZERO,
            };
            remainder + self.wait_period * prior as u32
        };

        let _admission = AdmissionGuard { governor: self };
        sleep(sleep_for, cancel).await
    }

    /// Callers currently pacing.
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }
}

/// Restores the admission books when `wait` ends, however it ends.
struct AdmissionGuard<'a> {
    governor: &'a QuotaGovernor,
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.governor.state.lock();
        state.last_time = Some(Instant::now());
        state.outstanding -= 1;
    }
}

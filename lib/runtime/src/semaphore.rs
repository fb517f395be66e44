// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Counting lock with handle identity.
//!
//! The multi-slot generalisation of [`Mutex`](crate::Mutex): `N` slots, each
//! acquisition issuing a distinct [`SlotHandle`]. Handles live in an
//! outstanding set, so a handle that was already released (or never issued)
//! cannot free a slot twice. At all times
//! `available slots + outstanding handles = N`.

use std::collections::HashSet;

use parking_lot::Mutex as StateLock;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::condition::Condition;

/// Proof of slot ownership. Each issued handle is distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle(u64);

/// Cooperative N-slot counting lock.
pub struct Semaphore {
    state: StateLock<SemaphoreState>,
    available: Condition,
}

struct SemaphoreState {
    slots: usize,
    next_serial: u64,
    outstanding: HashSet<u64>,
}

impl Semaphore {
    pub fn new(slots: usize) -> Self {
        Self {
            state: StateLock::new(SemaphoreState {
                slots,
                next_serial: 0,
                outstanding: HashSet::new(),
            }),
            available: Condition::new(),
        }
    }

    /// Take a slot, suspending while none is free. `None` on cancellation.
    pub async fn acquire(&self, cancel: Option<&CancellationToken>) -> Option<SlotHandle> {
        loop {
            let waiter = {
                let mut state = self.state.lock();
                if state.slots > 0 {
                    state.slots -= 1;
                    state.next_serial += 1;
                    let serial = state.next_serial;
                    state.outstanding.insert(serial);
                    return Some(SlotHandle(serial));
                }
                // Registered while the state lock is held, so a release on
                // another thread cannot notify into the gap.
                self.available.register()
            };
            if !waiter.wait(cancel).await {
                return None;
            }
        }
    }

    /// Return a slot. A handle not in the outstanding set is a no-op.
    pub fn release(&self, handle: SlotHandle) {
        {
            let mut state = self.state.lock();
            if !state.outstanding.remove(&handle.0) {
                return;
            }
            state.slots += 1;
        }
        self.available.notify_one();
    }

    /// Run `f` while holding a slot.
    ///
    /// Mirrors [`Mutex::with_lock`](crate::Mutex::with_lock): `Ok(None)` when
    /// acquisition was cancelled, `Ok(Some(result))` when the body completed,
    /// the body's error (after the slot is returned) otherwise. The slot is
    /// also returned when the future is dropped while the body is still
    /// suspended.
    pub async fn with_slot<F, Fut, R>(
        &self,
        cancel: Option<&CancellationToken>,
        f: F,
    ) -> Result<Option<R>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<R>>,
    {
        let Some(handle) = self.acquire(cancel).await else {
            return Ok(None);
        };
        let guard = ReleaseGuard {
            semaphore: self,
            handle,
        };
        let outcome = f().await;
        drop(guard);
        Ok(Some(outcome?))
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.state.lock().slots
    }

    /// Number of tasks suspended in [`Semaphore::acquire`].
    pub fn waiting(&self) -> usize {
        self.available.waiting()
    }
}

/// Ties the slot's return to scope exit, so `with_slot` cannot strand it
/// when its future is dropped mid-body.
struct ReleaseGuard<'a> {
    semaphore: &'a Semaphore,
    handle: SlotHandle,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.semaphore.release(self.handle);
    }
}

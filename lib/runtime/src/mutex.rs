// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Non-reentrant exclusive lock with handle identity.
//!
//! Each successful acquisition issues a fresh [`LockHandle`]; only the most
//! recently issued handle is honoured by [`Mutex::release`]. A task that was
//! cancelled after acquisition and comes back later with a stale handle
//! cannot release a lock it no longer owns — its release is a no-op.

use parking_lot::Mutex as StateLock;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::condition::Condition;

/// Proof of lock ownership. Only the most recently issued handle is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockHandle(u64);

/// Cooperative, non-reentrant exclusive lock.
pub struct Mutex {
    state: StateLock<MutexState>,
    available: Condition,
}

struct MutexState {
    locked: bool,
    lock_serial: u64,
}

impl Mutex {
    pub fn new() -> Self {
        Self {
            state: StateLock::new(MutexState {
                locked: false,
                lock_serial: 0,
            }),
            available: Condition::new(),
        }
    }

    /// Acquire the lock, suspending while it is held elsewhere.
    ///
    /// Returns `None` when the wait was cancelled. The serial increments on
    /// every acquisition (never on release), so a re-acquisition always
    /// produces a handle that invalidates all prior ones.
    pub async fn acquire(&self, cancel: Option<&CancellationToken>) -> Option<LockHandle> {
        loop {
            let waiter = {
                let mut state = self.state.lock();
                if !state.locked {
                    state.locked = true;
                    state.lock_serial += 1;
                    return Some(LockHandle(state.lock_serial));
                }
                // Registered while the state lock is held: a release on
                // another thread cannot slip its notify into the gap before
                // this task suspends.
                self.available.register()
            };
            if !waiter.wait(cancel).await {
                return None;
            }
        }
    }

    /// Release the lock. A stale handle, or a release while unlocked, is a
    /// no-op.
    pub fn release(&self, handle: LockHandle) {
        {
            let mut state = self.state.lock();
            if !state.locked || state.lock_serial != handle.0 {
                return;
            }
            state.locked = false;
        }
        self.available.notify_one();
    }

    /// Run `f` while holding the lock.
    ///
    /// Returns `Ok(None)` when acquisition was cancelled (the body never
    /// runs), `Ok(Some(result))` when the body completed, and the body's
    /// error otherwise. The lock is released before any body error is
    /// surfaced, and also when the returned future is dropped while the body
    /// is still suspended.
    pub async fn with_lock<F, Fut, R>(
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
            mutex: self,
            handle,
        };
        let outcome = f().await;
        drop(guard);
        Ok(Some(outcome?))
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Number of tasks suspended in [`Mutex::acquire`].
    pub fn waiting(&self) -> usize {
        self.available.waiting()
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Ties release to scope exit, so `with_lock` cannot strand the lock when
/// its future is dropped mid-body.
struct ReleaseGuard<'a> {
    mutex: &'a Mutex,
    handle: LockHandle,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.mutex.release(self.handle);
    }
}

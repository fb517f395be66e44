// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Wait-set condition primitive.
//!
//! [`Condition`] is the leaf abstraction every other primitive in this crate
//! is built on: a set of pending wake-ups with `notify_one` / `notify_all`
//! and cancellable waits. Notifications do not stack — a notify with no
//! waiters registered at that moment is lost.
//!
//! `notify_one` selects a waiter **uniformly at random** rather than in FIFO
//! or LIFO order. Waiters on a condition are indistinguishable, so tests of
//! the composing primitives assert set-membership rather than wake order, and
//! no waiter can be starved by a pathological queue position. The RNG is
//! injectable via [`Condition::with_rng`] so fairness tests can seed it.
//!
//! Waiting is two-phase: [`Condition::register`] enters the wait-set
//! immediately, [`WaitRegistration::wait`] suspends. A caller that guards a
//! predicate with its own lock registers *while still holding that lock*, so
//! a notify issued from another thread between the predicate check and the
//! suspension lands on the record instead of being lost.
//! [`Condition::wait`] fuses the two phases for callers without a predicate.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// A set of pending wake-ups with notify-one / notify-all and cancellation.
pub struct Condition {
    state: Mutex<WaitSet>,
    next_id: AtomicU64,
}

struct WaitSet {
    records: Vec<WakeRecord>,
    rng: StdRng,
}

/// One-shot resumption for a single suspended waiter.
struct WakeRecord {
    id: u64,
    tx: oneshot::Sender<()>,
}

impl Condition {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a condition with an explicit RNG for `notify_one` selection.
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            state: Mutex::new(WaitSet {
                records: Vec::new(),
                rng,
            }),
            next_id: AtomicU64::new(0),
        }
    }

    /// Enter the wait-set without suspending yet.
    ///
    /// The returned registration is visible to `notify_one` / `notify_all`
    /// from this moment on. Create it before releasing the lock that guards
    /// the predicate being waited on; a registration dropped without being
    /// awaited removes itself from the set.
    pub fn register(&self) -> WaitRegistration<'_> {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.lock().records.push(WakeRecord { id, tx });
        WaitRegistration {
            condition: self,
            id,
            rx,
            finished: false,
        }
    }

    /// Suspend the caller until notified or cancelled.
    ///
    /// Returns `true` when resumed by a notify and `false` when resumed by
    /// cancellation. A token that is already cancelled on entry still
    /// registers a record and cancels it immediately, so the cleanup path is
    /// identical on every exit.
    pub async fn wait(&self, cancel: Option<&CancellationToken>) -> bool {
        self.register().wait(cancel).await
    }

    /// Resolve one waiter, chosen uniformly at random. Lost if none waits.
    pub fn notify_one(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.records.is_empty() {
            return;
        }
        let index = state.rng.gen_range(0..state.records.len());
        let record = state.records.swap_remove(index);
        let _ = record.tx.send(());
    }

    /// Resolve every waiter registered at this moment.
    ///
    /// The wait-set is emptied before any record is resolved, so
    /// continuations that immediately re-register cannot observe (or be
    /// drained from) a stale set.
    pub fn notify_all(&self) {
        let drained = std::mem::take(&mut self.state.lock().records);
        for record in drained {
            let _ = record.tx.send(());
        }
    }

    /// Number of currently registered waiters.
    pub fn waiting(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Remove a record by id. Returns false when a notify got there first.
    fn dequeue(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        match state.records.iter().position(|record| record.id == id) {
            Some(index) => {
                state.records.swap_remove(index);
                true
            }
            None => false,
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

/// A wait-set entry that has not suspended yet.
///
/// Created by [`Condition::register`]. Dropped unresolved — without
/// [`WaitRegistration::wait`], or mid-wait — it removes its record from the
/// set.
pub struct WaitRegistration<'a> {
    condition: &'a Condition,
    id: u64,
    rx: oneshot::Receiver<()>,
    finished: bool,
}

impl WaitRegistration<'_> {
    /// Suspend until notified or cancelled. Same contract as
    /// [`Condition::wait`].
    pub async fn wait(mut self, cancel: Option<&CancellationToken>) -> bool {
        let Some(token) = cancel else {
            let notified = (&mut self.rx).await.is_ok();
            self.finished = true;
            return notified;
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => {}
            outcome = &mut self.rx => {
                self.finished = true;
                return outcome.is_ok();
            }
        }

        // Cancelled. If the record already left the set, a notify resolved it
        // before the cancellation was observed; the send happens under the
        // wait-set lock, so the wake-up is guaranteed visible here and must
        // not be dropped.
        self.finished = true;
        if self.condition.dequeue(self.id) {
            false
        } else {
            self.rx.try_recv().is_ok()
        }
    }
}

impl Drop for WaitRegistration<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.condition.dequeue(self.id);
        }
    }
}

// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cooperative concurrency primitives.
//!
//! Reference implementations of the textbook coordination pieces — condition
//! variable, handle-identity mutex and semaphore, unbuffered rendezvous
//! channel with select and iteration, cancellable sleep, exponential backoff,
//! admission pacing, bounded fan-out, and a coalescing self-restart job — so
//! the interactions between them (wait/notify, cancellation, handle-based
//! ownership, rendezvous ordering) stay visible and testable.
//!
//! Everything is built over one leaf abstraction, [`Condition`], which keeps
//! the set of pending wake-ups. The model is cooperative: tasks suspend only
//! at explicit await points, and a [`CancellationToken`] threaded through
//! every blocking call is the single cancellation mechanism. Cancellation is
//! a normal outcome, not a fault — locks report it with `None`, waits and
//! sleeps with `false`, channels with a dedicated [`ChannelError`] kind.
//!
//! State between await points mutates atomically on a current-thread
//! runtime. Each primitive additionally serialises its own state behind a
//! lock and enters its Condition's wait-set *before* that lock drops
//! ([`Condition::register`]), so a wake-up raced from another thread cannot
//! fall into a check-then-suspend gap; the invariants hold on multi-threaded
//! runtimes as well. Every held lock, slot, and counter is restored by guard
//! on drop, so abandoning a primitive's future mid-flight — the usual fate
//! of the losing side of a `tokio::select!` or `timeout` — leaks nothing.

pub use anyhow::{
    Context as ErrorContext, Error, Ok as OK, Result, anyhow as error, bail as raise,
};

pub mod backoff;
pub mod channel;
pub mod condition;
pub mod error;
pub mod governor;
pub mod job;
pub mod limiter;
pub mod logging;
pub mod mutex;
pub mod select;
pub mod semaphore;
pub mod time;

pub use backoff::BackoffSession;
pub use channel::Channel;
pub use condition::{Condition, WaitRegistration};
pub use error::ChannelError;
pub use governor::QuotaGovernor;
pub use job::RecurrentJob;
pub use limiter::ConcurrencyLimiter;
pub use mutex::{LockHandle, Mutex};
pub use select::{SelectArm, arm, select};
pub use semaphore::{Semaphore, SlotHandle};
pub use time::sleep;
pub use tokio_util::sync::CancellationToken;

/// Prelude module that re-exports commonly used types.
pub mod prelude {
    pub use crate::{
        BackoffSession, CancellationToken, Channel, ChannelError, ConcurrencyLimiter, Condition,
        Mutex, QuotaGovernor, RecurrentJob, Semaphore, arm, select, sleep,
    };
}

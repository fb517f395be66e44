// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Bounded fan-out task pool with drain.
//!
//! [`ConcurrencyLimiter::run`] admits an operation once a slot of the
//! internal [`Semaphore`] frees up, then detaches it; at most `limit`
//! operation bodies execute concurrently. [`ConcurrencyLimiter::wait`]
//! blocks until every submitted operation — running or still queued for a
//! slot — has finished.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::condition::Condition;
use crate::semaphore::{Semaphore, SlotHandle};
use crate::{Error, Result};

type ErrorHandler = Box<dyn FnOnce(Error) + Send>;

/// Bounded pool of detached operations.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    inner: Arc<LimiterInner>,
}

struct LimiterInner {
    slots: Semaphore,
    /// Operations submitted and not yet finished (queued or running).
    outstanding: Mutex<usize>,
    /// Notified (all) whenever outstanding drops to zero.
    drained: Condition,
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                slots: Semaphore::new(limit),
                outstanding: Mutex::new(0),
                drained: Condition::new(),
            }),
        }
    }

    /// Submit `op`, returning once it holds a slot. Failures are logged.
    pub async fn run<F>(&self, op: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.schedule(op, None).await;
    }

    /// Submit `op`, routing a failure to `on_error` instead of the log.
    pub async fn run_with_handler<F, H>(&self, op: F, on_error: H)
    where
        F: Future<Output = Result<()>> + Send + 'static,
        H: FnOnce(Error) + Send + 'static,
    {
        self.schedule(op, Some(Box::new(on_error))).await;
    }

    async fn schedule<F>(&self, op: F, on_error: Option<ErrorHandler>)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        *self.inner.outstanding.lock() += 1;

        // Undoes the pre-increment if this future is dropped while parked on
        // the slot; an abandoned submission must not wedge `wait`.
        let mut submission = SubmitGuard {
            inner: &self.inner,
            armed: true,
        };
        let handle = self
            .inner
            .slots
            .acquire(None)
            .await
            .expect("slot acquisition without a cancel token cannot be cancelled");
        submission.armed = false;

        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(err) = op.await {
                match on_error {
                    Some(handler) => handler(err),
                    None => tracing::error!(error = %err, "limiter operation failed"),
                }
            }
            inner.settle(Some(handle));
        });
    }

    /// Block until every submitted operation has finished.
    pub async fn wait(&self) {
        loop {
            let waiter = {
                let outstanding = self.inner.outstanding.lock();
                if *outstanding == 0 {
                    return;
                }
                // Registered while the count lock is held, so a settle on
                // another thread cannot notify into the gap.
                self.inner.drained.register()
            };
            waiter.wait(None).await;
        }
    }

    /// Operations submitted and not yet finished.
    pub fn outstanding(&self) -> usize {
        *self.inner.outstanding.lock()
    }
}

impl LimiterInner {
    /// Retire one submission: drop it from the outstanding count, return its
    /// slot if it held one, and wake drain waiters at zero.
    fn settle(&self, slot: Option<SlotHandle>) {
        let drained = {
            let mut outstanding = self.outstanding.lock();
            *outstanding -= 1;
            *outstanding == 0
        };
        if let Some(handle) = slot {
            self.slots.release(handle);
        }
        if drained {
            self.drained.notify_all();
        }
    }
}

struct SubmitGuard<'a> {
    inner: &'a LimiterInner,
    armed: bool,
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.settle(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_the_limit() {
        let limiter = ConcurrencyLimiter::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            limiter
                .run(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await;
        }

        limiter.wait().await;
        assert_eq!(running.load(Ordering::SeqCst), 0);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(limiter.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_drains_saturated_submissions() {
        let limiter = ConcurrencyLimiter::new(1);
        let finished = Arc::new(AtomicUsize::new(0));

        let submitter = {
            let limiter = limiter.clone();
            let finished = finished.clone();
            tokio::spawn(async move {
                for _ in 0..3 {
                    let finished = finished.clone();
                    limiter
                        .run(async move {
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            finished.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .await;
                }
            })
        };

        submitter.await.unwrap();
        limiter.wait().await;
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_idle() {
        let limiter = ConcurrencyLimiter::new(4);
        limiter.wait().await;
        assert_eq!(limiter.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_submission_does_not_wedge_wait() {
        let limiter = ConcurrencyLimiter::new(1);

        limiter
            .run(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
            .await;

        // This submission parks on the saturated semaphore.
        let stalled = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter.run(async { Ok(()) }).await;
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(limiter.outstanding(), 2);

        stalled.abort();
        let _ = stalled.await;
        assert_eq!(limiter.outstanding(), 1);

        limiter.wait().await;
        assert_eq!(limiter.outstanding(), 0);
    }

    #[tokio::test]
    async fn failures_are_routed_to_the_handler() {
        let limiter = ConcurrencyLimiter::new(1);
        let captured: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = captured.clone();
        limiter
            .run_with_handler(
                async { Err(crate::error!("operation exploded")) },
                move |err| sink.lock().push(err.to_string()),
            )
            .await;

        limiter.wait().await;
        assert_eq!(*captured.lock(), ["operation exploded"]);
    }
}

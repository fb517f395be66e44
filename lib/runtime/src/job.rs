// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Coalescing self-restart job.
//!
//! [`RecurrentJob::request`] folds any number of overlapping requests into at
//! most one follow-up run: a request while the operation is in flight marks
//! the job `Again`, further requests during the same run are idempotent, and
//! when the run ends a single fresh run is started. The follow-up is a fresh
//! detached task, never a loop inside the finishing one, so a failing run
//! without an error handler surfaces from its own task and cannot poison the
//! next run.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::condition::Condition;
use crate::{Error, Result};

type Operation = Box<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;
type ErrorHandler = Box<dyn Fn(Error) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    /// No run in flight, no run owed.
    Inert,
    /// A run is in flight and none is owed yet.
    InProgress,
    /// A run is in flight and exactly one follow-up is owed.
    Again,
}

/// A job whose overlapping work requests coalesce into one re-run.
#[derive(Clone)]
pub struct RecurrentJob {
    inner: Arc<JobInner>,
}

struct JobInner {
    op: Operation,
    on_error: Option<ErrorHandler>,
    state: Mutex<JobState>,
    /// Notified (all) whenever the job returns to `Inert`.
    idle: Condition,
}

impl RecurrentJob {
    pub fn new<F, Fut>(op: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::build(op, None)
    }

    /// Like [`RecurrentJob::new`], with run failures routed to `on_error`
    /// instead of the log.
    pub fn with_error_handler<F, Fut, H>(op: F, on_error: H) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
        H: Fn(Error) + Send + Sync + 'static,
    {
        Self::build(op, Some(Box::new(on_error)))
    }

    fn build<F, Fut>(op: F, on_error: Option<ErrorHandler>) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            inner: Arc::new(JobInner {
                op: Box::new(move || op().boxed()),
                on_error,
                state: Mutex::new(JobState::Inert),
                idle: Condition::new(),
            }),
        }
    }

    /// Ask for the operation to run (again).
    ///
    /// Starts a run when the job is inert; owes exactly one follow-up run
    /// when one is already in flight, no matter how many requests arrive.
    pub fn request(&self) {
        let start = {
            let mut state = self.inner.state.lock();
            match *state {
                JobState::Inert => {
                    *state = JobState::InProgress;
                    true
                }
                JobState::InProgress => {
                    *state = JobState::Again;
                    false
                }
                JobState::Again => false,
            }
        };
        if start {
            JobInner::spawn_run(self.inner.clone());
        }
    }

    /// Block until no run is in flight and none is owed.
    pub async fn wait(&self) {
        loop {
            let waiter = {
                let state = self.inner.state.lock();
                if *state == JobState::Inert {
                    return;
                }
                // Registered while the state lock is held, so a finishing
                // run on another thread cannot notify into the gap.
                self.inner.idle.register()
            };
            waiter.wait(None).await;
        }
    }

    pub fn is_idle(&self) -> bool {
        *self.inner.state.lock() == JobState::Inert
    }
}

impl JobInner {
    fn spawn_run(inner: Arc<JobInner>) {
        tokio::spawn(async move {
            if let Err(err) = (inner.op)().await {
                match &inner.on_error {
                    Some(handler) => handler(err),
                    None => tracing::error!(error = %err, "recurrent job run failed"),
                }
            }

            // State advances regardless of how the run ended.
            let run_again = {
                let mut state = inner.state.lock();
                if *state == JobState::Again {
                    *state = JobState::InProgress;
                    true
                } else {
                    *state = JobState::Inert;
                    false
                }
            };
            if run_again {
                JobInner::spawn_run(inner);
            } else {
                inner.idle.notify_all();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Duration;

    fn counting_job(runs: Arc<AtomicUsize>) -> RecurrentJob {
        RecurrentJob::new(move || {
            let runs = runs.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn a_single_request_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let job = counting_job(runs.clone());

        job.request();
        job.wait().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(job.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_requests_coalesce_into_one_follow_up() {
        let runs = Arc::new(AtomicUsize::new(0));
        let job = counting_job(runs.clone());

        job.request();
        tokio::task::yield_now().await;

        // Five requests while the first run is in flight owe exactly one
        // more run.
        for _ in 0..5 {
            job.request();
        }

        job.wait().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(job.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn requests_after_idle_start_fresh_runs() {
        let runs = Arc::new(AtomicUsize::new(0));
        let job = counting_job(runs.clone());

        job.request();
        job.wait().await;
        job.request();
        job.wait().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_reach_the_handler_and_state_still_advances() {
        let captured: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        let job = RecurrentJob::with_error_handler(
            || async { Err(crate::error!("run exploded")) },
            move |err| sink.lock().push(err.to_string()),
        );

        job.request();
        job.wait().await;
        assert_eq!(*captured.lock(), ["run exploded"]);
        assert!(job.is_idle());

        // A failed run does not wedge the job.
        job.request();
        job.wait().await;
        assert_eq!(captured.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_immediately_when_inert() {
        let job = counting_job(Arc::new(AtomicUsize::new(0)));
        job.wait().await;
        assert!(job.is_idle());
    }
}

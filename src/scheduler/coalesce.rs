// SPDX-License-Identifier: GPL-3.0-only
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error};

type Job<A> = Arc<dyn Fn(A) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

enum Phase<A> {
    Idle,
    Running,
    RunningWithPending(A),
}

struct Inner<A> {
    phase: Phase<A>,
    /// Number of executions started so far
    started: u64,
}

/// Single-flight wrapper around an async job.
///
/// At most one execution runs at a time. Triggers that arrive while an
/// execution is in flight collapse into exactly one trailing execution, which
/// receives the argument of the first of those triggers.
pub struct Coalescer<A> {
    name: &'static str,
    job: Job<A>,
    inner: Arc<Mutex<Inner<A>>>,
    finished: Arc<watch::Sender<u64>>,
}

impl<A> Clone for Coalescer<A> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            job: Arc::clone(&self.job),
            inner: Arc::clone(&self.inner),
            finished: Arc::clone(&self.finished),
        }
    }
}

impl<A: Send + 'static> Coalescer<A> {
    pub fn new<F>(name: &'static str, job: F) -> Self
    where
        F: Fn(A) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        let (finished, _) = watch::channel(0);
        Self {
            name,
            job: Arc::new(job),
            inner: Arc::new(Mutex::new(Inner {
                phase: Phase::Idle,
                started: 0,
            })),
            finished: Arc::new(finished),
        }
    }

    /// Request an execution without waiting for it.
    ///
    /// Returns the sequence number of the execution that will satisfy this
    /// request. Must be called from within a tokio runtime.
    pub fn trigger(&self, arg: A) -> u64 {
        let mut inner = self.lock();
        match std::mem::replace(&mut inner.phase, Phase::Running) {
            Phase::Idle => {
                inner.started += 1;
                let ticket = inner.started;
                drop(inner);

                debug!(job = self.name, ticket, "Starting execution");
                tokio::spawn(self.clone().drive(arg));
                ticket
            }
            Phase::Running => {
                inner.phase = Phase::RunningWithPending(arg);
                debug!(job = self.name, "Execution in flight, queued trailing run");
                inner.started + 1
            }
            Phase::RunningWithPending(first) => {
                // The first batched argument wins; later ones ride along
                inner.phase = Phase::RunningWithPending(first);
                inner.started + 1
            }
        }
    }

    /// Request an execution and wait until one that satisfies the request has finished.
    pub async fn run(&self, arg: A) {
        let ticket = self.trigger(arg);
        self.wait_for(ticket).await;
    }

    /// Wait until the execution with sequence number `ticket` has finished
    pub async fn wait_for(&self, ticket: u64) {
        let mut finished = self.finished.subscribe();
        // The sender lives as long as self, so this can only fail if it was dropped mid-wait
        let _ = finished.wait_for(|done| *done >= ticket).await;
    }

    /// Total number of executions that have completed
    #[cfg(test)]
    pub fn completed(&self) -> u64 {
        *self.finished.borrow()
    }

    #[cfg(test)]
    pub fn is_idle(&self) -> bool {
        matches!(self.lock().phase, Phase::Idle)
    }

    /// Wait until no execution is in flight or queued
    pub async fn wait_idle(&self) {
        loop {
            let started = {
                let inner = self.lock();
                if matches!(inner.phase, Phase::Idle) {
                    return;
                }
                inner.started
            };
            self.wait_for(started).await;
        }
    }

    async fn drive(self, first: A) {
        let mut arg = first;
        loop {
            let outcome = AssertUnwindSafe((self.job)(arg)).catch_unwind().await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(job = self.name, error = %e, "Coalesced job failed"),
                Err(_) => error!(job = self.name, "Coalesced job panicked"),
            }

            let next = {
                let mut inner = self.lock();
                self.finished.send_modify(|done| *done += 1);
                match std::mem::replace(&mut inner.phase, Phase::Idle) {
                    Phase::RunningWithPending(pending) => {
                        inner.phase = Phase::Running;
                        inner.started += 1;
                        Some(pending)
                    }
                    Phase::Running | Phase::Idle => None,
                }
            };

            match next {
                Some(pending) => {
                    debug!(job = self.name, "Starting trailing execution");
                    arg = pending;
                }
                None => break,
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<A>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

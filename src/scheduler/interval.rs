// SPDX-License-Identifier: GPL-3.0-only
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::scheduler::sleep::sleep;

/// Used when a loop is started with an empty schedule
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

/// Walks an interval schedule front to back, then repeats the last value forever.
///
/// Lets a daemon poll aggressively right after startup and settle into a
/// steady-state interval.
#[derive(Debug, Clone)]
pub struct IntervalSchedule {
    intervals: Vec<Duration>,
    position: usize,
}

impl IntervalSchedule {
    pub fn new(intervals: impl Into<Vec<Duration>>) -> Self {
        Self {
            intervals: intervals.into(),
            position: 0,
        }
    }

    pub fn next_interval(&mut self) -> Duration {
        match self.intervals.get(self.position) {
            Some(interval) => {
                self.position += 1;
                *interval
            }
            None => self.intervals.last().copied().unwrap_or(DEFAULT_INTERVAL),
        }
    }
}

/// Run `job` forever, sleeping the next scheduled interval between runs.
///
/// The time spent inside `job` is deducted from the following sleep. Errors and
/// panics from `job` are logged and never stop the loop. Cancellation is only
/// observed at the sleep point: a run in progress always finishes first.
pub async fn run_at_intervals<F, Fut>(
    name: &str,
    mut job: F,
    schedule: IntervalSchedule,
    cancel: CancellationToken,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut schedule = schedule;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let started = Instant::now();
        match AssertUnwindSafe(job()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(daemon = name, error = %e, "Daemon run failed"),
            Err(_) => error!(daemon = name, "Daemon run panicked"),
        }

        let wait = schedule.next_interval().saturating_sub(started.elapsed());
        debug!(daemon = name, wait_ms = wait.as_millis() as u64, "Waiting for next run");

        if sleep(wait, &cancel).await.is_err() {
            break;
        }
    }

    debug!(daemon = name, "Daemon loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{Notify, mpsc};

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    #[test]
    fn test_schedule_repeats_last_value() {
        let mut schedule = IntervalSchedule::new(secs(&[1, 5, 30]));
        assert_eq!(schedule.next_interval(), Duration::from_secs(1));
        assert_eq!(schedule.next_interval(), Duration::from_secs(5));
        assert_eq!(schedule.next_interval(), Duration::from_secs(30));
        assert_eq!(schedule.next_interval(), Duration::from_secs(30));
        assert_eq!(schedule.next_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_empty_schedule_uses_default() {
        let mut schedule = IntervalSchedule::new(Vec::new());
        assert_eq!(schedule.next_interval(), DEFAULT_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_follow_schedule() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let counter = Arc::clone(&calls);
        let task = tokio::spawn(run_at_intervals(
            "test",
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            IntervalSchedule::new(secs(&[10, 100])),
            cancel.clone(),
        ));

        // t=0 first run, t=10 second run, t=110 third, t=210 fourth
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_do_not_stop_loop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let counter = Arc::clone(&calls);
        let task = tokio::spawn(run_at_intervals(
            "failing",
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n == 1 {
                        panic!("boom");
                    }
                    Err(anyhow::anyhow!("run {} failed", n))
                }
            },
            IntervalSchedule::new(secs(&[1])),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_run_shortens_sleep() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let counter = Arc::clone(&calls);
        let task = tokio::spawn(run_at_intervals(
            "slow",
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(8)).await;
                    Ok(())
                }
            },
            IntervalSchedule::new(secs(&[10])),
            cancel.clone(),
        ));

        // Runs start at t=0 and t=10, not t=18
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_sleep_stops_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let counter = Arc::clone(&calls);
        let task = tokio::spawn(run_at_intervals(
            "idle",
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            IntervalSchedule::new(secs(&[3600])),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_run_lets_run_finish() {
        let calls = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let counter = Arc::clone(&calls);
        let done = Arc::clone(&finished);
        let gate = Arc::clone(&release);
        let task = tokio::spawn(run_at_intervals(
            "busy",
            move || {
                let counter = Arc::clone(&counter);
                let done = Arc::clone(&done);
                let gate = Arc::clone(&gate);
                let started_tx = started_tx.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let _ = started_tx.send(());
                    gate.notified().await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            IntervalSchedule::new(secs(&[0])),
            cancel.clone(),
        ));

        started_rx.recv().await.unwrap();
        cancel.cancel();
        release.notify_one();
        task.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}

// SPDX-License-Identifier: GPL-3.0-only
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Returned by [`sleep`] when the cancellation token fires before the delay elapses.
///
/// This is cooperative shutdown, not a failure. Call sites must not log it as an error.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation aborted")]
pub struct Aborted;

/// Wait for `duration`, or fail with [`Aborted`] as soon as `cancel` fires.
///
/// A token that is already cancelled aborts immediately without arming a timer.
/// Both the timer and the cancellation listener are dropped on every exit path.
pub async fn sleep(duration: Duration, cancel: &CancellationToken) -> Result<(), Aborted> {
    if cancel.is_cancelled() {
        return Err(Aborted);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Aborted),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes() {
        let cancel = CancellationToken::new();
        let started = Instant::now();

        sleep(Duration::from_secs(5), &cancel).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = Instant::now();

        assert_eq!(sleep(Duration::from_secs(60), &cancel).await, Err(Aborted));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_cancelled_midway() {
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        let started = Instant::now();

        assert_eq!(sleep(Duration::from_secs(3600), &cancel).await, Err(Aborted));
        assert!(started.elapsed() < Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_zero_duration() {
        let cancel = CancellationToken::new();
        assert!(sleep(Duration::ZERO, &cancel).await.is_ok());
    }
}

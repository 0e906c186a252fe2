// SPDX-License-Identifier: GPL-3.0-only
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageEvent {
    /// Packages were installed, updated or removed outside the auto-updater
    PackagesModified { ids: Vec<String>, removed: bool },

    /// The auto-updater changed the installed set
    PackagesChanged,
}

/// In-process publish/subscribe channel for package events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PackageEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Deliver `event` to every current subscriber. Never fails, even without subscribers.
    pub fn publish(&self, event: PackageEvent) {
        match self.sender.send(event) {
            Ok(receivers) => debug!(receivers, "Published package event"),
            Err(broadcast::error::SendError(event)) => debug!(?event, "No subscribers for package event"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PackageEvent> {
        self.sender.subscribe()
    }

    /// Run `handler` for every event in a dedicated task until `cancel` fires.
    ///
    /// Handler errors and panics are logged and the task keeps listening.
    pub fn spawn_handler<F, Fut>(&self, name: &'static str, cancel: CancellationToken, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(PackageEvent) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = receiver.recv() => received,
                };

                match event {
                    Ok(event) => match AssertUnwindSafe(handler(event)).catch_unwind().await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!(handler = name, error = %e, "Event handler failed"),
                        Err(_) => error!(handler = name, "Event handler panicked"),
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(handler = name, skipped, "Event handler fell behind, events dropped")
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(handler = name, "Event handler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(PackageEvent::PackagesChanged);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::default();
        let mut receiver = bus.subscribe();

        bus.publish(PackageEvent::PackagesModified {
            ids: vec!["bitcoin.fleet".to_string()],
            removed: true,
        });

        assert_eq!(
            receiver.recv().await.unwrap(),
            PackageEvent::PackagesModified {
                ids: vec!["bitcoin.fleet".to_string()],
                removed: true
            }
        );
    }

    #[tokio::test]
    async fn test_handler_survives_errors_and_panics() {
        let bus = EventBus::default();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut calls = 0;
        let handle = bus.spawn_handler("test", cancel.clone(), move |event| {
            calls += 1;
            let call = calls;
            let tx = tx.clone();
            async move {
                let _ = tx.send(event);
                match call {
                    1 => anyhow::bail!("first event fails"),
                    2 => panic!("second event panics"),
                    _ => Ok(()),
                }
            }
        });

        for _ in 0..3 {
            bus.publish(PackageEvent::PackagesChanged);
        }
        for _ in 0..3 {
            assert_eq!(rx.recv().await, Some(PackageEvent::PackagesChanged));
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_stops_on_cancel() {
        let bus = EventBus::default();
        let cancel = CancellationToken::new();
        let handle = bus.spawn_handler("idle", cancel.clone(), |_| async { Ok(()) });

        cancel.cancel();
        handle.await.unwrap();
    }
}

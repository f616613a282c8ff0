// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Long-lived subscription to new-proposal notifications.
//!
//! [`EventSubscriber::subscribe`] opens the feed and spawns a task that
//! hands every [`FeedEvent`] to the callback, one at a time and in arrival
//! order. The returned [`Subscription`] owns that task.

use crate::error::SyncResult;
use crate::ledger::{FeedEvent, ProposalFeed};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Clone)]
pub struct EventSubscriber {
    feed: Arc<dyn ProposalFeed>,
}

impl EventSubscriber {
    pub fn new(feed: Arc<dyn ProposalFeed>) -> Self {
        Self { feed }
    }

    /// Open the feed after `from_block` and deliver each notification to
    /// `on_event`. The callback is awaited before the next event is taken.
    /// If the feed closes on its own, a final `Disconnected` is delivered.
    pub async fn subscribe<F, Fut>(
        &self,
        from_block: Option<u64>,
        mut on_event: F,
    ) -> SyncResult<Subscription>
    where
        F: FnMut(FeedEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let mut rx = self.feed.open(from_block, cancel.child_token()).await?;

        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        debug!("[Subscriber] Subscription cancelled");
                        break;
                    }
                    event = rx.recv() => match event {
                        Some(event) => on_event(event).await,
                        None => {
                            info!("[Subscriber] Feed closed");
                            if !task_cancel.is_cancelled() {
                                on_event(FeedEvent::Disconnected {
                                    reason: "feed closed".to_string(),
                                })
                                .await;
                            }
                            break;
                        }
                    }
                }
            }
        });

        Ok(Subscription {
            cancel,
            unsubscribed: AtomicBool::new(false),
            handle: Mutex::new(Some(handle)),
        })
    }
}

/// Handle to an open subscription. Dropping it unsubscribes.
pub struct Subscription {
    cancel: CancellationToken,
    unsubscribed: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    /// Stop delivery. Returns `true` only for the call that actually
    /// unsubscribed; later calls are no-ops.
    pub fn unsubscribe(&self) -> bool {
        if self.unsubscribed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();
        // The task exits at its next select; no need to abort mid-callback.
        self.handle.lock().take();
        true
    }

    /// Whether events may still be delivered
    pub fn is_active(&self) -> bool {
        !self.unsubscribed.load(Ordering::SeqCst)
            && self
                .handle
                .lock()
                .as_ref()
                .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("unsubscribed", &self.unsubscribed.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::test_utils::{new_proposal_event, proposal, MockProposalFeed};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn new_proposal(id: u64) -> FeedEvent {
        new_proposal_event(proposal(id), id)
    }

    async fn subscribe_collecting(
        feed: Arc<MockProposalFeed>,
    ) -> (Subscription, mpsc::UnboundedReceiver<FeedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = EventSubscriber::new(feed)
            .subscribe(Some(10), move |event| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(event);
                }
            })
            .await
            .unwrap();
        (subscription, rx)
    }

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let feed = Arc::new(MockProposalFeed::new());
        let (subscription, mut rx) = subscribe_collecting(feed.clone()).await;
        assert_eq!(feed.last_from_block(), Some(10));

        feed.emit(new_proposal(1)).await;
        feed.emit(new_proposal(2)).await;
        feed.emit(new_proposal(1)).await;

        assert_eq!(rx.recv().await, Some(new_proposal(1)));
        assert_eq!(rx.recv().await, Some(new_proposal(2)));
        assert_eq!(rx.recv().await, Some(new_proposal(1)));
        assert!(subscription.is_active());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let feed = Arc::new(MockProposalFeed::new());
        let (subscription, mut rx) = subscribe_collecting(feed.clone()).await;

        assert!(subscription.unsubscribe());
        assert!(!subscription.unsubscribe());
        assert!(!subscription.unsubscribe());
        assert!(!subscription.is_active());

        // The feed side observes the cancellation and drops its sender
        tokio::time::timeout(Duration::from_secs(1), async {
            while feed.is_open() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(!feed.emit(new_proposal(3)).await);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let feed = Arc::new(MockProposalFeed::new());
        let (subscription, _rx) = subscribe_collecting(feed.clone()).await;
        drop(subscription);

        tokio::time::timeout(Duration::from_secs(1), async {
            while feed.is_open() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_feed_close_reports_disconnect() {
        let feed = Arc::new(MockProposalFeed::new());
        let (subscription, mut rx) = subscribe_collecting(feed.clone()).await;

        feed.emit(new_proposal(4)).await;
        feed.close();

        assert_eq!(rx.recv().await, Some(new_proposal(4)));
        assert_eq!(
            rx.recv().await,
            Some(FeedEvent::Disconnected {
                reason: "feed closed".to_string()
            })
        );
        assert_eq!(rx.recv().await, None);
        assert!(!subscription.is_active());
    }

    #[tokio::test]
    async fn test_open_failure_is_returned() {
        let feed = Arc::new(MockProposalFeed::new());
        feed.fail_open(Some(SyncError::Rpc("refused".to_string())));
        let result = EventSubscriber::new(feed)
            .subscribe(None, |_| async {})
            .await;
        assert_eq!(result.unwrap_err(), SyncError::Rpc("refused".to_string()));
    }
}

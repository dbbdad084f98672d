use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::types::FeedEvent;

/// A live subscription to the message feed.
///
/// Yields [`FeedEvent`]s until the feed disconnects or the subscription is
/// released. Dropping it cancels the underlying connection; [`close`](Self::close)
/// also waits for the connection task to say goodbye.
pub struct Subscription {
    events: mpsc::Receiver<FeedEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(
        events: mpsc::Receiver<FeedEvent>,
        cancel: CancellationToken,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            events,
            cancel,
            task,
        }
    }

    pub async fn next_event(&mut self) -> Option<FeedEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.events.recv().await
    }

    pub fn is_released(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Realtime task ended abnormally: {}", e);
            }
        }
    }
}

impl Stream for Subscription {
    type Item = FeedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<FeedEvent>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.events.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn test_drop_releases_feed() {
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let sub = Subscription::new(rx, cancel.clone(), None);
        tx.send(FeedEvent::Disconnected("bye".into())).await.unwrap();
        assert!(!cancel.is_cancelled());
        drop(sub);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_stream_yields_until_released() {
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let mut sub = Subscription::new(rx, cancel.clone(), None);
        tx.send(FeedEvent::Disconnected("first".into())).await.unwrap();
        assert_eq!(sub.next().await, Some(FeedEvent::Disconnected("first".into())));

        cancel.cancel();
        tx.send(FeedEvent::Disconnected("late".into())).await.unwrap();
        assert!(sub.is_released());
        assert_eq!(sub.next().await, None);
    }
}

//! Live query subscriptions
//!
//! A `Subscription` is a lazy, infinite stream of snapshots. Dropping it,
//! or calling `unsubscribe`, tears down the listener.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::{BoxStream, Stream, StreamExt};

/// Stream of snapshots from a live query
pub struct Subscription<T> {
    stream: BoxStream<'static, T>,
}

impl<T: Send + 'static> Subscription<T> {
    pub fn new(stream: impl Stream<Item = T> + Send + 'static) -> Self {
        Self {
            stream: stream.boxed(),
        }
    }

    /// Wait for the next snapshot
    pub async fn next_snapshot(&mut self) -> Option<T> {
        self.stream.next().await
    }

    /// Transform every snapshot
    pub fn map<U, F>(self, f: F) -> Subscription<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        Subscription::new(self.stream.map(f))
    }

    /// Stop listening
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().stream.poll_next_unpin(cx)
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscription_map() {
        let sub = Subscription::new(futures_util::stream::iter(vec![1, 2, 3]));
        let mut doubled = sub.map(|n| n * 2);

        assert_eq!(doubled.next_snapshot().await, Some(2));
        assert_eq!(doubled.next().await, Some(4));
        assert_eq!(doubled.next_snapshot().await, Some(6));
        assert_eq!(doubled.next_snapshot().await, None);
    }
}

//! Meeting record store contract
//!
//! The call core uses a document store as its only signaling channel. Each
//! meeting is one document, addressed by [`MeetingId`], plus two append-only
//! candidate streams hanging off it.
//!
//! # Write discipline
//!
//! Both peers write to the same document, so every write is a field patch:
//! [`WriteMode::Merge`] and [`MeetingStore::update`] leave unspecified fields
//! untouched. [`MeetingStore::merge_if_absent`] is the compare-and-set used to
//! claim the `offer` field, which makes role assignment first-writer-wins
//! instead of depending on timing.
//!
//! # Notifications
//!
//! Subscriptions deliver at least once, in the order the store observed the
//! writes for that document or stream. Nothing is ordered across the record
//! and the candidate streams.

use crate::types::{CandidateStream, Document, MeetingId};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Record does not exist
    #[error("Meeting record not found: {0}")]
    NotFound(MeetingId),

    /// Backend unreachable or refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Document could not be encoded or decoded
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Store shut down
    #[error("Store closed")]
    Closed,
}

/// How [`MeetingStore::set`] treats fields missing from the write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Preserve fields not present in the write
    Merge,
    /// Replace the whole document
    Replace,
}

/// Meeting record store
///
/// Implement this for your document database. The crate ships
/// [`InMemoryMeetingStore`](crate::memory_store::InMemoryMeetingStore).
#[async_trait]
pub trait MeetingStore: Send + Sync + 'static {
    /// Read a record
    async fn get(&self, id: &MeetingId) -> Result<Option<Document>, StoreError>;

    /// Write a record, creating it if needed
    async fn set(&self, id: &MeetingId, fields: Document, mode: WriteMode)
        -> Result<(), StoreError>;

    /// Merge fields into an existing record
    ///
    /// Fails with [`StoreError::NotFound`] if the record does not exist.
    async fn update(&self, id: &MeetingId, fields: Document) -> Result<(), StoreError>;

    /// Atomically merge `fields` only if `guard_field` is absent
    ///
    /// Returns `true` when the write happened. Creates the record if needed.
    async fn merge_if_absent(
        &self,
        id: &MeetingId,
        guard_field: &str,
        fields: Document,
    ) -> Result<bool, StoreError>;

    /// Watch a record
    ///
    /// The current document (if any) is delivered first, then the full
    /// document after every write.
    async fn subscribe(&self, id: &MeetingId) -> Result<Subscription<Document>, StoreError>;

    /// Append an item to a candidate stream
    async fn append(
        &self,
        id: &MeetingId,
        stream: CandidateStream,
        item: Value,
    ) -> Result<(), StoreError>;

    /// Watch a candidate stream
    ///
    /// Existing items are replayed as added, in write order, before new ones.
    async fn subscribe_stream(
        &self,
        id: &MeetingId,
        stream: CandidateStream,
    ) -> Result<Subscription<Value>, StoreError>;
}

type ReleaseFn = Box<dyn FnOnce() + Send + Sync>;

/// A live change-notification subscription
///
/// Released exactly once, either by [`Subscription::unsubscribe`] or on drop.
/// Also usable as a [`futures::Stream`].
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    release: Option<ReleaseFn>,
}

impl<T> Subscription<T> {
    /// Wrap a receiver with the hook that detaches it from its source
    pub fn new(
        receiver: mpsc::UnboundedReceiver<T>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            receiver,
            release: Some(Box::new(release)),
        }
    }

    /// Wrap a receiver whose source needs no explicit detach
    pub fn detached(receiver: mpsc::UnboundedReceiver<T>) -> Self {
        Self {
            receiver,
            release: None,
        }
    }

    /// Next notification, or `None` once the source is gone
    pub async fn next(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Take an already delivered notification without waiting
    pub fn try_next(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Stop receiving and detach from the source
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        self.receiver.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl<T> futures::Stream for Subscription<T> {
    type Item = T;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<T>> {
        self.receiver.poll_recv(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("released", &self.release.is_none())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_subscription_delivers_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::detached(rx);
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        assert_eq!(sub.next().await, Some(1));
        assert_eq!(sub.try_next(), Some(2));
        assert_eq!(sub.try_next(), None);
        drop(tx);
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn test_subscription_as_stream() {
        use futures::StreamExt;

        let (tx, rx) = mpsc::unbounded_channel();
        let sub = Subscription::detached(rx);
        for n in 0..4 {
            tx.send(n).unwrap();
        }
        drop(tx);
        let evens: Vec<i32> = sub.filter(|n| futures::future::ready(n % 2 == 0)).collect().await;
        assert_eq!(evens, vec![0, 2]);
    }

    #[test]
    fn test_subscription_releases_once_on_unsubscribe() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let (_tx, rx) = mpsc::unbounded_channel::<u8>();
        let sub = Subscription::new(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_releases_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let (tx, rx) = mpsc::unbounded_channel::<u8>();
        {
            let _sub = Subscription::new(rx, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(tx.send(1).is_err());
    }

    #[test]
    fn test_store_error_display() {
        let id = MeetingId::parse("inv1_ent1").unwrap();
        assert_eq!(
            StoreError::NotFound(id).to_string(),
            "Meeting record not found: inv1_ent1"
        );
    }
}

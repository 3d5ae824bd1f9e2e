//! In-process meeting record store
//!
//! Holds documents and candidate streams in memory and fans out change
//! notifications over unbounded channels. Suitable for tests, local demos and
//! as the reference for the [`MeetingStore`] contract.

use crate::store::{MeetingStore, StoreError, Subscription, WriteMode};
use crate::types::{CandidateStream, Document, MeetingId};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

struct Watcher<T> {
    id: u64,
    sender: mpsc::UnboundedSender<T>,
}

#[derive(Default)]
struct RecordEntry {
    document: Option<Document>,
    watchers: Vec<Watcher<Document>>,
}

#[derive(Default)]
struct StreamEntry {
    items: Vec<Value>,
    watchers: Vec<Watcher<Value>>,
}

#[derive(Default)]
struct StoreInner {
    records: HashMap<MeetingId, RecordEntry>,
    streams: HashMap<(MeetingId, CandidateStream), StreamEntry>,
}

impl StoreInner {
    fn notify_record(&mut self, id: &MeetingId) {
        if let Some(entry) = self.records.get_mut(id) {
            if let Some(doc) = &entry.document {
                // Closed receivers are pruned on the next write
                entry
                    .watchers
                    .retain(|w| w.sender.send(doc.clone()).is_ok());
            }
        }
    }
}

/// In-memory [`MeetingStore`]
#[derive(Clone, Default)]
pub struct InMemoryMeetingStore {
    inner: Arc<Mutex<StoreInner>>,
    next_watcher: Arc<AtomicU64>,
    fail_writes: Arc<AtomicBool>,
    operations: Arc<AtomicU64>,
}

impl InMemoryMeetingStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a backend outage: every write fails with
    /// [`StoreError::Unavailable`] while enabled
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Store calls made through the [`MeetingStore`] trait so far
    #[must_use]
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::SeqCst)
    }

    /// Current document, if any
    #[must_use]
    pub fn document(&self, id: &MeetingId) -> Option<Document> {
        self.inner
            .lock()
            .records
            .get(id)
            .and_then(|entry| entry.document.clone())
    }

    /// Every item appended to a stream, in write order
    #[must_use]
    pub fn stream_items(&self, id: &MeetingId, stream: CandidateStream) -> Vec<Value> {
        self.inner
            .lock()
            .streams
            .get(&(id.clone(), stream))
            .map(|entry| entry.items.clone())
            .unwrap_or_default()
    }

    /// Live subscriptions on a record and both of its streams
    #[must_use]
    pub fn subscriber_count(&self, id: &MeetingId) -> usize {
        let inner = self.inner.lock();
        let record = inner
            .records
            .get(id)
            .map(|entry| entry.watchers.iter().filter(|w| !w.sender.is_closed()).count())
            .unwrap_or(0);
        let streams: usize = [
            CandidateStream::OfferCandidates,
            CandidateStream::AnswerCandidates,
        ]
        .iter()
        .filter_map(|stream| inner.streams.get(&(id.clone(), *stream)))
        .map(|entry| entry.watchers.iter().filter(|w| !w.sender.is_closed()).count())
        .sum();
        record + streams
    }

    fn record_operation(&self) {
        self.operations.fetch_add(1, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        self.record_operation();
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }

    fn watcher_id(&self) -> u64 {
        self.next_watcher.fetch_add(1, Ordering::Relaxed)
    }
}

fn merge_into(target: &mut Document, fields: Document) {
    for (key, value) in fields {
        target.insert(key, value);
    }
}

#[async_trait]
impl MeetingStore for InMemoryMeetingStore {
    async fn get(&self, id: &MeetingId) -> Result<Option<Document>, StoreError> {
        self.record_operation();
        Ok(self.document(id))
    }

    #[tracing::instrument(skip(self, fields), fields(meeting_id = %id, field_count = fields.len()))]
    async fn set(
        &self,
        id: &MeetingId,
        fields: Document,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut inner = self.inner.lock();
        let entry = inner.records.entry(id.clone()).or_default();
        match (mode, entry.document.take()) {
            (WriteMode::Merge, Some(mut existing)) => {
                merge_into(&mut existing, fields);
                entry.document = Some(existing);
            }
            _ => entry.document = Some(fields),
        }
        tracing::trace!(?mode, "Record written");
        inner.notify_record(id);
        Ok(())
    }

    #[tracing::instrument(skip(self, fields), fields(meeting_id = %id, field_count = fields.len()))]
    async fn update(&self, id: &MeetingId, fields: Document) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut inner = self.inner.lock();
        let existing = inner
            .records
            .get_mut(id)
            .and_then(|entry| entry.document.as_mut())
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        merge_into(existing, fields);
        inner.notify_record(id);
        Ok(())
    }

    #[tracing::instrument(skip(self, fields), fields(meeting_id = %id))]
    async fn merge_if_absent(
        &self,
        id: &MeetingId,
        guard_field: &str,
        fields: Document,
    ) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut inner = self.inner.lock();
        let entry = inner.records.entry(id.clone()).or_default();
        let document = entry.document.get_or_insert_with(Document::new);
        if document.contains_key(guard_field) {
            tracing::debug!(guard_field, "Guard field already present, write skipped");
            return Ok(false);
        }
        merge_into(document, fields);
        inner.notify_record(id);
        Ok(true)
    }

    async fn subscribe(&self, id: &MeetingId) -> Result<Subscription<Document>, StoreError> {
        self.record_operation();
        let (sender, receiver) = mpsc::unbounded_channel();
        let watcher_id = self.watcher_id();
        {
            let mut inner = self.inner.lock();
            let entry = inner.records.entry(id.clone()).or_default();
            if let Some(doc) = &entry.document {
                let _ = sender.send(doc.clone());
            }
            entry.watchers.push(Watcher {
                id: watcher_id,
                sender,
            });
        }

        let weak: Weak<Mutex<StoreInner>> = Arc::downgrade(&self.inner);
        let key = id.clone();
        Ok(Subscription::new(receiver, move || {
            if let Some(inner) = weak.upgrade() {
                if let Some(entry) = inner.lock().records.get_mut(&key) {
                    entry.watchers.retain(|w| w.id != watcher_id);
                }
            }
        }))
    }

    #[tracing::instrument(skip(self, item), fields(meeting_id = %id, stream = %stream))]
    async fn append(
        &self,
        id: &MeetingId,
        stream: CandidateStream,
        item: Value,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut inner = self.inner.lock();
        let entry = inner.streams.entry((id.clone(), stream)).or_default();
        entry.items.push(item.clone());
        entry.watchers.retain(|w| w.sender.send(item.clone()).is_ok());
        Ok(())
    }

    async fn subscribe_stream(
        &self,
        id: &MeetingId,
        stream: CandidateStream,
    ) -> Result<Subscription<Value>, StoreError> {
        self.record_operation();
        let (sender, receiver) = mpsc::unbounded_channel();
        let watcher_id = self.watcher_id();
        {
            let mut inner = self.inner.lock();
            let entry = inner.streams.entry((id.clone(), stream)).or_default();
            for item in &entry.items {
                let _ = sender.send(item.clone());
            }
            entry.watchers.push(Watcher {
                id: watcher_id,
                sender,
            });
        }

        let weak: Weak<Mutex<StoreInner>> = Arc::downgrade(&self.inner);
        let key = (id.clone(), stream);
        Ok(Subscription::new(receiver, move || {
            if let Some(inner) = weak.upgrade() {
                if let Some(entry) = inner.lock().streams.get_mut(&key) {
                    entry.watchers.retain(|w| w.id != watcher_id);
                }
            }
        }))
    }
}

//! Shared helpers for call session integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use pitchroom_core::testing::ScriptedTransportFactory;
use pitchroom_core::{
    CallSession, CandidateStream, Document, InMemoryMeetingStore, LocalMedia, MediaConstraints,
    MediaError, MediaSource, MeetingId, MeetingStore, RecordPatch, SessionConfig,
    SessionSnapshot, StoreError, Subscription, SyntheticMediaSource, WriteMode,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const MEETING: &str = "inv1_ent1";

pub fn meeting_id() -> MeetingId {
    MeetingId::parse(MEETING).unwrap()
}

/// Store holding an accepted meeting request
pub async fn accepted_store() -> Arc<InMemoryMeetingStore> {
    let store = Arc::new(InMemoryMeetingStore::new());
    store
        .set(
            &meeting_id(),
            RecordPatch::new()
                .status(pitchroom_core::MeetingStatus::Accepted)
                .into_document(),
            WriteMode::Replace,
        )
        .await
        .unwrap();
    store
}

pub fn session_on<S: MeetingStore>(
    store: &Arc<S>,
    factory: &Arc<ScriptedTransportFactory>,
) -> CallSession<S> {
    session_with(store, factory, SessionConfig::default(), SyntheticMediaSource::new())
}

pub fn session_with<S: MeetingStore>(
    store: &Arc<S>,
    factory: &Arc<ScriptedTransportFactory>,
    config: SessionConfig,
    media: impl MediaSource + 'static,
) -> CallSession<S> {
    CallSession::new(MEETING, config, store.clone(), factory.clone(), Arc::new(media))
}

/// Poll a session until `done` holds
pub async fn wait_for<S: MeetingStore>(
    session: &CallSession<S>,
    what: &str,
    done: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = session.snapshot();
        if done(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}: {snapshot:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll an arbitrary condition
pub async fn wait_until(what: &str, done: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Media prompt the user never answers
pub struct UnansweredMediaPrompt;

#[async_trait]
impl MediaSource for UnansweredMediaPrompt {
    async fn acquire(&self, _constraints: &MediaConstraints) -> Result<LocalMedia, MediaError> {
        std::future::pending().await
    }
}

/// In-memory store with fault knobs the plain store does not offer
#[derive(Default)]
pub struct ProbeStore {
    pub inner: InMemoryMeetingStore,
    pub lose_claims: AtomicBool,
    pub stall_writes: AtomicBool,
    pub stall_reads: AtomicBool,
    /// Deliver every candidate stream item twice
    pub redeliver_stream_items: AtomicBool,
}

impl ProbeStore {
    async fn stall_if_asked(&self) {
        if self.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl MeetingStore for ProbeStore {
    async fn get(&self, id: &MeetingId) -> Result<Option<Document>, StoreError> {
        if self.stall_reads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.get(id).await
    }

    async fn set(&self, id: &MeetingId, fields: Document, mode: WriteMode) -> Result<(), StoreError> {
        self.stall_if_asked().await;
        self.inner.set(id, fields, mode).await
    }

    async fn update(&self, id: &MeetingId, fields: Document) -> Result<(), StoreError> {
        self.stall_if_asked().await;
        self.inner.update(id, fields).await
    }

    async fn merge_if_absent(
        &self,
        id: &MeetingId,
        guard_field: &str,
        fields: Document,
    ) -> Result<bool, StoreError> {
        if self.lose_claims.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.merge_if_absent(id, guard_field, fields).await
    }

    async fn subscribe(&self, id: &MeetingId) -> Result<Subscription<Document>, StoreError> {
        self.inner.subscribe(id).await
    }

    async fn append(
        &self,
        id: &MeetingId,
        stream: CandidateStream,
        item: Value,
    ) -> Result<(), StoreError> {
        self.stall_if_asked().await;
        self.inner.append(id, stream, item).await
    }

    async fn subscribe_stream(
        &self,
        id: &MeetingId,
        stream: CandidateStream,
    ) -> Result<Subscription<Value>, StoreError> {
        let mut inner = self.inner.subscribe_stream(id, stream).await?;
        if !self.redeliver_stream_items.load(Ordering::SeqCst) {
            return Ok(inner);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let forward = tokio::spawn(async move {
            while let Some(item) = inner.next().await {
                if tx.send(item.clone()).is_err() || tx.send(item).is_err() {
                    break;
                }
            }
        });
        Ok(Subscription::new(rx, move || forward.abort()))
    }
}

//! Call session handshake tests over the in-memory store and scripted transport

mod common;

use common::{
    accepted_store, meeting_id, session_on, session_with, wait_for, wait_until, ProbeStore,
    UnansweredMediaPrompt,
};
use pitchroom_core::testing::{host_candidate, ScriptedTransportFactory, MALFORMED_CANDIDATE_MARKER};
use pitchroom_core::{
    CandidateStream, ConnectionStatus, IceConnectionState, InMemoryMeetingStore, MediaError,
    MeetingStatus, PeerConnectionState, RecordPatch, Role, SessionConfig, SessionDescription,
    SessionError, SessionEvent, SessionPhase, SyntheticMediaSource, TransportEvent, WriteMode,
    FIELD_ACTIVE, FIELD_ANSWER, FIELD_OFFER,
};
use pitchroom_core::{MediaKind, MeetingStore};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn keys(doc: &pitchroom_core::Document) -> BTreeSet<String> {
    doc.keys().cloned().collect()
}

async fn write_answer<S: MeetingStore>(store: &S) {
    store
        .update(
            &meeting_id(),
            RecordPatch::new()
                .answer(&SessionDescription::answer("v=0\r\ns=remote answer\r\n"))
                .active(true)
                .into_document(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn first_peer_on_fresh_record_becomes_offerer() {
    let store = Arc::new(InMemoryMeetingStore::new());
    let factory = Arc::new(ScriptedTransportFactory::new());
    let session = session_on(&store, &factory);
    let mut events = session.subscribe_events();

    let role = session.start().await.unwrap();
    assert_eq!(role, Role::Offerer);

    let doc = store.document(&meeting_id()).unwrap();
    assert_eq!(
        keys(&doc),
        BTreeSet::from([FIELD_OFFER.to_string(), FIELD_ACTIVE.to_string()])
    );
    assert_eq!(doc[FIELD_OFFER]["type"], "offer");
    assert_eq!(doc[FIELD_ACTIVE], true);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.phase, SessionPhase::SignalingInFlight);
    assert_eq!(snapshot.status, ConnectionStatus::Connecting);
    assert!(snapshot.local_description_set);
    assert!(!snapshot.remote_description_set);
    assert_eq!(
        events.try_recv().unwrap(),
        SessionEvent::RoleDetermined {
            meeting_id: meeting_id(),
            role: Role::Offerer
        }
    );

    let transport = factory.last().unwrap();
    assert_eq!(transport.track_ids().len(), 2);
    assert!(transport.remote_description().is_none());
    session.end_call().await;
}

#[tokio::test]
async fn second_peer_answers_without_touching_offer() {
    let store = accepted_store().await;
    let factory = Arc::new(ScriptedTransportFactory::new());
    let offerer = session_on(&store, &factory);
    offerer.start().await.unwrap();
    let offer = store.document(&meeting_id()).unwrap()[FIELD_OFFER].clone();

    let answerer = session_on(&store, &factory);
    assert_eq!(answerer.start().await.unwrap(), Role::Answerer);

    let doc = store.document(&meeting_id()).unwrap();
    assert_eq!(doc[FIELD_OFFER], offer);
    assert_eq!(doc[FIELD_ANSWER]["type"], "answer");
    assert_eq!(doc[FIELD_ACTIVE], true);
    assert_eq!(doc["status"], "accepted");

    let answer_transport = factory.last().unwrap();
    assert_eq!(
        answer_transport.remote_description().map(|d| d.sdp),
        offer["sdp"].as_str().map(str::to_string)
    );

    let snapshot = answerer.snapshot();
    assert_eq!(snapshot.role, Some(Role::Answerer));
    assert!(snapshot.local_description_set && snapshot.remote_description_set);

    answerer.end_call().await;
    offerer.end_call().await;
}

#[tokio::test]
async fn early_candidates_are_queued_until_answer() {
    let store = accepted_store().await;
    let factory = Arc::new(ScriptedTransportFactory::new());
    let session = session_on(&store, &factory);
    session.start().await.unwrap();

    let early: Vec<_> = (0..3).map(|n| host_candidate("ans", n)).collect();
    for candidate in &early {
        store
            .append(&meeting_id(), CandidateStream::AnswerCandidates, candidate.to_value())
            .await
            .unwrap();
    }
    wait_for(&session, "three queued candidates", |s| s.candidates_pending == 3).await;
    let transport = factory.last().unwrap();
    assert!(transport.applied_candidates().is_empty());

    write_answer(store.as_ref()).await;
    let snapshot = wait_for(&session, "drain", |s| s.candidates_applied == 3).await;
    assert_eq!(transport.applied_candidates(), early);
    assert_eq!(snapshot.candidates_queued, 3);
    assert_eq!(snapshot.candidates_pending, 0);
    assert_eq!(snapshot.candidates_discarded, 0);
    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    assert_eq!(snapshot.phase, SessionPhase::Connected);

    let late = host_candidate("ans", 3);
    store
        .append(&meeting_id(), CandidateStream::AnswerCandidates, late.to_value())
        .await
        .unwrap();
    wait_for(&session, "late candidate", |s| s.candidates_applied == 4).await;
    assert_eq!(session.snapshot().candidates_queued, 3);
    session.end_call().await;
}

#[tokio::test]
async fn answerer_applies_offer_candidates_in_order() {
    let store = accepted_store().await;
    let factory = Arc::new(ScriptedTransportFactory::new().with_gathered_candidates(3));
    let offerer = session_on(&store, &factory);
    offerer.start().await.unwrap();
    wait_for(&offerer, "offer candidates published", |s| s.candidates_sent == 3).await;

    let answerer = session_on(&store, &factory);
    answerer.start().await.unwrap();
    wait_for(&answerer, "offer candidates applied", |s| s.candidates_applied == 3).await;

    let published: Vec<Value> = store.stream_items(&meeting_id(), CandidateStream::OfferCandidates);
    let applied: Vec<Value> = factory.transports()[1]
        .applied_candidates()
        .iter()
        .map(|c| c.to_value())
        .collect();
    assert_eq!(applied, published);
    assert_eq!(answerer.snapshot().candidates_queued, 0);

    answerer.end_call().await;
    offerer.end_call().await;
}

#[tokio::test]
async fn media_denial_fails_without_store_io() {
    let store = Arc::new(InMemoryMeetingStore::new());
    let factory = Arc::new(ScriptedTransportFactory::new());
    let session = session_with(
        &store,
        &factory,
        SessionConfig::default(),
        SyntheticMediaSource::denying(),
    );
    let mut events = session.subscribe_events();

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, SessionError::Media(MediaError::PermissionDenied(_))));

    let snapshot = session.snapshot();
    assert_eq!(snapshot.phase, SessionPhase::Failed);
    assert_eq!(snapshot.status, ConnectionStatus::Failed);
    assert!(snapshot
        .diagnostic
        .unwrap()
        .starts_with("Camera/Mic access denied"));
    assert_eq!(store.operation_count(), 0);
    assert!(factory.transports().is_empty());

    assert_eq!(
        events.try_recv().unwrap(),
        SessionEvent::StatusChanged {
            from: ConnectionStatus::Connecting,
            to: ConnectionStatus::Failed
        }
    );
    assert!(matches!(events.try_recv().unwrap(), SessionEvent::Failed { .. }));
}

#[tokio::test]
async fn end_call_while_connecting_releases_everything_once() {
    let store = accepted_store().await;
    let factory = Arc::new(ScriptedTransportFactory::new());
    let session = session_on(&store, &factory);
    let mut events = session.subscribe_events();
    session.start().await.unwrap();
    assert_eq!(session.status_line(), "Connecting...");
    assert_eq!(store.subscriber_count(&meeting_id()), 2);

    session.end_call().await;

    assert!(session.local_tracks().iter().all(|t| !t.is_live()));
    let transport = factory.last().unwrap();
    assert!(transport.is_closed());
    assert_eq!(store.subscriber_count(&meeting_id()), 0);
    let doc = store.document(&meeting_id()).unwrap();
    assert_eq!(doc[FIELD_ACTIVE], false);
    assert!(doc.contains_key(FIELD_OFFER));
    assert_eq!(session.snapshot().phase, SessionPhase::Terminated);
    assert_eq!(session.status_line(), "Call ended");

    session.end_call().await;
    assert_eq!(transport.close_calls(), 1);

    let mut ended = 0;
    while let Ok(event) = events.try_recv() {
        if event == SessionEvent::Ended {
            ended += 1;
        }
    }
    assert_eq!(ended, 1);
}

#[tokio::test]
async fn connected_signal_before_answer_is_ignored() {
    let store = accepted_store().await;
    let factory = Arc::new(ScriptedTransportFactory::new());
    let session = session_on(&store, &factory);
    session.start().await.unwrap();
    let transport = factory.last().unwrap();

    transport.emit(TransportEvent::IceConnectionStateChanged(IceConnectionState::Connected));
    transport.emit(TransportEvent::TrackReceived {
        track_id: "remote-audio".to_string(),
        kind: MediaKind::Audio,
    });
    let snapshot = wait_for(&session, "remote track", |s| !s.remote_tracks.is_empty()).await;
    assert_eq!(snapshot.status, ConnectionStatus::Connecting);
    assert_eq!(snapshot.phase, SessionPhase::SignalingInFlight);

    write_answer(store.as_ref()).await;
    let snapshot = wait_for(&session, "connected", |s| s.status == ConnectionStatus::Connected).await;
    assert!(snapshot.local_description_set && snapshot.remote_description_set);
    session.end_call().await;
}

#[tokio::test]
async fn transport_failure_shows_disconnected_without_retry() {
    let store = accepted_store().await;
    let factory = Arc::new(ScriptedTransportFactory::new());
    let session = session_on(&store, &factory);
    session.start().await.unwrap();
    write_answer(store.as_ref()).await;
    wait_for(&session, "connected", |s| s.phase == SessionPhase::Connected).await;

    let transport = factory.last().unwrap();
    transport.emit(TransportEvent::ConnectionStateChanged(PeerConnectionState::Failed));
    let snapshot = wait_for(&session, "disconnected", |s| {
        s.status == ConnectionStatus::Disconnected
    })
    .await;
    assert_eq!(snapshot.phase, SessionPhase::Connected);
    assert_eq!(session.status_line(), "Disconnected");
    assert_eq!(factory.transports().len(), 1);
    session.end_call().await;
}

#[tokio::test]
async fn bad_candidates_are_discarded_without_breaking_session() {
    let store = accepted_store().await;
    let factory = Arc::new(ScriptedTransportFactory::new());
    let session = session_on(&store, &factory);
    session.start().await.unwrap();
    write_answer(store.as_ref()).await;
    wait_for(&session, "answer applied", |s| s.remote_description_set).await;

    let stream = CandidateStream::AnswerCandidates;
    let id = meeting_id();
    store.append(&id, stream, json!("not a candidate")).await.unwrap();
    store
        .append(&id, stream, json!({ "candidate": format!("candidate:{MALFORMED_CANDIDATE_MARKER}") }))
        .await
        .unwrap();
    store.append(&id, stream, json!({ "candidate": "" })).await.unwrap();
    store
        .append(&id, stream, host_candidate("ans", 7).to_value())
        .await
        .unwrap();

    let snapshot = wait_for(&session, "good candidate", |s| s.candidates_applied == 1).await;
    assert_eq!(snapshot.candidates_discarded, 2);
    assert_eq!(snapshot.phase, SessionPhase::Connected);
    session.end_call().await;
}

#[tokio::test]
async fn unaccepted_meeting_is_refused() {
    let store = Arc::new(InMemoryMeetingStore::new());
    store
        .set(
            &meeting_id(),
            RecordPatch::new().status(MeetingStatus::Pending).into_document(),
            WriteMode::Replace,
        )
        .await
        .unwrap();
    let factory = Arc::new(ScriptedTransportFactory::new());
    let session = session_on(&store, &factory);

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, SessionError::MeetingNotAccepted(MeetingStatus::Pending)));
    assert!(factory.transports().is_empty());
    assert!(session.local_tracks().iter().all(|t| !t.is_live()));
    assert!(!store.document(&meeting_id()).unwrap().contains_key(FIELD_OFFER));

    let relaxed = SessionConfig {
        require_accepted: false,
        ..SessionConfig::default()
    };
    let session = session_with(&store, &factory, relaxed, SyntheticMediaSource::new());
    assert_eq!(session.start().await.unwrap(), Role::Offerer);
    session.end_call().await;
}

#[tokio::test]
async fn malformed_offer_fails_setup() {
    let store = Arc::new(InMemoryMeetingStore::new());
    store
        .set(
            &meeting_id(),
            RecordPatch::new()
                .field(FIELD_OFFER, json!({ "type": "bogus", "sdp": "v=0" }))
                .into_document(),
            WriteMode::Replace,
        )
        .await
        .unwrap();
    let factory = Arc::new(ScriptedTransportFactory::new());
    let session = session_on(&store, &factory);
    assert!(matches!(
        session.start().await,
        Err(SessionError::MalformedRecord(_))
    ));
    assert_eq!(session.snapshot().phase, SessionPhase::Failed);
}

#[tokio::test]
async fn lost_claim_without_offer_is_missing_offer() {
    let store = Arc::new(ProbeStore::default());
    store.lose_claims.store(true, Ordering::SeqCst);
    let factory = Arc::new(ScriptedTransportFactory::new());
    let session = session_on(&store, &factory);

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, SessionError::MissingOffer));
    assert_eq!(session.snapshot().phase, SessionPhase::Failed);
    assert!(factory.last().unwrap().is_closed());

    session.end_call().await;
    assert_eq!(session.snapshot().phase, SessionPhase::Terminated);
}

#[tokio::test]
async fn simultaneous_first_entry_yields_one_offerer() {
    let store = accepted_store().await;
    let factory = Arc::new(ScriptedTransportFactory::new());
    let a = session_on(&store, &factory);
    let b = session_on(&store, &factory);

    let (ra, rb) = tokio::join!(a.start(), b.start());
    let roles = BTreeSet::from([ra.unwrap().to_string(), rb.unwrap().to_string()]);
    assert_eq!(
        roles,
        BTreeSet::from(["answerer".to_string(), "offerer".to_string()])
    );

    let doc = store.document(&meeting_id()).unwrap();
    assert!(doc.contains_key(FIELD_OFFER));
    assert!(doc.contains_key(FIELD_ANSWER));
    a.end_call().await;
    b.end_call().await;
}

#[tokio::test]
async fn two_peers_connect_end_to_end() {
    let store = accepted_store().await;
    let factory = Arc::new(
        ScriptedTransportFactory::new()
            .with_gathered_candidates(2)
            .with_auto_connect(),
    );
    let investor = session_on(&store, &factory);
    let entrepreneur = session_on(&store, &factory);

    assert_eq!(investor.start().await.unwrap(), Role::Offerer);
    assert_eq!(entrepreneur.start().await.unwrap(), Role::Answerer);

    for session in [&investor, &entrepreneur] {
        let snapshot = wait_for(session, "connected with candidates", |s| {
            s.phase == SessionPhase::Connected && s.candidates_applied == 2 && s.candidates_sent == 2
        })
        .await;
        assert_eq!(snapshot.status, ConnectionStatus::Connected);
        assert_eq!(snapshot.candidates_discarded, 0);
    }

    investor.end_call().await;
    entrepreneur.end_call().await;
    let doc = store.document(&meeting_id()).unwrap();
    assert_eq!(doc[FIELD_ACTIVE], false);
    assert!(doc.contains_key(FIELD_OFFER) && doc.contains_key(FIELD_ANSWER));
    assert_eq!(store.subscriber_count(&meeting_id()), 0);
}

#[tokio::test]
async fn dropping_session_tears_down_in_background() {
    let store = accepted_store().await;
    let factory = Arc::new(ScriptedTransportFactory::new());
    let session = session_on(&store, &factory);
    session.start().await.unwrap();
    let tracks = session.local_tracks();
    drop(session);

    let transport = factory.last().unwrap();
    let watched = store.clone();
    wait_until("background teardown", || {
        transport.is_closed()
            && watched
                .document(&meeting_id())
                .is_some_and(|doc| doc[FIELD_ACTIVE] == false)
    })
    .await;
    assert!(tracks.iter().all(|t| !t.is_live()));
    assert_eq!(store.subscriber_count(&meeting_id()), 0);
}

#[tokio::test]
async fn store_outage_is_swallowed() {
    let store = accepted_store().await;
    let factory = Arc::new(ScriptedTransportFactory::new());
    let session = session_on(&store, &factory);
    session.start().await.unwrap();

    store.set_fail_writes(true);
    let transport = factory.last().unwrap();
    transport.emit(TransportEvent::CandidateGenerated(Some(host_candidate("off", 0))));
    transport.emit(TransportEvent::CandidateGenerated(None));
    transport.emit(TransportEvent::TrackReceived {
        track_id: "marker".to_string(),
        kind: MediaKind::Video,
    });
    let snapshot = wait_for(&session, "events processed", |s| !s.remote_tracks.is_empty()).await;
    assert_eq!(snapshot.candidates_sent, 0);

    session.end_call().await;
    assert_eq!(session.snapshot().phase, SessionPhase::Terminated);
    assert_eq!(store.document(&meeting_id()).unwrap()[FIELD_ACTIVE], true);
}

#[tokio::test]
async fn stalled_teardown_write_is_bounded() {
    let store = Arc::new(ProbeStore::default());
    let factory = Arc::new(ScriptedTransportFactory::new());
    let config = SessionConfig {
        teardown_write_timeout_ms: 50,
        ..SessionConfig::default()
    };
    let session = session_with(&store, &factory, config, SyntheticMediaSource::new());
    session.start().await.unwrap();

    store.stall_writes.store(true, Ordering::SeqCst);
    tokio::time::timeout(Duration::from_secs(2), session.end_call())
        .await
        .unwrap();
    assert_eq!(session.snapshot().phase, SessionPhase::Terminated);
    assert!(factory.last().unwrap().is_closed());
}

#[tokio::test]
async fn end_call_cancels_unanswered_media_prompt() {
    let store = Arc::new(InMemoryMeetingStore::new());
    let factory = Arc::new(ScriptedTransportFactory::new());
    let session = Arc::new(session_with(
        &store,
        &factory,
        SessionConfig::default(),
        UnansweredMediaPrompt,
    ));
    let starting = tokio::spawn({
        let session = session.clone();
        async move { session.start().await }
    });
    wait_for(&session, "id validated", |s| s.meeting_id.is_some()).await;

    tokio::time::timeout(Duration::from_secs(2), session.end_call())
        .await
        .unwrap();
    assert_eq!(session.snapshot().phase, SessionPhase::Terminated);
    assert!(matches!(
        starting.await.unwrap(),
        Err(SessionError::Cancelled)
    ));
    assert_eq!(store.operation_count(), 0);
    assert!(factory.transports().is_empty());

    session.end_call().await;
    assert_eq!(session.status_line(), "Call ended");
}

#[tokio::test]
async fn end_call_cancels_stalled_record_read() {
    let store = Arc::new(ProbeStore::default());
    store.stall_reads.store(true, Ordering::SeqCst);
    let factory = Arc::new(ScriptedTransportFactory::new());
    let session = Arc::new(session_on(&store, &factory));
    let starting = tokio::spawn({
        let session = session.clone();
        async move { session.start().await }
    });
    wait_until("media acquired", || !session.local_tracks().is_empty()).await;

    tokio::time::timeout(Duration::from_secs(2), session.end_call())
        .await
        .unwrap();
    assert!(matches!(
        starting.await.unwrap(),
        Err(SessionError::Cancelled)
    ));
    let snapshot = session.snapshot();
    assert_eq!(snapshot.phase, SessionPhase::Terminated);
    assert!(snapshot.diagnostic.is_none());
    assert!(session.local_tracks().iter().all(|t| !t.is_live()));
    assert!(factory.transports().is_empty());
    assert!(store.inner.document(&meeting_id()).is_none());
}

#[tokio::test]
async fn redelivered_candidates_are_applied_once() {
    let store = Arc::new(ProbeStore::default());
    store.redeliver_stream_items.store(true, Ordering::SeqCst);
    let factory = Arc::new(ScriptedTransportFactory::new());
    let session = session_on(&store, &factory);
    assert_eq!(session.start().await.unwrap(), Role::Offerer);

    let id = meeting_id();
    let stream = CandidateStream::AnswerCandidates;
    let sent: Vec<_> = (0..5).map(|n| host_candidate("ans", n)).collect();
    for candidate in &sent[..2] {
        store.append(&id, stream, candidate.to_value()).await.unwrap();
    }
    wait_for(&session, "early candidates queued", |s| s.candidates_pending == 2).await;

    write_answer(store.as_ref()).await;
    wait_for(&session, "answer applied", |s| s.remote_description_set).await;
    for candidate in &sent[2..] {
        store.append(&id, stream, candidate.to_value()).await.unwrap();
    }

    let snapshot = wait_for(&session, "last candidate", |s| s.candidates_applied >= 5).await;
    let transport = factory.last().unwrap();
    assert_eq!(transport.applied_candidates(), sent);
    assert_eq!(snapshot.candidates_applied, 5);
    assert_eq!(snapshot.candidates_queued, 2);
    assert_eq!(snapshot.candidates_discarded, 0);
    session.end_call().await;
}

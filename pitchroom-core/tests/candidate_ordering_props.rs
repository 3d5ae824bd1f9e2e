//! Property tests for remote candidate ordering around the answer write

mod common;

use common::{accepted_store, meeting_id, session_on, wait_for};
use pitchroom_core::testing::{host_candidate, ScriptedTransportFactory};
use pitchroom_core::{
    CandidateStream, MeetingStore, RecordPatch, SessionDescription, SessionPhase,
};
use proptest::prelude::*;
use std::sync::Arc;

/// Offerer view: `total` answer candidates arrive, the answer lands after
/// `answer_at` of them
async fn deliver(total: usize, answer_at: usize) -> (Vec<String>, u64, u64) {
    let store = accepted_store().await;
    let factory = Arc::new(ScriptedTransportFactory::new());
    let session = session_on(&store, &factory);
    session.start().await.unwrap();

    let id = meeting_id();
    for n in 0..total {
        if n == answer_at {
            write_answer(&store).await;
        }
        store
            .append(&id, CandidateStream::AnswerCandidates, host_candidate("ans", n).to_value())
            .await
            .unwrap();
        tokio::task::yield_now().await;
    }
    if answer_at >= total {
        write_answer(&store).await;
    }

    let snapshot = wait_for(&session, "all candidates applied", |s| {
        s.candidates_applied + s.candidates_discarded == total as u64
    })
    .await;
    assert_eq!(snapshot.phase, SessionPhase::Connected);
    let applied = factory
        .last()
        .unwrap()
        .applied_candidates()
        .into_iter()
        .map(|c| c.candidate)
        .collect();
    session.end_call().await;
    (applied, snapshot.candidates_discarded, snapshot.candidates_queued)
}

async fn write_answer<S: MeetingStore>(store: &Arc<S>) {
    store
        .update(
            &meeting_id(),
            RecordPatch::new()
                .answer(&SessionDescription::answer("v=0\r\ns=answer\r\n"))
                .into_document(),
        )
        .await
        .unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn candidates_apply_once_in_arrival_order(total in 0usize..12, answer_at in 0usize..14) {
        let (applied, discarded, queued) =
            tokio_test::block_on(deliver(total, answer_at));

        let expected: Vec<String> = (0..total)
            .map(|n| host_candidate("ans", n).candidate)
            .collect();
        prop_assert_eq!(applied, expected);
        prop_assert_eq!(discarded, 0);
        prop_assert!(queued <= answer_at.min(total) as u64);
    }
}

//! Meeting request workflow
//!
//! An investor asks for a meeting, the entrepreneur accepts or rejects it.
//! Only an accepted meeting lets a [`CallSession`](crate::session::CallSession)
//! proceed, so this workflow is what keeps exactly one caller and one callee
//! on a meeting record.

use crate::identity::{Participant, ParticipantId, ParticipantRole, PeerIdentity};
use crate::store::{MeetingStore, StoreError, WriteMode};
use crate::types::{MeetingId, MeetingRecord, MeetingStatus, RecordPatch};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Meeting workflow errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeetingError {
    /// A pending or accepted request already exists
    #[error("A {status} meeting already exists for {meeting_id}")]
    AlreadyRequested {
        /// Existing meeting
        meeting_id: MeetingId,
        /// Its status
        status: MeetingStatus,
    },

    /// Participant has the wrong role for the action
    #[error("{participant} is not allowed to {action}")]
    NotPermitted {
        /// Acting participant
        participant: String,
        /// Attempted action
        action: &'static str,
    },

    /// Nothing to respond to
    #[error("No meeting request found for {0}")]
    NotFound(MeetingId),

    /// Stored record could not be read
    #[error("Malformed meeting record: {0}")]
    Malformed(String),

    /// Store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Decision on a meeting request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Let the call happen
    Accept,
    /// Decline; the investor may ask again
    Reject,
}

/// Schedules and answers meeting requests over a [`MeetingStore`]
pub struct MeetingScheduler<S: MeetingStore> {
    store: Arc<S>,
}

impl<S: MeetingStore> MeetingScheduler<S> {
    /// Create a scheduler
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Read a meeting record
    ///
    /// # Errors
    ///
    /// Returns error if the store fails or the record cannot be parsed.
    pub async fn meeting(&self, id: &MeetingId) -> Result<Option<MeetingRecord>, MeetingError> {
        match self.store.get(id).await? {
            Some(doc) => MeetingRecord::from_document(&doc)
                .map(Some)
                .map_err(MeetingError::Malformed),
            None => Ok(None),
        }
    }

    /// Ask for a meeting
    ///
    /// A rejected request is replaced wholesale, which also clears signaling
    /// fields left over from an earlier call.
    ///
    /// # Errors
    ///
    /// Returns error if the roles are wrong, a pending or accepted request
    /// already exists, or the store fails.
    #[tracing::instrument(skip(self, investor, entrepreneur), fields(investor = %investor.id, entrepreneur = %entrepreneur.id))]
    pub async fn schedule(
        &self,
        investor: &Participant<ParticipantId>,
        entrepreneur: &Participant<ParticipantId>,
        date: DateTime<Utc>,
    ) -> Result<MeetingId, MeetingError> {
        require_role(investor, ParticipantRole::Investor, "schedule meetings")?;
        require_role(entrepreneur, ParticipantRole::Entrepreneur, "receive meeting requests")?;

        let meeting_id = MeetingId::for_participants(&investor.id, &entrepreneur.id);
        if let Some(existing) = self.meeting(&meeting_id).await? {
            if let Some(status @ (MeetingStatus::Pending | MeetingStatus::Accepted)) =
                existing.status
            {
                tracing::info!(meeting_id = %meeting_id, status = %status, "Meeting already requested");
                return Err(MeetingError::AlreadyRequested { meeting_id, status });
            }
        }

        let record = MeetingRecord {
            status: Some(MeetingStatus::Pending),
            entrepreneur_id: Some(entrepreneur.id.to_string_repr()),
            investor_id: Some(investor.id.to_string_repr()),
            investor_name: Some(investor.display_name.clone()),
            date: Some(date),
            created_at: Some(Utc::now()),
            meeting_link: Some(meeting_id.call_link()),
            ..Default::default()
        };
        let doc = match serde_json::to_value(&record) {
            Ok(Value::Object(doc)) => doc,
            Ok(_) => return Err(MeetingError::Malformed("record is not an object".to_string())),
            Err(e) => return Err(MeetingError::Malformed(e.to_string())),
        };
        self.store.set(&meeting_id, doc, WriteMode::Replace).await?;
        tracing::info!(meeting_id = %meeting_id, "Meeting requested");
        Ok(meeting_id)
    }

    /// Accept or reject a request addressed to `entrepreneur`
    ///
    /// Accepting keeps an existing meeting link and otherwise creates the
    /// deterministic one. Both decisions merge into the record.
    ///
    /// # Errors
    ///
    /// Returns error if `entrepreneur` is not an entrepreneur, there is no
    /// request from `investor_id`, or the store fails.
    #[tracing::instrument(skip(self, entrepreneur), fields(entrepreneur = %entrepreneur.id))]
    pub async fn respond(
        &self,
        entrepreneur: &Participant<ParticipantId>,
        investor_id: &ParticipantId,
        decision: Decision,
    ) -> Result<MeetingRecord, MeetingError> {
        require_role(entrepreneur, ParticipantRole::Entrepreneur, "respond to meeting requests")?;

        let meeting_id = MeetingId::for_participants(investor_id, &entrepreneur.id);
        let existing = self
            .meeting(&meeting_id)
            .await?
            .ok_or_else(|| MeetingError::NotFound(meeting_id.clone()))?;

        let patch = match decision {
            Decision::Accept => {
                let link = existing
                    .meeting_link
                    .unwrap_or_else(|| meeting_id.call_link());
                RecordPatch::new()
                    .status(MeetingStatus::Accepted)
                    .field("meetingLink", link)
            }
            Decision::Reject => RecordPatch::new().status(MeetingStatus::Rejected),
        };
        self.store
            .set(&meeting_id, patch.into_document(), WriteMode::Merge)
            .await?;
        tracing::info!(meeting_id = %meeting_id, decision = ?decision, "Meeting request answered");

        self.meeting(&meeting_id)
            .await?
            .ok_or(MeetingError::NotFound(meeting_id))
    }
}

fn require_role(
    participant: &Participant<ParticipantId>,
    role: ParticipantRole,
    action: &'static str,
) -> Result<(), MeetingError> {
    if participant.role != role {
        return Err(MeetingError::NotPermitted {
            participant: participant.id.to_string_repr(),
            action,
        });
    }
    Ok(())
}

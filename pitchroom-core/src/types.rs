//! Meeting and signaling types and data structures

use crate::identity::PeerIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use thiserror::Error;

/// Maximum meeting id length (it is used as a document key)
pub const MAX_MEETING_ID_LENGTH: usize = 256;

/// Maximum SDP string length (reasonable for WebRTC)
pub const MAX_SDP_LENGTH: usize = 32 * 1024;

/// Maximum ICE candidate string length
pub const MAX_CANDIDATE_LENGTH: usize = 4 * 1024;

/// Shared record field holding the offer
pub const FIELD_OFFER: &str = "offer";
/// Shared record field holding the answer
pub const FIELD_ANSWER: &str = "answer";
/// Shared record liveness flag
pub const FIELD_ACTIVE: &str = "active";
/// Shared record acceptance status
pub const FIELD_STATUS: &str = "status";

/// A JSON document as held by the meeting record store
pub type Document = Map<String, Value>;

/// Meeting identifier validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeetingIdError {
    /// Identifier absent or blank
    #[error("Missing meeting identifier")]
    Missing,

    /// Identifier present but unusable
    #[error("Invalid meeting identifier: {0}")]
    Invalid(String),
}

/// Identifier of a meeting record, shared by both peers
///
/// Derived as `<investorId>_<entrepreneurId>` so both sides address the same
/// record without coordinating.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeetingId(String);

impl MeetingId {
    /// Validate a raw identifier, typically taken from a page route
    ///
    /// # Errors
    ///
    /// Returns [`MeetingIdError::Missing`] for blank input and
    /// [`MeetingIdError::Invalid`] for over-long ids or ids containing `/`.
    pub fn parse(raw: &str) -> Result<Self, MeetingIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(MeetingIdError::Missing);
        }
        if trimmed.len() > MAX_MEETING_ID_LENGTH {
            return Err(MeetingIdError::Invalid(format!(
                "length {} exceeds maximum of {}",
                trimmed.len(),
                MAX_MEETING_ID_LENGTH
            )));
        }
        if trimmed.contains('/') {
            return Err(MeetingIdError::Invalid(format!(
                "'{trimmed}' must not contain '/'"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Deterministic id for an investor/entrepreneur pair
    pub fn for_participants<I: PeerIdentity>(investor: &I, entrepreneur: &I) -> Self {
        Self(format!(
            "{}_{}",
            investor.to_string_repr(),
            entrepreneur.to_string_repr()
        ))
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Route of the call screen for this meeting
    pub fn call_link(&self) -> String {
        format!("/videocall/{}", self.0)
    }
}

impl fmt::Display for MeetingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Acceptance status of a meeting request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingStatus {
    /// Awaiting the entrepreneur's decision
    Pending,
    /// Call may proceed
    Accepted,
    /// Declined; the investor may reschedule
    Rejected,
}

impl fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Offer
    Offer,
    /// Provisional answer
    Pranswer,
    /// Answer
    Answer,
    /// Rollback
    Rollback,
}

/// Session description in the browser's `RTCSessionDescriptionInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description type
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// SDP payload
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Check that the payload is usable
    ///
    /// # Errors
    ///
    /// Returns a description of the problem for empty or oversized SDP.
    pub fn validate(&self) -> Result<(), String> {
        if self.sdp.trim().is_empty() {
            return Err("SDP cannot be empty".to_string());
        }
        if self.sdp.len() > MAX_SDP_LENGTH {
            return Err(format!(
                "SDP length {} exceeds maximum of {}",
                self.sdp.len(),
                MAX_SDP_LENGTH
            ));
        }
        Ok(())
    }

    fn to_value(&self) -> Value {
        json!({ "type": self.kind, "sdp": self.sdp })
    }
}

/// ICE candidate in the browser's `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidatePayload {
    /// Candidate attribute line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Media line index
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    /// ICE username fragment
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidatePayload {
    /// Create a candidate with just the attribute line
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    /// An empty candidate line marks the end of gathering
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.trim().is_empty()
    }

    /// Parse a candidate document from a stream item
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when the item is not a candidate
    /// object or the candidate line is oversized.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let candidate: Self =
            serde_json::from_value(value).map_err(|e| format!("malformed candidate: {e}"))?;
        if candidate.candidate.len() > MAX_CANDIDATE_LENGTH {
            return Err(format!(
                "Candidate length {} exceeds maximum of {}",
                candidate.candidate.len(),
                MAX_CANDIDATE_LENGTH
            ));
        }
        Ok(candidate)
    }

    /// Serialize for appending to a candidate stream
    pub fn to_value(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("candidate".into(), Value::String(self.candidate.clone()));
        if let Some(mid) = &self.sdp_mid {
            doc.insert("sdpMid".into(), Value::String(mid.clone()));
        }
        if let Some(index) = self.sdp_mline_index {
            doc.insert("sdpMLineIndex".into(), Value::from(index));
        }
        if let Some(ufrag) = &self.username_fragment {
            doc.insert("usernameFragment".into(), Value::String(ufrag.clone()));
        }
        Value::Object(doc)
    }
}

/// Typed view of the shared meeting document
///
/// Fields not listed here are ignored on read. They survive in the store
/// because every write is a field patch, never a full overwrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingRecord {
    /// Acceptance status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MeetingStatus>,
    /// Offer written by the offering peer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    /// Answer written by the answering peer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    /// Latest-writer-wins liveness flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    /// Entrepreneur taking the meeting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrepreneur_id: Option<String>,
    /// Investor requesting the meeting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investor_id: Option<String>,
    /// Investor display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investor_name: Option<String>,
    /// Requested meeting time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    /// When the request was made
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Route of the call screen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_link: Option<String>,
}

impl MeetingRecord {
    /// Read the typed view out of a stored document
    ///
    /// # Errors
    ///
    /// Returns a description of the first field that failed to parse.
    pub fn from_document(doc: &Document) -> Result<Self, String> {
        serde_json::from_value(Value::Object(doc.clone())).map_err(|e| e.to_string())
    }

    /// Whether an offer has been claimed
    pub fn has_offer(&self) -> bool {
        self.offer.is_some()
    }
}

/// Partial document used for every record write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch(Document);

impl RecordPatch {
    /// Empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the offer
    #[must_use]
    pub fn offer(mut self, offer: &SessionDescription) -> Self {
        self.0.insert(FIELD_OFFER.into(), offer.to_value());
        self
    }

    /// Set the answer
    #[must_use]
    pub fn answer(mut self, answer: &SessionDescription) -> Self {
        self.0.insert(FIELD_ANSWER.into(), answer.to_value());
        self
    }

    /// Set the liveness flag
    #[must_use]
    pub fn active(mut self, active: bool) -> Self {
        self.0.insert(FIELD_ACTIVE.into(), Value::Bool(active));
        self
    }

    /// Set the acceptance status
    #[must_use]
    pub fn status(mut self, status: MeetingStatus) -> Self {
        self.0
            .insert(FIELD_STATUS.into(), Value::String(status.to_string()));
        self
    }

    /// Set an arbitrary field
    #[must_use]
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    /// Whether the patch touches `name`
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Convert into the stored representation
    pub fn into_document(self) -> Document {
        self.0
    }
}

/// One of the two append-only candidate streams of a meeting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CandidateStream {
    /// Written by the offerer, read by the answerer
    OfferCandidates,
    /// Written by the answerer, read by the offerer
    AnswerCandidates,
}

impl CandidateStream {
    /// Sub-collection name
    pub fn name(&self) -> &'static str {
        match self {
            Self::OfferCandidates => "offerCandidates",
            Self::AnswerCandidates => "answerCandidates",
        }
    }
}

impl fmt::Display for CandidateStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Signaling role of one peer, decided once per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Writes the offer
    Offerer,
    /// Writes the answer
    Answerer,
}

impl Role {
    /// Role implied by the shared record: answerer iff an offer exists
    pub fn for_record(record: Option<&MeetingRecord>) -> Self {
        match record {
            Some(r) if r.has_offer() => Self::Answerer,
            _ => Self::Offerer,
        }
    }

    /// Stream this peer appends its own candidates to
    pub fn local_stream(&self) -> CandidateStream {
        match self {
            Self::Offerer => CandidateStream::OfferCandidates,
            Self::Answerer => CandidateStream::AnswerCandidates,
        }
    }

    /// Stream carrying the other peer's candidates
    pub fn remote_stream(&self) -> CandidateStream {
        match self {
            Self::Offerer => CandidateStream::AnswerCandidates,
            Self::Answerer => CandidateStream::OfferCandidates,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offerer => write!(f, "offerer"),
            Self::Answerer => write!(f, "answerer"),
        }
    }
}

/// ICE agent connection state, transport independent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IceConnectionState {
    /// Gathering, no checks yet
    New,
    /// Checking candidate pairs
    Checking,
    /// A usable pair was found
    Connected,
    /// Checks finished
    Completed,
    /// Connectivity lost, may recover
    Disconnected,
    /// No usable pair
    Failed,
    /// Agent shut down
    Closed,
}

/// Overall peer connection state, transport independent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerConnectionState {
    /// Not started
    New,
    /// Transports are connecting
    Connecting,
    /// All transports connected
    Connected,
    /// A transport lost connectivity
    Disconnected,
    /// A transport failed
    Failed,
    /// Connection closed
    Closed,
}

/// Connection status shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Setting up
    Connecting,
    /// Media can flow
    Connected,
    /// Transport lost or failed; not retried
    Disconnected,
    /// Setup aborted
    Failed,
}

impl ConnectionStatus {
    /// Status implied by an ICE state change, if any
    pub fn from_ice_state(state: IceConnectionState) -> Option<Self> {
        match state {
            IceConnectionState::Connected | IceConnectionState::Completed => Some(Self::Connected),
            IceConnectionState::Failed | IceConnectionState::Disconnected => {
                Some(Self::Disconnected)
            }
            _ => None,
        }
    }

    /// Status implied by a peer connection state change, if any
    pub fn from_peer_state(state: PeerConnectionState) -> Option<Self> {
        match state {
            PeerConnectionState::Connected => Some(Self::Connected),
            PeerConnectionState::Failed | PeerConnectionState::Disconnected => {
                Some(Self::Disconnected)
            }
            _ => None,
        }
    }

    /// Human readable label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connecting => "Connecting...",
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle phase of a call session
///
/// ```text
///     Idle
///       │ (media acquired, record read)
///       ▼
///  RoleDetermined ─────────────┐
///       │                      │
///       ▼ (description written)│
/// SignalingInFlight ───────────┤
///       │                      ▼
///       ▼ (both descriptions)  Failed
///   Connected                  │
///       │                      │
///       ▼ (end call)           │
///   Terminated ◄───────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Not started
    Idle,
    /// Offerer or answerer fixed
    RoleDetermined,
    /// Descriptions and candidates being exchanged
    SignalingInFlight,
    /// Transport reported connectivity
    Connected,
    /// Setup aborted
    Failed,
    /// Resources released
    Terminated,
}

impl SessionPhase {
    /// Check whether a phase transition is legal
    pub fn can_transition_to(self, to: SessionPhase) -> bool {
        matches!(
            (self, to),
            (SessionPhase::Idle, SessionPhase::RoleDetermined)
                | (SessionPhase::RoleDetermined, SessionPhase::SignalingInFlight)
                | (SessionPhase::SignalingInFlight, SessionPhase::Connected)
                // Setup can abort before any role exists
                | (SessionPhase::Idle, SessionPhase::Failed)
                | (SessionPhase::RoleDetermined, SessionPhase::Failed)
                | (SessionPhase::SignalingInFlight, SessionPhase::Failed)
                // Ending the call
                | (SessionPhase::Idle, SessionPhase::Terminated)
                | (SessionPhase::RoleDetermined, SessionPhase::Terminated)
                | (SessionPhase::SignalingInFlight, SessionPhase::Terminated)
                | (SessionPhase::Connected, SessionPhase::Terminated)
                | (SessionPhase::Failed, SessionPhase::Terminated)
        )
    }

    /// Whether resources may still be held
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SessionPhase::RoleDetermined | SessionPhase::SignalingInFlight | SessionPhase::Connected
        )
    }
}

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Microphone
    Audio,
    /// Camera
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Media constraints for local capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    /// Enable audio
    pub audio: bool,
    /// Enable video
    pub video: bool,
}

impl MediaConstraints {
    /// Audio-only call
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }

    /// Video call with audio
    pub fn video_call() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }

    /// Check if audio is enabled
    pub fn has_audio(&self) -> bool {
        self.audio
    }

    /// Check if video is enabled
    pub fn has_video(&self) -> bool {
        self.video
    }

    /// Convert to media kinds, audio first
    pub fn to_media_kinds(&self) -> Vec<MediaKind> {
        let mut kinds = Vec::new();
        if self.audio {
            kinds.push(MediaKind::Audio);
        }
        if self.video {
            kinds.push(MediaKind::Video);
        }
        kinds
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self::video_call()
    }
}

/// Session event for notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Offerer or answerer fixed
    RoleDetermined {
        /// Meeting identifier
        meeting_id: MeetingId,
        /// Chosen role
        role: Role,
    },
    /// Displayed status changed
    StatusChanged {
        /// Previous status
        from: ConnectionStatus,
        /// New status
        to: ConnectionStatus,
    },
    /// Remote peer's media arrived
    RemoteTrackReceived {
        /// Remote track id
        track_id: String,
        /// Remote track kind
        kind: MediaKind,
    },
    /// Setup aborted
    Failed {
        /// User-facing diagnostic
        reason: String,
    },
    /// Session torn down
    Ended,
}

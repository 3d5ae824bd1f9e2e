//! Call session manager
//!
//! A [`CallSession`] owns one peer-to-peer media session for one meeting. It
//! uses the meeting record store as its signaling relay:
//!
//! - the **offerer** claims the record's `offer` field with a compare-and-set,
//!   then waits for an `answer` to appear on the record;
//! - the **answerer** applies the stored offer, writes its `answer`, and is
//!   ready to apply candidates from the start;
//! - each side appends its local candidates to its own candidate stream and
//!   reads the other side's stream, deferring candidates that arrive before a
//!   remote description in a [`PendingCandidateQueue`].
//!
//! Setup runs inside [`CallSession::start`]. After that a single driver task
//! multiplexes record changes, remote candidates, transport events and the
//! shutdown signal, so every state mutation happens in one place.

use crate::candidate_queue::PendingCandidateQueue;
use crate::config::SessionConfig;
use crate::media::{LocalMedia, LocalTrack, MediaError, MediaSource};
use crate::store::{MeetingStore, StoreError, Subscription, WriteMode};
use crate::transport::{
    PeerTransport, TransportError, TransportEvent, TransportEvents, TransportFactory,
};
use crate::types::{
    ConnectionStatus, Document, IceCandidatePayload, MediaKind, MeetingId, MeetingIdError,
    MeetingRecord, MeetingStatus, RecordPatch, Role, SessionEvent, SessionPhase, FIELD_OFFER,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Call session errors
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// No meeting identifier supplied
    #[error("Missing meeting identifier")]
    MissingMeetingId,

    /// Meeting identifier unusable
    #[error("Invalid meeting identifier: {0}")]
    InvalidMeetingId(String),

    /// Local capture failed
    #[error(transparent)]
    Media(#[from] MediaError),

    /// The meeting request has not been accepted
    #[error("Meeting is {0}, not accepted")]
    MeetingNotAccepted(MeetingStatus),

    /// Joined as answerer but the record carries no offer
    #[error("Meeting record has no offer to answer")]
    MissingOffer,

    /// The record could not be read
    #[error("Malformed meeting record: {0}")]
    MalformedRecord(String),

    /// Store operation failed during setup
    #[error("Signaling store error: {0}")]
    Store(#[from] StoreError),

    /// Peer transport failed during setup
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Operation not legal in the current phase
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// The call was ended before setup completed
    #[error("Call ended during setup")]
    Cancelled,
}

impl From<MeetingIdError> for SessionError {
    fn from(err: MeetingIdError) -> Self {
        match err {
            MeetingIdError::Missing => Self::MissingMeetingId,
            MeetingIdError::Invalid(reason) => Self::InvalidMeetingId(reason),
        }
    }
}

/// Remote media seen on the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteTrackInfo {
    /// Remote track id
    pub track_id: String,
    /// Remote track kind
    pub kind: MediaKind,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Validated meeting id, once known
    pub meeting_id: Option<MeetingId>,
    /// Lifecycle phase
    pub phase: SessionPhase,
    /// Role, once committed
    pub role: Option<Role>,
    /// Displayed status
    pub status: ConnectionStatus,
    /// Diagnostic for a failed setup
    pub diagnostic: Option<String>,
    /// Local description applied
    pub local_description_set: bool,
    /// Remote description applied
    pub remote_description_set: bool,
    /// Local candidates written to the store
    pub candidates_sent: u64,
    /// Remote candidates accepted by the transport
    pub candidates_applied: u64,
    /// Remote candidates that had to wait for the remote description
    pub candidates_queued: u64,
    /// Remote candidates dropped as unusable
    pub candidates_discarded: u64,
    /// Remote candidates waiting right now
    pub candidates_pending: usize,
    /// Remote media received
    pub remote_tracks: Vec<RemoteTrackInfo>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            meeting_id: None,
            phase: SessionPhase::Idle,
            role: None,
            status: ConnectionStatus::Connecting,
            diagnostic: None,
            local_description_set: false,
            remote_description_set: false,
            candidates_sent: 0,
            candidates_applied: 0,
            candidates_queued: 0,
            candidates_discarded: 0,
            candidates_pending: 0,
            remote_tracks: Vec::new(),
        }
    }
}

/// Shared session state plus the event fan-out
#[derive(Clone)]
struct StateHandle {
    session_id: Uuid,
    state: Arc<RwLock<SessionSnapshot>>,
    events: broadcast::Sender<SessionEvent>,
}

impl StateHandle {
    fn snapshot(&self) -> SessionSnapshot {
        self.state.read().clone()
    }

    fn phase(&self) -> SessionPhase {
        self.state.read().phase
    }

    fn update(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        f(&mut self.state.write());
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn advance(&self, to: SessionPhase) -> bool {
        let mut state = self.state.write();
        let from = state.phase;
        if !from.can_transition_to(to) {
            tracing::debug!(session_id = %self.session_id, from = ?from, to = ?to, "Ignoring phase transition");
            return false;
        }
        state.phase = to;
        tracing::debug!(session_id = %self.session_id, old_phase = ?from, new_phase = ?to, "Session phase transition");
        true
    }

    fn set_status(&self, to: ConnectionStatus) {
        let from = {
            let mut state = self.state.write();
            let from = state.status;
            if from == to {
                return;
            }
            state.status = to;
            from
        };
        tracing::info!(session_id = %self.session_id, status = %to, "Connection status changed");
        self.emit(SessionEvent::StatusChanged { from, to });
    }

    fn commit_role(&self, meeting_id: &MeetingId, role: Role) {
        self.update(|s| s.role = Some(role));
        self.advance(SessionPhase::RoleDetermined);
        tracing::info!(session_id = %self.session_id, meeting_id = %meeting_id, role = %role, "Role determined");
        self.emit(SessionEvent::RoleDetermined {
            meeting_id: meeting_id.clone(),
            role,
        });
    }

    fn fail(&self, err: &SessionError) {
        let reason = err.to_string();
        if !self.advance(SessionPhase::Failed) {
            return;
        }
        tracing::error!(session_id = %self.session_id, error = %reason, "Call setup failed");
        self.update(|s| s.diagnostic = Some(reason.clone()));
        self.set_status(ConnectionStatus::Failed);
        self.emit(SessionEvent::Failed { reason });
    }

    fn terminate(&self) {
        if self.phase() == SessionPhase::Terminated {
            return;
        }
        if self.advance(SessionPhase::Terminated) {
            tracing::info!(session_id = %self.session_id, "Call ended");
            self.emit(SessionEvent::Ended);
        }
    }
}

/// A started call; dropping `shutdown` also stops it
struct ActiveCall {
    shutdown: oneshot::Sender<()>,
    stage: Stage,
}

enum Stage {
    /// `start` is still running; resolves when it returns
    SettingUp(oneshot::Receiver<()>),
    Running(JoinHandle<()>),
}

/// Identity of a remote candidate for duplicate suppression
type CandidateKey = (String, Option<String>, Option<u16>);

/// Everything one session owns between setup and teardown
struct Signaling<S: MeetingStore> {
    meeting_id: MeetingId,
    store: Arc<S>,
    state: StateHandle,
    media: LocalMedia,
    transport: Option<Arc<dyn PeerTransport>>,
    transport_events: Option<TransportEvents>,
    record_updates: Option<Subscription<Document>>,
    remote_candidates: Option<Subscription<Value>>,
    queue: PendingCandidateQueue,
    seen_candidates: HashSet<CandidateKey>,
    role: Option<Role>,
    local_description_set: bool,
    remote_description_set: bool,
    announced: bool,
    teardown_timeout: Duration,
}

/// What ended the driver loop
enum Exit {
    Shutdown,
    Aborted(SessionError),
}

impl<S: MeetingStore> Signaling<S> {
    fn transport(&self) -> Result<Arc<dyn PeerTransport>, SessionError> {
        self.transport
            .clone()
            .ok_or_else(|| SessionError::InvalidState("transport not created".to_string()))
    }

    async fn read_record(&self) -> Result<Option<MeetingRecord>, SessionError> {
        match self.store.get(&self.meeting_id).await? {
            Some(doc) => MeetingRecord::from_document(&doc)
                .map(Some)
                .map_err(SessionError::MalformedRecord),
            None => Ok(None),
        }
    }

    /// Run setup up to the point where the driver takes over
    async fn establish(
        &mut self,
        config: &SessionConfig,
        factory: &dyn TransportFactory,
    ) -> Result<Role, SessionError> {
        let record = self.read_record().await?;
        if config.require_accepted {
            if let Some(status) = record.as_ref().and_then(|r| r.status) {
                if status != MeetingStatus::Accepted {
                    return Err(SessionError::MeetingNotAccepted(status));
                }
            }
        }

        let (transport, events) = factory.create(&config.ice_servers).await?;
        self.transport = Some(transport.clone());
        self.transport_events = Some(events);
        for track in self.media.tracks() {
            transport.add_track(track).await?;
        }

        match (Role::for_record(record.as_ref()), record) {
            (Role::Answerer, Some(record)) => {
                self.answer(record).await?;
                Ok(Role::Answerer)
            }
            _ => self.offer().await,
        }
    }

    async fn offer(&mut self) -> Result<Role, SessionError> {
        let transport = self.transport()?;
        let offer = transport.create_offer().await?;
        let claim = RecordPatch::new().offer(&offer).active(true);
        let claimed = self
            .store
            .merge_if_absent(&self.meeting_id, FIELD_OFFER, claim.into_document())
            .await?;
        if !claimed {
            tracing::info!(meeting_id = %self.meeting_id, "Offer already claimed, joining as answerer");
            let record = self.read_record().await?.ok_or(SessionError::MissingOffer)?;
            self.answer(record).await?;
            return Ok(Role::Answerer);
        }
        self.announced = true;
        self.role = Some(Role::Offerer);
        self.state.commit_role(&self.meeting_id, Role::Offerer);

        transport.set_local_description(offer).await?;
        self.local_description_set = true;
        self.state.update(|s| s.local_description_set = true);
        self.state.advance(SessionPhase::SignalingInFlight);

        self.record_updates = Some(self.store.subscribe(&self.meeting_id).await?);
        self.remote_candidates = Some(
            self.store
                .subscribe_stream(&self.meeting_id, Role::Offerer.remote_stream())
                .await?,
        );
        Ok(Role::Offerer)
    }

    async fn answer(&mut self, record: MeetingRecord) -> Result<(), SessionError> {
        let offer = record.offer.ok_or(SessionError::MissingOffer)?;
        let transport = self.transport()?;
        self.role = Some(Role::Answerer);
        self.state.commit_role(&self.meeting_id, Role::Answerer);

        transport.set_remote_description(offer).await?;
        self.remote_description_set = true;
        self.state.update(|s| s.remote_description_set = true);

        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;
        self.local_description_set = true;
        self.state.update(|s| s.local_description_set = true);

        let patch = RecordPatch::new().answer(&answer).active(true);
        self.store
            .update(&self.meeting_id, patch.into_document())
            .await?;
        self.announced = true;
        self.drain_pending().await;
        self.state.advance(SessionPhase::SignalingInFlight);

        self.remote_candidates = Some(
            self.store
                .subscribe_stream(&self.meeting_id, Role::Answerer.remote_stream())
                .await?,
        );
        Ok(())
    }

    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let exit = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break Exit::Shutdown,
                event = next_event(&mut self.transport_events) => match event {
                    Some(event) => self.on_transport_event(event).await,
                    None => self.transport_events = None,
                },
                doc = next_item(&mut self.record_updates) => match doc {
                    Some(doc) => {
                        if let Err(err) = self.on_record(doc).await {
                            break Exit::Aborted(err);
                        }
                    }
                    None => self.record_updates = None,
                },
                item = next_item(&mut self.remote_candidates) => match item {
                    Some(item) => self.on_remote_candidate(item).await,
                    None => self.remote_candidates = None,
                },
            }
        };

        self.release().await;
        match exit {
            Exit::Shutdown => self.state.terminate(),
            Exit::Aborted(err) => self.state.fail(&err),
        }
    }

    async fn on_record(&mut self, doc: Document) -> Result<(), SessionError> {
        if self.role != Some(Role::Offerer) || self.remote_description_set {
            return Ok(());
        }
        let record = match MeetingRecord::from_document(&doc) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(meeting_id = %self.meeting_id, "Ignoring unreadable record update: {}", e);
                return Ok(());
            }
        };
        let Some(answer) = record.answer else {
            return Ok(());
        };

        self.transport()?.set_remote_description(answer).await?;
        self.remote_description_set = true;
        self.state.update(|s| s.remote_description_set = true);
        tracing::debug!(meeting_id = %self.meeting_id, "Answer applied");
        self.drain_pending().await;
        self.mark_connected();
        Ok(())
    }

    async fn on_remote_candidate(&mut self, item: Value) {
        let candidate = match IceCandidatePayload::from_value(item) {
            Ok(candidate) => candidate,
            Err(e) => {
                tracing::warn!(meeting_id = %self.meeting_id, "Discarding remote candidate: {}", e);
                self.state.update(|s| s.candidates_discarded += 1);
                return;
            }
        };
        if candidate.is_end_of_candidates() {
            tracing::trace!("Remote end of candidates");
            return;
        }
        // Stream subscriptions deliver at least once
        let key = (
            candidate.candidate.clone(),
            candidate.sdp_mid.clone(),
            candidate.sdp_mline_index,
        );
        if !self.seen_candidates.insert(key) {
            tracing::trace!(candidate = %candidate.candidate, "Skipping redelivered remote candidate");
            return;
        }
        if self.remote_description_set {
            self.apply(candidate).await;
            return;
        }
        match self.queue.push(candidate) {
            Ok(()) => {
                let pending = self.queue.len();
                self.state.update(|s| {
                    s.candidates_queued += 1;
                    s.candidates_pending = pending;
                });
            }
            Err(e) => {
                tracing::warn!(meeting_id = %self.meeting_id, "Discarding remote candidate: {}", e);
                self.state.update(|s| s.candidates_discarded += 1);
            }
        }
    }

    async fn apply(&mut self, candidate: IceCandidatePayload) {
        let Some(transport) = self.transport.clone() else {
            return;
        };
        match transport.add_ice_candidate(candidate).await {
            Ok(()) => self.state.update(|s| s.candidates_applied += 1),
            Err(e) => {
                tracing::warn!(meeting_id = %self.meeting_id, "Failed to apply remote candidate: {}", e);
                self.state.update(|s| s.candidates_discarded += 1);
            }
        }
    }

    async fn drain_pending(&mut self) {
        let pending = self.queue.drain();
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "Draining queued candidates");
        }
        for candidate in pending {
            self.apply(candidate).await;
        }
        self.state.update(|s| s.candidates_pending = 0);
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::CandidateGenerated(Some(candidate))
                if !candidate.is_end_of_candidates() =>
            {
                self.send_local_candidate(candidate).await;
            }
            TransportEvent::CandidateGenerated(_) => {
                tracing::debug!(meeting_id = %self.meeting_id, "Local candidate gathering complete");
            }
            TransportEvent::TrackReceived { track_id, kind } => {
                tracing::info!(track_id = %track_id, kind = %kind, "Remote track received");
                let info = RemoteTrackInfo {
                    track_id: track_id.clone(),
                    kind,
                };
                self.state.update(|s| s.remote_tracks.push(info));
                self.state
                    .emit(SessionEvent::RemoteTrackReceived { track_id, kind });
                self.mark_connected();
            }
            TransportEvent::IceConnectionStateChanged(state) => {
                tracing::debug!(ice_state = ?state, "ICE connection state changed");
                self.on_status_signal(ConnectionStatus::from_ice_state(state));
            }
            TransportEvent::ConnectionStateChanged(state) => {
                tracing::debug!(peer_state = ?state, "Peer connection state changed");
                self.on_status_signal(ConnectionStatus::from_peer_state(state));
            }
        }
    }

    async fn send_local_candidate(&mut self, candidate: IceCandidatePayload) {
        let Some(role) = self.role else {
            tracing::warn!("Local candidate before role was committed");
            return;
        };
        match self
            .store
            .append(&self.meeting_id, role.local_stream(), candidate.to_value())
            .await
        {
            Ok(()) => self.state.update(|s| s.candidates_sent += 1),
            Err(e) => {
                tracing::warn!(meeting_id = %self.meeting_id, stream = %role.local_stream(), "Failed to publish local candidate: {}", e);
            }
        }
    }

    fn on_status_signal(&mut self, status: Option<ConnectionStatus>) {
        match status {
            Some(ConnectionStatus::Connected) => self.mark_connected(),
            Some(ConnectionStatus::Disconnected) => {
                if self.state.phase().is_live() {
                    self.state.set_status(ConnectionStatus::Disconnected);
                }
            }
            _ => {}
        }
    }

    fn mark_connected(&mut self) {
        if !(self.local_description_set && self.remote_description_set) {
            tracing::debug!("Ignoring connected signal before both descriptions are set");
            return;
        }
        if !self.state.phase().is_live() {
            return;
        }
        self.state.set_status(ConnectionStatus::Connected);
        if self.state.phase() == SessionPhase::SignalingInFlight {
            self.state.advance(SessionPhase::Connected);
        }
    }

    /// Stop media, close the transport, detach subscriptions and clear the
    /// record's liveness flag; never fails
    async fn release(&mut self) {
        let stopped = self.media.stop_all();
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                tracing::warn!("Failed to close transport: {}", e);
            }
        }
        if let Some(sub) = self.record_updates.take() {
            sub.unsubscribe();
        }
        if let Some(sub) = self.remote_candidates.take() {
            sub.unsubscribe();
        }
        self.transport_events = None;

        if std::mem::take(&mut self.announced) {
            let patch = RecordPatch::new().active(false).into_document();
            let write = self.store.set(&self.meeting_id, patch, WriteMode::Merge);
            match tokio::time::timeout(self.teardown_timeout, write).await {
                Ok(Ok(())) => tracing::debug!(meeting_id = %self.meeting_id, "Record marked inactive"),
                Ok(Err(e)) => {
                    tracing::warn!(meeting_id = %self.meeting_id, "Failed to mark record inactive: {}", e);
                }
                Err(_) => {
                    tracing::warn!(meeting_id = %self.meeting_id, "Timed out marking record inactive");
                }
            }
        }
        tracing::debug!(tracks_stopped = stopped, "Session resources released");
    }
}

async fn next_item<T>(sub: &mut Option<Subscription<T>>) -> Option<T> {
    match sub {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}

async fn next_event(events: &mut Option<TransportEvents>) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

/// One peer's side of a meeting call
///
/// Dropping the session tears it down in the background, the same way
/// [`end_call`](Self::end_call) does.
pub struct CallSession<S: MeetingStore> {
    raw_meeting_id: String,
    config: SessionConfig,
    store: Arc<S>,
    transports: Arc<dyn TransportFactory>,
    media: Arc<dyn MediaSource>,
    state: StateHandle,
    local_tracks: Mutex<Vec<LocalTrack>>,
    active: tokio::sync::Mutex<Option<ActiveCall>>,
}

impl<S: MeetingStore> CallSession<S> {
    /// Create a session for the meeting id taken from the call route
    pub fn new(
        meeting_id: impl Into<String>,
        config: SessionConfig,
        store: Arc<S>,
        transports: Arc<dyn TransportFactory>,
        media: Arc<dyn MediaSource>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            raw_meeting_id: meeting_id.into(),
            config,
            store,
            transports,
            media,
            state: StateHandle {
                session_id: Uuid::new_v4(),
                state: Arc::new(RwLock::new(SessionSnapshot::default())),
                events,
            },
            local_tracks: Mutex::new(Vec::new()),
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Acquire media, determine the role and start signaling
    ///
    /// On failure the session is left in [`SessionPhase::Failed`] with the
    /// error's text as its diagnostic and every acquired resource released.
    ///
    /// # Errors
    ///
    /// Returns error if the meeting id is missing or invalid, media cannot be
    /// acquired, the meeting is not accepted, the record has no offer to
    /// answer, or the store or transport fail during setup. Returns
    /// [`SessionError::Cancelled`] when [`end_call`](Self::end_call) runs
    /// before setup completes; the session is then terminated, not failed.
    #[tracing::instrument(skip(self), fields(session_id = %self.state.session_id, meeting_id = %self.raw_meeting_id))]
    pub async fn start(&self) -> Result<Role, SessionError> {
        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let (_setup_guard, setup_done) = oneshot::channel::<()>();
        {
            let mut active = self.active.lock().await;
            let phase = self.state.phase();
            if phase != SessionPhase::Idle || active.is_some() {
                return Err(SessionError::InvalidState(format!(
                    "cannot start a session in phase {phase:?}"
                )));
            }
            *active = Some(ActiveCall {
                shutdown,
                stage: Stage::SettingUp(setup_done),
            });
        }

        let prepared = tokio::select! {
            biased;
            _ = &mut shutdown_rx => None,
            prepared = self.prepare() => Some(prepared),
        };
        let mut signaling = match prepared {
            Some(Ok(signaling)) => signaling,
            Some(Err(err)) => {
                self.active.lock().await.take();
                self.state.fail(&err);
                return Err(err);
            }
            None => {
                tracing::info!("Call ended while acquiring media");
                self.state.terminate();
                return Err(SessionError::Cancelled);
            }
        };

        let established = tokio::select! {
            biased;
            _ = &mut shutdown_rx => None,
            result = signaling.establish(&self.config, self.transports.as_ref()) => Some(result),
        };
        let role = match established {
            Some(Ok(role)) => role,
            Some(Err(err)) => {
                signaling.release().await;
                self.active.lock().await.take();
                self.state.fail(&err);
                return Err(err);
            }
            None => {
                tracing::info!("Call ended during signaling setup");
                signaling.release().await;
                self.state.terminate();
                return Err(SessionError::Cancelled);
            }
        };

        {
            let mut active = self.active.lock().await;
            if let Some(call) = active.as_mut() {
                let driver = tokio::spawn(signaling.run(shutdown_rx));
                call.stage = Stage::Running(driver);
                return Ok(role);
            }
        }
        signaling.release().await;
        self.state.terminate();
        Err(SessionError::Cancelled)
    }

    /// Validate the id and acquire media; no store I/O happens here
    async fn prepare(&self) -> Result<Signaling<S>, SessionError> {
        let meeting_id = MeetingId::parse(&self.raw_meeting_id)?;
        self.state.update(|s| s.meeting_id = Some(meeting_id.clone()));

        let media = self.media.acquire(&self.config.constraints).await?;
        *self.local_tracks.lock() = media.tracks().to_vec();

        Ok(Signaling {
            meeting_id,
            store: self.store.clone(),
            state: self.state.clone(),
            media,
            transport: None,
            transport_events: None,
            record_updates: None,
            remote_candidates: None,
            queue: PendingCandidateQueue::with_capacity(self.config.candidate_queue_capacity),
            seen_candidates: HashSet::new(),
            role: None,
            local_description_set: false,
            remote_description_set: false,
            announced: false,
            teardown_timeout: self.config.teardown_write_timeout(),
        })
    }

    /// End the call
    ///
    /// Stops local tracks, closes the transport, releases every subscription
    /// and best-effort marks the record inactive. A call still being set up
    /// is cancelled and its `start` returns [`SessionError::Cancelled`].
    /// Calling it again, or on a session that never started, is a no-op.
    #[tracing::instrument(skip(self), fields(session_id = %self.state.session_id))]
    pub async fn end_call(&self) {
        let call = self.active.lock().await.take();
        if let Some(call) = call {
            let _ = call.shutdown.send(());
            match call.stage {
                Stage::SettingUp(setup_done) => {
                    let _ = setup_done.await;
                }
                Stage::Running(driver) => {
                    if let Err(e) = driver.await {
                        tracing::error!("Signaling driver stopped abnormally: {}", e);
                    }
                }
            }
        }
        self.state.terminate();
    }

    /// Current state
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.snapshot()
    }

    /// Single status string for display
    #[must_use]
    pub fn status_line(&self) -> String {
        let snapshot = self.state.snapshot();
        match snapshot.phase {
            SessionPhase::Terminated => "Call ended".to_string(),
            _ => snapshot.status.label().to_string(),
        }
    }

    /// Diagnostic for a failed setup
    #[must_use]
    pub fn diagnostic(&self) -> Option<String> {
        self.state.snapshot().diagnostic
    }

    /// Committed role, if any
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.state.snapshot().role
    }

    /// Locally captured tracks
    #[must_use]
    pub fn local_tracks(&self) -> Vec<LocalTrack> {
        self.local_tracks.lock().clone()
    }

    /// Subscribe to session events
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.state.events.subscribe()
    }

    /// Meeting id exactly as supplied
    #[must_use]
    pub fn requested_meeting_id(&self) -> &str {
        &self.raw_meeting_id
    }
}

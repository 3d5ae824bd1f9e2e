//! Deterministic transport for tests
//!
//! [`ScriptedTransport`] behaves like a peer connection as far as the call
//! session can observe: it refuses candidates until a remote description is
//! applied, answers only after an offer, and reports what was done to it.
//! Connectivity is driven by the test through [`ScriptedTransport::emit`], or
//! automatically once both descriptions are set when the factory is built
//! with [`ScriptedTransportFactory::with_auto_connect`].

use crate::media::LocalTrack;
use crate::transport::{
    IceServerConfig, PeerTransport, TransportError, TransportEvent, TransportEvents,
    TransportFactory,
};
use crate::types::{
    IceCandidatePayload, IceConnectionState, PeerConnectionState, SdpKind, SessionDescription,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Candidates containing this marker are rejected by [`ScriptedTransport`]
pub const MALFORMED_CANDIDATE_MARKER: &str = "malformed";

/// A host candidate line for tests
pub fn host_candidate(label: &str, n: usize) -> IceCandidatePayload {
    IceCandidatePayload {
        candidate: format!(
            "candidate:{label}{n} 1 udp 2122260223 10.0.0.{} {} typ host",
            n % 250 + 1,
            50_000 + n
        ),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

#[derive(Debug, Default)]
struct ScriptedState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    applied: Vec<IceCandidatePayload>,
    tracks: Vec<String>,
    close_calls: usize,
}

/// In-memory [`PeerTransport`]
pub struct ScriptedTransport {
    label: String,
    state: Mutex<ScriptedState>,
    events: mpsc::UnboundedSender<TransportEvent>,
    gathered: Vec<IceCandidatePayload>,
    auto_connect: bool,
    closed: AtomicBool,
}

impl ScriptedTransport {
    fn new(
        label: String,
        gathered: Vec<IceCandidatePayload>,
        auto_connect: bool,
    ) -> (Self, TransportEvents) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                label,
                state: Mutex::new(ScriptedState::default()),
                events,
                gathered,
                auto_connect,
                closed: AtomicBool::new(false),
            },
            receiver,
        )
    }

    /// Raise a transport event as the peer connection would
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Candidates accepted so far, in application order
    #[must_use]
    pub fn applied_candidates(&self) -> Vec<IceCandidatePayload> {
        self.state.lock().applied.clone()
    }

    /// Applied local description
    #[must_use]
    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    /// Applied remote description
    #[must_use]
    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    /// Ids of attached local tracks
    #[must_use]
    pub fn track_ids(&self) -> Vec<String> {
        self.state.lock().tracks.clone()
    }

    /// Whether [`PeerTransport::close`] has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// How many times [`PeerTransport::close`] was called
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn sdp(&self, kind: &str) -> String {
        format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns={kind}\r\nt=0 0\r\n",
            self.label
        )
    }

    fn maybe_connect(&self) {
        let both = {
            let state = self.state.lock();
            state.local.is_some() && state.remote.is_some()
        };
        if self.auto_connect && both {
            self.emit(TransportEvent::IceConnectionStateChanged(
                IceConnectionState::Connected,
            ));
            self.emit(TransportEvent::ConnectionStateChanged(
                PeerConnectionState::Connected,
            ));
        }
    }
}

#[async_trait]
impl PeerTransport for ScriptedTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        Ok(SessionDescription::offer(self.sdp("offer")))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        match self.state.lock().remote.as_ref().map(|d| d.kind) {
            Some(SdpKind::Offer) => Ok(SessionDescription::answer(self.sdp("answer"))),
            _ => Err(TransportError::DescriptionError(
                "no remote offer to answer".to_string(),
            )),
        }
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        desc.validate().map_err(TransportError::DescriptionError)?;
        self.state.lock().local = Some(desc);
        for candidate in &self.gathered {
            self.emit(TransportEvent::CandidateGenerated(Some(candidate.clone())));
        }
        if !self.gathered.is_empty() {
            self.emit(TransportEvent::CandidateGenerated(None));
        }
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        desc.validate().map_err(TransportError::DescriptionError)?;
        self.state.lock().remote = Some(desc);
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        candidate: IceCandidatePayload,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if state.remote.is_none() {
            return Err(TransportError::CandidateError(
                "remote description not set".to_string(),
            ));
        }
        if candidate.candidate.contains(MALFORMED_CANDIDATE_MARKER) {
            return Err(TransportError::CandidateError(format!(
                "cannot parse '{}'",
                candidate.candidate
            )));
        }
        state.applied.push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.state.lock().tracks.push(track.id().to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.state.lock().close_calls += 1;
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.emit(TransportEvent::ConnectionStateChanged(
                PeerConnectionState::Closed,
            ));
        }
        Ok(())
    }
}

/// Hands out [`ScriptedTransport`]s and keeps them for inspection
#[derive(Default)]
pub struct ScriptedTransportFactory {
    created: Mutex<Vec<Arc<ScriptedTransport>>>,
    gather_count: usize,
    auto_connect: bool,
    fail: AtomicBool,
    counter: AtomicUsize,
}

impl ScriptedTransportFactory {
    /// Factory whose transports gather no candidates
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Each transport gathers `count` host candidates on its local description
    #[must_use]
    pub fn with_gathered_candidates(mut self, count: usize) -> Self {
        self.gather_count = count;
        self
    }

    /// Transports report connectivity once both descriptions are applied
    #[must_use]
    pub fn with_auto_connect(mut self) -> Self {
        self.auto_connect = true;
        self
    }

    /// Make the next [`TransportFactory::create`] calls fail
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every transport created so far
    #[must_use]
    pub fn transports(&self) -> Vec<Arc<ScriptedTransport>> {
        self.created.lock().clone()
    }

    /// Most recently created transport
    #[must_use]
    pub fn last(&self) -> Option<Arc<ScriptedTransport>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl TransportFactory for ScriptedTransportFactory {
    async fn create(
        &self,
        ice_servers: &[IceServerConfig],
    ) -> Result<(Arc<dyn PeerTransport>, TransportEvents), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::SetupError(
                "scripted setup failure".to_string(),
            ));
        }
        for server in ice_servers {
            server.validate()?;
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let label = format!("peer{n}");
        let gathered = (0..self.gather_count)
            .map(|i| host_candidate(&label, i))
            .collect();
        let (transport, events) = ScriptedTransport::new(label, gathered, self.auto_connect);
        let transport = Arc::new(transport);
        self.created.lock().push(transport.clone());
        Ok((transport, events))
    }
}

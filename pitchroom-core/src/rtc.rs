//! WebRTC peer transport
//!
//! [`PeerTransport`] backed by the `webrtc` crate. Every local track becomes a
//! sample track (opus for audio, VP8 for video) with an RTCP drain task on its
//! sender, and peer connection callbacks are forwarded into the transport's
//! event channel.

use crate::media::LocalTrack;
use crate::transport::{
    IceServerConfig, PeerTransport, TransportError, TransportEvent, TransportEvents,
    TransportFactory,
};
use crate::types::{
    IceCandidatePayload, IceConnectionState, MediaKind, PeerConnectionState, SdpKind,
    SessionDescription,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Builds [`RtcPeerTransport`]s
#[derive(Debug, Clone, Default)]
pub struct RtcTransportFactory;

impl RtcTransportFactory {
    /// Create a factory
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    #[tracing::instrument(skip(self), fields(server_count = ice_servers.len()))]
    async fn create(
        &self,
        ice_servers: &[IceServerConfig],
    ) -> Result<(Arc<dyn PeerTransport>, TransportEvents), TransportError> {
        let (transport, events) = RtcPeerTransport::connect(ice_servers).await?;
        Ok((Arc::new(transport), events))
    }
}

/// Peer connection wrapper
pub struct RtcPeerTransport {
    peer_connection: Arc<RTCPeerConnection>,
    closed: AtomicBool,
}

impl RtcPeerTransport {
    /// Build a peer connection and wire its callbacks
    ///
    /// # Errors
    ///
    /// Returns error if an ICE server entry is invalid or the connection
    /// cannot be created.
    pub async fn connect(
        ice_servers: &[IceServerConfig],
    ) -> Result<(Self, TransportEvents), TransportError> {
        for server in ice_servers {
            server.validate()?;
        }

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::SetupError(format!("Failed to register codecs: {e}")))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| {
                TransportError::SetupError(format!("Failed to register interceptors: {e}"))
            })?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(config).await.map_err(|e| {
            tracing::error!("Failed to create peer connection: {}", e);
            TransportError::SetupError(format!("Failed to create peer connection: {e}"))
        })?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        wire_callbacks(&peer_connection, event_tx);
        tracing::debug!("Created peer connection");

        Ok((
            Self {
                peer_connection,
                closed: AtomicBool::new(false),
            },
            event_rx,
        ))
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

fn wire_callbacks(pc: &RTCPeerConnection, event_tx: mpsc::UnboundedSender<TransportEvent>) {
    let tx = event_tx.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let tx = tx.clone();
        Box::pin(async move {
            let payload = match candidate {
                Some(c) => match c.to_json() {
                    Ok(init) => Some(candidate_from_init(init)),
                    Err(e) => {
                        tracing::warn!("Failed to serialize local candidate: {}", e);
                        return;
                    }
                },
                None => None,
            };
            let _ = tx.send(TransportEvent::CandidateGenerated(payload));
        })
    }));

    let tx = event_tx.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let tx = tx.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Audio => MediaKind::Audio,
                RTPCodecType::Video => MediaKind::Video,
                _ => return,
            };
            let _ = tx.send(TransportEvent::TrackReceived {
                track_id: track.id().to_string(),
                kind,
            });
        })
    }));

    let tx = event_tx.clone();
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        let tx = tx.clone();
        Box::pin(async move {
            if let Some(state) = map_ice_state(state) {
                let _ = tx.send(TransportEvent::IceConnectionStateChanged(state));
            }
        })
    }));

    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let tx = event_tx.clone();
        Box::pin(async move {
            if let Some(state) = map_peer_state(state) {
                let _ = tx.send(TransportEvent::ConnectionStateChanged(state));
            }
        })
    }));
}

fn candidate_from_init(init: RTCIceCandidateInit) -> IceCandidatePayload {
    IceCandidatePayload {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    match state {
        RTCIceConnectionState::New => Some(IceConnectionState::New),
        RTCIceConnectionState::Checking => Some(IceConnectionState::Checking),
        RTCIceConnectionState::Connected => Some(IceConnectionState::Connected),
        RTCIceConnectionState::Completed => Some(IceConnectionState::Completed),
        RTCIceConnectionState::Disconnected => Some(IceConnectionState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceConnectionState::Failed),
        RTCIceConnectionState::Closed => Some(IceConnectionState::Closed),
        _ => None,
    }
}

fn map_peer_state(state: RTCPeerConnectionState) -> Option<PeerConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(PeerConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerConnectionState::Closed),
        _ => None,
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    desc.validate().map_err(TransportError::DescriptionError)?;
    let result = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpKind::Rollback => {
            return Err(TransportError::DescriptionError(
                "rollback is not supported".to_string(),
            ))
        }
    };
    result.map_err(|e| TransportError::DescriptionError(format!("Invalid SDP: {e}")))
}

fn from_rtc_description(desc: RTCSessionDescription) -> Result<SessionDescription, TransportError> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        other => {
            return Err(TransportError::DescriptionError(format!(
                "unexpected description type {other}"
            )))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: desc.sdp,
    })
}

fn codec_for(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: "video/VP8".to_string(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
    }
}

#[async_trait]
impl PeerTransport for RtcPeerTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        let offer = self.peer_connection.create_offer(None).await.map_err(|e| {
            TransportError::DescriptionError(format!("Failed to create offer: {e}"))
        })?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        let answer = self.peer_connection.create_answer(None).await.map_err(|e| {
            TransportError::DescriptionError(format!("Failed to create answer: {e}"))
        })?;
        from_rtc_description(answer)
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let desc = to_rtc_description(desc)?;
        self.peer_connection
            .set_local_description(desc)
            .await
            .map_err(|e| {
                tracing::error!("Failed to set local description: {}", e);
                TransportError::DescriptionError(format!("Failed to set local description: {e}"))
            })
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let desc = to_rtc_description(desc)?;
        self.peer_connection
            .set_remote_description(desc)
            .await
            .map_err(|e| {
                TransportError::DescriptionError(format!("Failed to set remote description: {e}"))
            })
    }

    async fn add_ice_candidate(
        &self,
        candidate: IceCandidatePayload,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| TransportError::CandidateError(format!("Failed to add ICE candidate: {e}")))
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<(), TransportError> {
        self.ensure_open()?;
        let sample_track = Arc::new(TrackLocalStaticSample::new(
            codec_for(track.kind()),
            track.id().to_string(),
            track.kind().to_string(),
        ));
        let local: Arc<dyn TrackLocal + Send + Sync> = sample_track;
        let sender = self
            .peer_connection
            .add_track(local)
            .await
            .map_err(|e| TransportError::TrackError(format!("Failed to add {} track: {e}", track.kind())))?;

        // Interceptors only run while RTCP is being read
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        tracing::debug!(track_id = %track.id(), kind = %track.kind(), "Local track attached");
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for transceiver in self.peer_connection.get_transceivers().await {
            if let Err(e) = transceiver.stop().await {
                tracing::debug!("Failed to stop transceiver: {}", e);
            }
        }
        self.peer_connection
            .close()
            .await
            .map_err(|e| TransportError::SetupError(format!("Failed to close connection: {e}")))
    }
}

//! Peer transport contract
//!
//! The call session drives a peer connection through [`PeerTransport`] and
//! observes it through a stream of [`TransportEvent`]s. The event receiver is
//! handed out by [`TransportFactory::create`] together with the transport, so
//! callbacks wired inside the transport can never fire before somebody is
//! listening.

use crate::media::LocalTrack;
use crate::types::{
    IceCandidatePayload, IceConnectionState, MediaKind, PeerConnectionState, SessionDescription,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Public STUN server used when nothing is configured
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Peer connection could not be built
    #[error("Connection setup error: {0}")]
    SetupError(String),

    /// Description could not be created or applied
    #[error("Session description error: {0}")]
    DescriptionError(String),

    /// Candidate rejected
    #[error("ICE candidate error: {0}")]
    CandidateError(String),

    /// Track could not be attached
    #[error("Track error: {0}")]
    TrackError(String),

    /// Invalid ICE server entry
    #[error("Invalid ICE server: {0}")]
    InvalidIceServer(String),

    /// Transport already closed
    #[error("Transport closed")]
    Closed,
}

/// Notification raised by a peer transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Local candidate gathered; `None` marks end of gathering
    CandidateGenerated(Option<IceCandidatePayload>),
    /// Remote media arrived
    TrackReceived {
        /// Remote track id
        track_id: String,
        /// Remote track kind
        kind: MediaKind,
    },
    /// ICE agent state changed
    IceConnectionStateChanged(IceConnectionState),
    /// Overall connection state changed
    ConnectionStateChanged(PeerConnectionState),
}

/// Receiving half of a transport's event channel
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// NAT traversal helper (STUN or TURN)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server urls, e.g. `stun:host:port` or `turn:host:port`
    pub urls: Vec<String>,
    /// TURN username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    /// STUN server entry
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// TURN server entry with credentials
    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    /// Check urls and credentials
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidIceServer`] for an entry without
    /// urls, with an unknown scheme, or a TURN entry lacking credentials.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.urls.is_empty() {
            return Err(TransportError::InvalidIceServer(
                "entry has no urls".to_string(),
            ));
        }
        for url in &self.urls {
            let scheme = url.split(':').next().unwrap_or_default();
            match scheme {
                "stun" | "stuns" => {}
                "turn" | "turns" => {
                    if self.username.is_none() || self.credential.is_none() {
                        return Err(TransportError::InvalidIceServer(format!(
                            "{url} requires username and credential"
                        )));
                    }
                }
                _ => {
                    return Err(TransportError::InvalidIceServer(format!(
                        "{url} is not a stun or turn url"
                    )))
                }
            }
        }
        Ok(())
    }
}

impl Default for IceServerConfig {
    fn default() -> Self {
        Self::stun(DEFAULT_STUN_SERVER)
    }
}

/// One peer connection
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Create an offer
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    /// Create an answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    /// Apply the local description; starts candidate gathering
    async fn set_local_description(&self, desc: SessionDescription)
        -> Result<(), TransportError>;

    /// Apply the remote description
    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError>;

    /// Apply a remote candidate
    async fn add_ice_candidate(&self, candidate: IceCandidatePayload)
        -> Result<(), TransportError>;

    /// Send a local track to the remote peer
    async fn add_track(&self, track: &LocalTrack) -> Result<(), TransportError>;

    /// Stop transceivers and close the connection; safe to call repeatedly
    async fn close(&self) -> Result<(), TransportError>;
}

/// Builds peer transports
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Create a transport and its event stream
    async fn create(
        &self,
        ice_servers: &[IceServerConfig],
    ) -> Result<(Arc<dyn PeerTransport>, TransportEvents), TransportError>;
}

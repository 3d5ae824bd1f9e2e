//! Pitchroom - peer-to-peer meeting calls signaled through a document store
//!
//! This library establishes a WebRTC call between an investor and an
//! entrepreneur without a dedicated signaling server. Both peers address the
//! same meeting record in a document store and use it as the relay:
//!
//! - **Role by record**: the first peer claims the `offer` field with a
//!   compare-and-set and becomes the offerer; the other answers
//! - **Trickle ICE over streams**: each side appends its candidates to its own
//!   append-only stream and reads the other's
//! - **Ordering tolerant**: candidates that arrive before the remote
//!   description are queued and drained in arrival order
//! - **Pluggable collaborators**: the store, the peer transport and the media
//!   source are traits; a `webrtc` backed transport is built in
//!
//! # Examples
//!
//! ```rust,no_run
//! use pitchroom_core::{
//!     CallSession, InMemoryMeetingStore, RtcTransportFactory, SessionConfig,
//!     SyntheticMediaSource,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Arc::new(InMemoryMeetingStore::new());
//! let session = CallSession::new(
//!     "inv1_ent1",
//!     SessionConfig::default(),
//!     store,
//!     Arc::new(RtcTransportFactory::new()),
//!     Arc::new(SyntheticMediaSource::new()),
//! );
//!
//! let role = session.start().await?;
//! println!("joined as {role}: {}", session.status_line());
//!
//! session.end_call().await;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

/// Meeting and signaling types
pub mod types;

/// Participant identity abstraction
pub mod identity;

/// Meeting record store contract
pub mod store;

/// In-process meeting record store
pub mod memory_store;

/// Meeting request workflow
pub mod meeting;

/// Local media acquisition
pub mod media;

/// Peer transport contract
pub mod transport;

/// WebRTC peer transport (requires webrtc-transport feature)
#[cfg(feature = "webrtc-transport")]
pub mod rtc;

/// Pending remote candidate queue
pub mod candidate_queue;

/// Session configuration
pub mod config;

/// Call session manager
pub mod session;

/// Deterministic transport for tests (requires test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export main types at crate root
pub use candidate_queue::{PendingCandidateQueue, QueueError, DEFAULT_QUEUE_CAPACITY};
pub use config::{ConfigError, SessionConfig};
pub use identity::{Participant, ParticipantId, ParticipantRole, PeerIdentity};
pub use media::{
    LocalMedia, LocalTrack, MediaDevice, MediaError, MediaSource, SyntheticMediaSource,
};
pub use meeting::{Decision, MeetingError, MeetingScheduler};
pub use memory_store::InMemoryMeetingStore;
#[cfg(feature = "webrtc-transport")]
pub use rtc::{RtcPeerTransport, RtcTransportFactory};
pub use session::{CallSession, RemoteTrackInfo, SessionError, SessionSnapshot};
pub use store::{MeetingStore, StoreError, Subscription, WriteMode};
pub use transport::{
    IceServerConfig, PeerTransport, TransportError, TransportEvent, TransportEvents,
    TransportFactory, DEFAULT_STUN_SERVER,
};
pub use types::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::SessionConfig;
    pub use crate::identity::{Participant, ParticipantId, ParticipantRole, PeerIdentity};
    pub use crate::media::{MediaSource, SyntheticMediaSource};
    pub use crate::meeting::{Decision, MeetingScheduler};
    pub use crate::memory_store::InMemoryMeetingStore;
    #[cfg(feature = "webrtc-transport")]
    pub use crate::rtc::RtcTransportFactory;
    pub use crate::session::{CallSession, SessionError, SessionSnapshot};
    pub use crate::store::{MeetingStore, WriteMode};
    pub use crate::transport::{PeerTransport, TransportFactory};
    pub use crate::types::{
        ConnectionStatus, MediaConstraints, MeetingId, MeetingStatus, Role, SessionEvent,
        SessionPhase,
    };
}

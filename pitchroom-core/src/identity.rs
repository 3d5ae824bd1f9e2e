//! Participant identity
//!
//! The call core never authenticates anyone. It only needs to know who the
//! logged-in actor is and which side of a meeting they sit on, so that the
//! deterministic meeting identifier can be derived and the request workflow
//! can check who is allowed to accept or reject.

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};

/// Trait for participant identity
///
/// Implementations must provide a stable string form, because that form is
/// embedded into meeting identifiers shared by both peers.
pub trait PeerIdentity:
    Clone + Debug + Display + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static
{
    /// Convert the identity to a string representation
    fn to_string_repr(&self) -> String;

    /// Try to create an identity from a string representation
    fn from_string_repr(s: &str) -> anyhow::Result<Self>
    where
        Self: Sized;

    /// Get a unique identifier for this participant
    fn unique_id(&self) -> String {
        self.to_string_repr()
    }
}

/// String-backed participant identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    /// Create a new participant identifier
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PeerIdentity for ParticipantId {
    fn to_string_repr(&self) -> String {
        self.0.clone()
    }

    fn from_string_repr(s: &str) -> anyhow::Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            anyhow::bail!("participant id cannot be empty");
        }
        // '_' separates the two parties inside a meeting id
        if trimmed.contains('_') || trimmed.contains('/') {
            anyhow::bail!("participant id '{trimmed}' contains a reserved character");
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Which side of the marketplace a participant is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    /// Requests meetings
    Investor,
    /// Accepts or rejects meeting requests
    Entrepreneur,
}

impl Display for ParticipantRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Investor => write!(f, "investor"),
            Self::Entrepreneur => write!(f, "entrepreneur"),
        }
    }
}

/// A logged-in actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "I: PeerIdentity")]
pub struct Participant<I: PeerIdentity = ParticipantId> {
    /// Stable identifier
    pub id: I,
    /// Marketplace role
    pub role: ParticipantRole,
    /// Name shown to the other party
    pub display_name: String,
}

impl<I: PeerIdentity> Participant<I> {
    /// Create an investor
    pub fn investor(id: I, display_name: impl Into<String>) -> Self {
        Self {
            id,
            role: ParticipantRole::Investor,
            display_name: display_name.into(),
        }
    }

    /// Create an entrepreneur
    pub fn entrepreneur(id: I, display_name: impl Into<String>) -> Self {
        Self {
            id,
            role: ParticipantRole::Entrepreneur,
            display_name: display_name.into(),
        }
    }
}

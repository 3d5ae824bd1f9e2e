//! Call session configuration

use crate::candidate_queue::DEFAULT_QUEUE_CAPACITY;
use crate::transport::{IceServerConfig, TransportError};
use crate::types::MediaConstraints;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid configuration JSON
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// An ICE server entry is unusable
    #[error(transparent)]
    IceServer(#[from] TransportError),
}

/// Settings for one call session
///
/// Every field has a default, so a partial JSON file is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// NAT traversal helpers handed to the transport
    pub ice_servers: Vec<IceServerConfig>,
    /// Local capture request
    pub constraints: MediaConstraints,
    /// Remote candidates held while no remote description exists
    pub candidate_queue_capacity: usize,
    /// Buffered session events per subscriber
    pub event_channel_capacity: usize,
    /// Upper bound on the `{active: false}` write during teardown
    pub teardown_write_timeout_ms: u64,
    /// Refuse to join records whose status is set and not `accepted`
    pub require_accepted: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig::default()],
            constraints: MediaConstraints::default(),
            candidate_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            event_channel_capacity: 64,
            teardown_write_timeout_ms: 2_000,
            require_accepted: true,
        }
    }
}

impl SessionConfig {
    /// Parse configuration JSON
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or fails validation.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed or validated.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "Loading session config");
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Check ranges and ICE servers
    ///
    /// # Errors
    ///
    /// Returns error for zero capacities or an invalid ICE server.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.candidate_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "candidate_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_channel_capacity must be at least 1".to_string(),
            ));
        }
        if !self.constraints.has_audio() && !self.constraints.has_video() {
            return Err(ConfigError::Invalid(
                "constraints must request audio or video".to_string(),
            ));
        }
        for server in &self.ice_servers {
            server.validate()?;
        }
        Ok(())
    }

    /// Teardown write bound as a duration
    #[must_use]
    pub fn teardown_write_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_write_timeout_ms)
    }
}

//! Local media acquisition
//!
//! A [`MediaSource`] stands in for the platform's capture API. It hands out
//! [`LocalMedia`], a set of [`LocalTrack`]s whose lifetime the call session
//! owns: tracks are attached to the peer transport during setup and stopped
//! on termination.

use crate::types::{MediaConstraints, MediaKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Media-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The user or platform refused access
    #[error("Camera/Mic access denied: {0}")]
    PermissionDenied(String),

    /// No capture device for a requested kind
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Constraints asked for neither audio nor video
    #[error("No audio or video requested")]
    NoTracksRequested,
}

/// Capture device description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDevice {
    /// Device id
    pub id: String,
    /// Human readable name
    pub name: String,
    /// What the device captures
    pub kind: MediaKind,
}

/// A captured local track
///
/// Clones share the same live flag, so stopping any clone stops the track.
#[derive(Debug, Clone)]
pub struct LocalTrack {
    id: String,
    kind: MediaKind,
    label: String,
    live: Arc<AtomicBool>,
}

impl LocalTrack {
    /// Create a live track
    pub fn new(kind: MediaKind, label: impl Into<String>) -> Self {
        Self {
            id: format!("{kind}-{}", Uuid::new_v4()),
            kind,
            label: label.into(),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Track id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Track kind
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Source device label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether capture is still running
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Stop capture; returns `true` if this call stopped it
    pub fn stop(&self) -> bool {
        self.live.swap(false, Ordering::SeqCst)
    }
}

/// Local capture result
#[derive(Debug, Clone, Default)]
pub struct LocalMedia {
    tracks: Vec<LocalTrack>,
}

impl LocalMedia {
    /// Wrap captured tracks
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self { tracks }
    }

    /// Captured tracks
    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// Stop every track; safe to call repeatedly
    pub fn stop_all(&self) -> usize {
        self.tracks.iter().filter(|track| track.stop()).count()
    }

    /// Whether any track is still live
    pub fn any_live(&self) -> bool {
        self.tracks.iter().any(LocalTrack::is_live)
    }
}

/// Source of local audio/video
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire tracks matching the constraints
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia, MediaError>;
}

/// Permission outcome simulated by [`SyntheticMediaSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permission {
    Granted,
    Denied,
}

/// Device-free media source
///
/// Produces live tracks without touching hardware. Used by headless demos and
/// tests; can be configured to refuse permission or to lack a device kind.
#[derive(Debug, Clone)]
pub struct SyntheticMediaSource {
    permission: Permission,
    devices: Vec<MediaDevice>,
}

impl SyntheticMediaSource {
    /// A source with one microphone and one camera, permission granted
    #[must_use]
    pub fn new() -> Self {
        Self {
            permission: Permission::Granted,
            devices: vec![
                MediaDevice {
                    id: "default-audio".to_string(),
                    name: "Default Audio Device".to_string(),
                    kind: MediaKind::Audio,
                },
                MediaDevice {
                    id: "default-video".to_string(),
                    name: "Default Video Device".to_string(),
                    kind: MediaKind::Video,
                },
            ],
        }
    }

    /// A source whose user refuses access
    #[must_use]
    pub fn denying() -> Self {
        Self {
            permission: Permission::Denied,
            ..Self::new()
        }
    }

    /// A source with only the given devices
    #[must_use]
    pub fn with_devices(devices: Vec<MediaDevice>) -> Self {
        Self {
            permission: Permission::Granted,
            devices,
        }
    }

    /// Available devices
    #[must_use]
    pub fn devices(&self) -> &[MediaDevice] {
        &self.devices
    }
}

impl Default for SyntheticMediaSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaSource for SyntheticMediaSource {
    #[tracing::instrument(skip(self))]
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia, MediaError> {
        let kinds = constraints.to_media_kinds();
        if kinds.is_empty() {
            return Err(MediaError::NoTracksRequested);
        }
        if self.permission == Permission::Denied {
            tracing::warn!("Media permission denied");
            return Err(MediaError::PermissionDenied(
                "user refused camera and microphone".to_string(),
            ));
        }

        let mut tracks = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let device = self
                .devices
                .iter()
                .find(|d| d.kind == kind)
                .ok_or_else(|| MediaError::DeviceNotFound(format!("no {kind} device")))?;
            tracks.push(LocalTrack::new(kind, device.name.clone()));
        }

        tracing::debug!(track_count = tracks.len(), "Local media acquired");
        Ok(LocalMedia::new(tracks))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_video_call() {
        let media = SyntheticMediaSource::new()
            .acquire(&MediaConstraints::video_call())
            .await
            .unwrap();
        let kinds: Vec<_> = media.tracks().iter().map(LocalTrack::kind).collect();
        assert_eq!(kinds, vec![MediaKind::Audio, MediaKind::Video]);
        assert!(media.any_live());
    }

    #[tokio::test]
    async fn test_acquire_denied() {
        let err = SyntheticMediaSource::denying()
            .acquire(&MediaConstraints::video_call())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::PermissionDenied(_)));
        assert!(err.to_string().starts_with("Camera/Mic access denied"));
    }

    #[tokio::test]
    async fn test_acquire_missing_device() {
        let source = SyntheticMediaSource::with_devices(vec![MediaDevice {
            id: "mic".to_string(),
            name: "Mic".to_string(),
            kind: MediaKind::Audio,
        }]);
        assert!(source.acquire(&MediaConstraints::audio_only()).await.is_ok());
        assert!(matches!(
            source.acquire(&MediaConstraints::video_call()).await,
            Err(MediaError::DeviceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_acquire_nothing_requested() {
        let constraints = MediaConstraints {
            audio: false,
            video: false,
        };
        assert_eq!(
            SyntheticMediaSource::new().acquire(&constraints).await.unwrap_err(),
            MediaError::NoTracksRequested
        );
    }

    #[test]
    fn test_stop_all_is_idempotent() {
        let track = LocalTrack::new(MediaKind::Audio, "Mic");
        let observer = track.clone();
        let media = LocalMedia::new(vec![track]);
        assert_eq!(media.stop_all(), 1);
        assert_eq!(media.stop_all(), 0);
        assert!(!observer.is_live());
        assert!(!media.any_live());
    }
}

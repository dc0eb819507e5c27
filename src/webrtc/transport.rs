//! Peer transport collaborator contract
//!
//! The orchestrator drives negotiation and track attachment only through
//! these traits. [`super::peer::RtcPeer`] implements them on webrtc-rs.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::config::TransportConfig;
use super::signaling::{IceCandidate, SessionDescription};
use crate::capture::CaptureFormat;
use crate::error::NegotiationError;

/// Identity of an outbound sender, stable across track replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId(pub u32);

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sender#{}", self.0)
    }
}

/// What a new video track is fed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSource {
    pub camera_id: String,
    pub format: CaptureFormat,
}

/// One transport peer; all media it offers is send-only
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Local offer with no inbound audio or video requested
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), NegotiationError>;

    async fn set_remote_answer(&self, sdp: &str) -> Result<(), NegotiationError>;

    /// Remote candidates are accepted in any signaling state
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;

    /// Attach the one video sender
    async fn add_video_track(&self, source: &VideoSource) -> Result<SenderId, NegotiationError>;

    /// Swap in a fresh track on an existing sender
    async fn replace_video_track(
        &self,
        sender: SenderId,
        source: &VideoSource,
    ) -> Result<(), NegotiationError>;

    /// Encoding bitrate ceiling for `sender`
    async fn set_max_bitrate(&self, sender: SenderId, bitrate_bps: u32) -> Result<(), NegotiationError>;

    /// Attach or detach the microphone track; the sender stays in place
    async fn set_audio_enabled(&self, enabled: bool) -> Result<(), NegotiationError>;

    async fn close(&self) -> Result<(), NegotiationError>;
}

/// Builds transport peers
#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Local candidates discovered by the new peer are pushed to `candidates`
    async fn create(
        &self,
        config: &TransportConfig,
        candidates: mpsc::UnboundedSender<IceCandidate>,
    ) -> Result<Arc<dyn PeerTransport>, NegotiationError>;
}

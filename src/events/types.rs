//! System event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

/// System event enumeration
///
/// Serialized as `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    // ============================================================================
    // Signaling Events
    // ============================================================================
    /// Coordination channel changed state
    #[serde(rename = "signaling.state_changed")]
    SignalingStateChanged {
        /// "disconnected", "connecting", "open", "reconnect_scheduled"
        state: String,
        endpoint: String,
    },

    /// A reconnect attempt has been scheduled
    #[serde(rename = "signaling.reconnect_scheduled")]
    ReconnectScheduled { attempt: u32, delay_ms: u64 },

    // ============================================================================
    // Session Events
    // ============================================================================
    /// Negotiation state machine moved
    #[serde(rename = "session.phase_changed")]
    SessionPhaseChanged { from: String, to: String },

    /// A remote config push finished reconciling
    #[serde(rename = "session.config_applied")]
    ConfigApplied {
        camera: Option<String>,
        width: u32,
        height: u32,
        fps: u32,
        bitrate_kbps: u32,
        mic_enabled: bool,
        aspect: String,
    },

    /// Active camera replaced
    #[serde(rename = "session.camera_switched")]
    CameraSwitched {
        from: Option<String>,
        to: String,
    },

    /// Capture operation failed (operator-visible, non-fatal)
    #[serde(rename = "session.capture_failed")]
    CaptureFailed {
        camera: Option<String>,
        reason: String,
    },

    /// Offer/answer or candidate handling failed
    #[serde(rename = "session.negotiation_failed")]
    NegotiationFailed { stage: String, reason: String },

    /// Orientation label sent to the viewer
    #[serde(rename = "session.orientation_changed")]
    OrientationChanged { orientation: String },

    // ============================================================================
    // Controls Events
    // ============================================================================
    /// A staged batch of edits was applied
    #[serde(rename = "controls.committed")]
    ControlsCommitted {
        /// Names of the steps that actually changed something
        steps: Vec<String>,
    },
}

impl SystemEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SignalingStateChanged { .. } => "signaling.state_changed",
            Self::ReconnectScheduled { .. } => "signaling.reconnect_scheduled",
            Self::SessionPhaseChanged { .. } => "session.phase_changed",
            Self::ConfigApplied { .. } => "session.config_applied",
            Self::CameraSwitched { .. } => "session.camera_switched",
            Self::CaptureFailed { .. } => "session.capture_failed",
            Self::NegotiationFailed { .. } => "session.negotiation_failed",
            Self::OrientationChanged { .. } => "session.orientation_changed",
            Self::ControlsCommitted { .. } => "controls.committed",
        }
    }

    /// Check if event matches a topic pattern
    ///
    /// Supports wildcards:
    /// - `*` matches all events
    /// - `session.*` matches all session events
    /// - `signaling.state_changed` matches exact event
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if topic.ends_with(".*") {
            let prefix = topic.trim_end_matches(".*");
            event_name.starts_with(prefix)
        } else {
            event_name == topic
        }
    }
}

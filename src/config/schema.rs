use serde::{Deserialize, Serialize};

use crate::capture::{BackendKind, Facing};
use crate::webrtc::IceServer;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Coordination channel settings
    pub signaling: SignalingConfig,
    /// Capture backend settings
    pub capture: CaptureConfig,
    /// Outbound stream settings
    pub stream: StreamConfig,
    /// Session behavior
    pub session: SessionConfig,
}

/// Coordination channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Last known coordination endpoint (ws:// or wss://)
    pub endpoint: String,
    /// Role announced on every successful open
    pub role: String,
    /// First reconnect delay in milliseconds
    pub base_delay_ms: u64,
    /// Reconnect delay cap in milliseconds
    pub max_delay_ms: u64,
    /// Timeout for a single physical connect attempt
    pub connect_timeout_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8080/ws".to_string(),
            role: "android".to_string(),
            base_delay_ms: 1500,
            max_delay_ms: 30_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Capture backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Which backend enumerates and opens cameras
    pub backend: BackendKind,
    /// Directory scanned for video nodes (V4L2 backend)
    pub device_dir: String,
    /// Cameras exposed by the fixed backend, as `id:facing` pairs
    pub fixed_cameras: Vec<String>,
    /// Camera facing preferred at startup
    pub default_facing: Facing,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::V4l2,
            device_dir: "/dev".to_string(),
            fixed_cameras: vec!["/dev/video0:back".to_string(), "/dev/video1:front".to_string()],
            default_facing: Facing::Back,
        }
    }
}

/// Outbound stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Initial video bitrate in kbps
    pub bitrate_kbps: u32,
    /// Preferred codec name for bitrate injection
    pub codec: String,
    /// Codec tried when the preferred one is not in the offer
    pub fallback_codec: String,
    /// Media stream id for outbound tracks
    pub stream_id: String,
    /// ICE servers used before any remote config arrives
    pub ice_servers: Vec<IceServer>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bitrate_kbps: 6000,
            codec: "H264".to_string(),
            fallback_codec: "VP8".to_string(),
            stream_id: "fieldcam".to_string(),
            ice_servers: vec![IceServer::stun("stun:stun.l.google.com:19302")],
        }
    }
}

/// Session behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Send orientation updates from startup
    pub follow_orientation: bool,
    /// Pause before the single capture-start retry
    pub capture_retry_pause_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            follow_orientation: false,
            capture_retry_pause_ms: 60,
        }
    }
}

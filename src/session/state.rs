//! Applied configuration and negotiation phase

use serde::Serialize;
use std::fmt;

use crate::capture::{AspectClass, CaptureFormat, Facing};
use crate::signaling::Orientation;

pub const MIN_BITRATE_KBPS: u32 = 300;
pub const MAX_BITRATE_KBPS: u32 = 20_000;
pub const DEFAULT_BITRATE_KBPS: u32 = 6000;

/// Clamp a requested bitrate into the supported range
pub fn clamp_bitrate(kbps: i64) -> u32 {
    kbps.clamp(MIN_BITRATE_KBPS as i64, MAX_BITRATE_KBPS as i64) as u32
}

/// Configuration currently in effect on the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedState {
    pub mic_enabled: bool,
    pub active_camera_id: Option<String>,
    pub format: CaptureFormat,
    pub bitrate_kbps: u32,
    pub aspect: AspectClass,
}

impl Default for AppliedState {
    fn default() -> Self {
        Self {
            mic_enabled: false,
            active_camera_id: None,
            format: CaptureFormat::FALLBACK,
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
            aspect: AspectClass::AutoMax,
        }
    }
}

/// Negotiation state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Uninitialized,
    /// Capturing, no offer sent on the current peer
    Initialized,
    /// Offer sent, awaiting answer
    Negotiating,
    Stable,
    Renegotiating,
    Closed,
}

impl SessionPhase {
    pub fn name(&self) -> &'static str {
        match self {
            SessionPhase::Uninitialized => "uninitialized",
            SessionPhase::Initialized => "initialized",
            SessionPhase::Negotiating => "negotiating",
            SessionPhase::Stable => "stable",
            SessionPhase::Renegotiating => "renegotiating",
            SessionPhase::Closed => "closed",
        }
    }

    /// Phase entered when an offer goes out
    pub fn on_offer(self) -> Self {
        match self {
            SessionPhase::Stable | SessionPhase::Renegotiating => SessionPhase::Renegotiating,
            _ => SessionPhase::Negotiating,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Read model of the session for controls and the CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub applied: AppliedState,
    pub phase: SessionPhase,
    pub facing: Option<Facing>,
    pub follow_orientation: bool,
    /// Last reported device orientation
    pub orientation: Orientation,
    pub capturing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_bitrate() {
        assert_eq!(clamp_bitrate(-5), 300);
        assert_eq!(clamp_bitrate(0), 300);
        assert_eq!(clamp_bitrate(4000), 4000);
        assert_eq!(clamp_bitrate(999_999), 20_000);
        assert_eq!(clamp_bitrate(i64::MAX), 20_000);
        assert_eq!(clamp_bitrate(i64::MIN), 300);
    }

    #[test]
    fn test_offer_transitions() {
        assert_eq!(SessionPhase::Initialized.on_offer(), SessionPhase::Negotiating);
        assert_eq!(SessionPhase::Negotiating.on_offer(), SessionPhase::Negotiating);
        assert_eq!(SessionPhase::Stable.on_offer(), SessionPhase::Renegotiating);
        assert_eq!(SessionPhase::Renegotiating.on_offer(), SessionPhase::Renegotiating);
    }
}

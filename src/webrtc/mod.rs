//! WebRTC peer transport
//!
//! ```text
//! CaptureStream (V4L2 frames)
//!        |
//!        v
//! TrackLocalStaticSample (send-only video, optional Opus)
//!        |
//!        v
//! RtcPeer (PeerTransport) <---- offer/answer/ice ----> SignalingChannel
//! ```

pub mod config;
pub mod peer;
pub mod sdp;
pub mod signaling;
pub mod track;
pub mod transport;

pub use config::{IceServer, TransportConfig, VideoCodec};
pub use peer::{RtcPeer, RtcPeerFactory};
pub use sdp::inject_video_bitrate;
pub use signaling::{IceCandidate, SdpKind, SessionDescription};
pub use transport::{PeerFactory, PeerTransport, SenderId, VideoSource};

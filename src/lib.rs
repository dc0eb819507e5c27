//! fieldcam - mobile capture device streaming to a remote viewer
//!
//! A reconnecting signaling channel, a session orchestrator that owns
//! capture and the WebRTC peer connection, and a batch controller for
//! operator edits.

pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod signaling;
pub mod utils;
pub mod webrtc;

pub use error::{AppError, Result};

//! Capture collaborator contracts
//!
//! The orchestrator only ever talks to these traits. Backends differ in how
//! much they can introspect; that difference stays inside each
//! implementation.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::{CameraDescriptor, CaptureFormat};
use crate::error::CaptureError;

/// Which concrete backend is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Full V4L2 introspection of sizes and frame intervals
    #[default]
    V4l2,
    /// Fixed format table for devices that cannot report their modes
    Fixed,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::V4l2 => write!(f, "v4l2"),
            BackendKind::Fixed => write!(f, "fixed"),
        }
    }
}

/// Enumerates cameras and opens capture streams
pub trait CaptureBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// All cameras currently present, labelled, in stable order
    fn enumerate(&self) -> Result<Vec<CameraDescriptor>, CaptureError>;

    /// Flat list of supported modes for one camera (one entry per fps)
    ///
    /// Unknown cameras yield an empty list.
    fn formats_for(&self, camera_id: &str) -> Vec<CaptureFormat>;

    /// `formats_for`, or the fallback format when the camera reports none
    fn formats_or_fallback(&self, camera_id: &str) -> Vec<CaptureFormat> {
        let formats = self.formats_for(camera_id);
        if formats.is_empty() {
            vec![CaptureFormat::FALLBACK]
        } else {
            formats
        }
    }

    /// Bind a new, stopped capture stream to `camera_id`
    fn open(&self, camera_id: &str) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

/// A capture pipeline bound to one camera
pub trait CaptureStream: Send + Sync {
    fn camera_id(&self) -> &str;

    /// Start (or restart) capturing at `format`
    fn start(&mut self, format: CaptureFormat) -> Result<(), CaptureError>;

    /// Stop capturing; stopping a stopped stream is fine
    fn stop(&mut self) -> Result<(), CaptureError>;

    fn is_running(&self) -> bool;

    /// Format of the running capture
    fn format(&self) -> Option<CaptureFormat>;
}

//! Capture backend for cameras that cannot describe their own modes
//!
//! Cameras come from configuration rather than discovery and every camera
//! advertises the same classic format table. Streams are plain V4L2 nodes
//! driven without enumeration ioctls.

use tracing::warn;

use super::backend::{BackendKind, CaptureBackend, CaptureStream};
use super::caps::label_cameras;
use super::types::{CameraDescriptor, CaptureFormat, Facing};
use super::v4l2::V4l2Stream;
use crate::error::CaptureError;

/// Modes assumed for every camera
pub const CLASSIC_FORMATS: [CaptureFormat; 3] = [
    CaptureFormat::new(1920, 1080, 30),
    CaptureFormat::new(1280, 720, 30),
    CaptureFormat::new(640, 480, 30),
];

pub struct FixedBackend {
    cameras: Vec<CameraDescriptor>,
}

impl FixedBackend {
    /// Build from `id:facing` specs, e.g. `/dev/video0:back`
    ///
    /// An entry without a recognizable facing suffix is taken whole as the id
    /// with facing `other`.
    pub fn from_specs<S: AsRef<str>>(specs: &[S]) -> Self {
        let mut cameras: Vec<CameraDescriptor> = specs
            .iter()
            .filter_map(|entry| parse_entry(entry.as_ref()))
            .collect();
        label_cameras(&mut cameras);
        Self { cameras }
    }

    fn known(&self, camera_id: &str) -> bool {
        self.cameras.iter().any(|c| c.id == camera_id)
    }
}

fn parse_entry(entry: &str) -> Option<CameraDescriptor> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }
    let (id, facing) = match entry.rsplit_once(':') {
        Some((id, "back")) => (id, Facing::Back),
        Some((id, "front")) => (id, Facing::Front),
        Some((id, "other")) => (id, Facing::Other),
        _ => (entry, Facing::Other),
    };
    if id.is_empty() {
        warn!("Ignoring camera entry without id: {}", entry);
        return None;
    }
    Some(CameraDescriptor::new(id, facing))
}

impl CaptureBackend for FixedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Fixed
    }

    fn enumerate(&self) -> Result<Vec<CameraDescriptor>, CaptureError> {
        Ok(self.cameras.clone())
    }

    fn formats_for(&self, camera_id: &str) -> Vec<CaptureFormat> {
        if self.known(camera_id) {
            CLASSIC_FORMATS.to_vec()
        } else {
            Vec::new()
        }
    }

    fn open(&self, camera_id: &str) -> Result<Box<dyn CaptureStream>, CaptureError> {
        if !self.known(camera_id) {
            return Err(CaptureError::UnknownCamera(camera_id.to_string()));
        }
        Ok(Box::new(V4l2Stream::new(camera_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specs_and_labels() {
        let backend = FixedBackend::from_specs(&["/dev/video0:back", "/dev/video2:front", "usbcam", ""]);
        let cams = backend.enumerate().unwrap();
        assert_eq!(cams.len(), 3);
        assert_eq!(cams[0].id, "/dev/video0");
        assert_eq!(cams[0].facing, Facing::Back);
        assert_eq!(cams[1].label, "Front 0 (/dev/video2)");
        assert_eq!(cams[2].facing, Facing::Other);
        assert_eq!(backend.kind(), BackendKind::Fixed);
    }

    #[test]
    fn test_formats_only_for_known_cameras() {
        let backend = FixedBackend::from_specs(&["/dev/video0:back"]);
        assert_eq!(backend.formats_for("/dev/video0"), CLASSIC_FORMATS.to_vec());
        assert!(backend.formats_for("/dev/video7").is_empty());
        assert!(matches!(
            backend.open("/dev/video7"),
            Err(CaptureError::UnknownCamera(_))
        ));
    }
}

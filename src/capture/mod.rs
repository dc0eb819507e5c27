//! Capture collaborator: camera enumeration, format model and streams
//!
//! - `types`: formats, aspect classes, camera descriptors
//! - `caps`: canonical capability reports and format selection
//! - `backend`: the `CaptureBackend` / `CaptureStream` contracts
//! - `v4l2`, `fixed`: the two concrete backends
//! - `pool`: backend and stream calls on the blocking pool
//! - `retry`: the bounded retry used around capture start

pub mod backend;
pub mod caps;
pub mod fixed;
pub mod pool;
pub mod retry;
pub mod types;
pub mod v4l2;

pub use backend::{BackendKind, CaptureBackend, CaptureStream};
pub use caps::{
    formats_for_aspect, group_formats, label_cameras, pick_best_for_aspect, pick_camera,
    pick_initial_format, DeviceCapabilities, FormatCaps,
};
pub use fixed::FixedBackend;
pub use pool::{camera_formats, enumerate_cameras, open_stream, run_blocking, stop_stream, SharedStream};
pub use retry::{start_capture, with_bounded_retry};
pub use types::{AspectClass, CameraDescriptor, CaptureFormat, Facing};
pub use v4l2::V4l2Backend;

use crate::config::CaptureConfig;

/// Build the backend selected in configuration
pub fn backend_from_config(config: &CaptureConfig) -> Box<dyn CaptureBackend> {
    match config.backend {
        BackendKind::V4l2 => Box::new(V4l2Backend::new(&config.device_dir)),
        BackendKind::Fixed => Box::new(FixedBackend::from_specs(config.fixed_cameras.as_slice())),
    }
}

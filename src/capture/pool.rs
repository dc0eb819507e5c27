//! Backend calls on tokio's blocking pool
//!
//! Enumeration is a series of ioctls and a stream start waits for the
//! capture thread to report back, so none of it runs on a runtime worker.

use parking_lot::Mutex;
use std::sync::Arc;

use super::backend::{CaptureBackend, CaptureStream};
use super::types::{CameraDescriptor, CaptureFormat};
use crate::error::CaptureError;

/// A stream that can be handed to the blocking pool and back
pub type SharedStream = Arc<Mutex<Box<dyn CaptureStream>>>;

/// Run `f` on the blocking pool
pub async fn run_blocking<T, F>(f: F) -> Result<T, CaptureError>
where
    F: FnOnce() -> Result<T, CaptureError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CaptureError::Io(format!("capture task failed: {}", e)))?
}

pub async fn enumerate_cameras(backend: Arc<dyn CaptureBackend>) -> Result<Vec<CameraDescriptor>, CaptureError> {
    run_blocking(move || backend.enumerate()).await
}

/// Modes of `camera_id`, or the fallback format when it reports none
pub async fn camera_formats(backend: Arc<dyn CaptureBackend>, camera_id: &str) -> Vec<CaptureFormat> {
    let camera_id = camera_id.to_string();
    run_blocking(move || Ok(backend.formats_or_fallback(&camera_id)))
        .await
        .unwrap_or_else(|_| vec![CaptureFormat::FALLBACK])
}

/// Bind a stopped stream to `camera_id`
pub async fn open_stream(backend: Arc<dyn CaptureBackend>, camera_id: &str) -> Result<SharedStream, CaptureError> {
    let camera_id = camera_id.to_string();
    let stream = run_blocking(move || backend.open(&camera_id)).await?;
    Ok(Arc::new(Mutex::new(stream)))
}

pub async fn stop_stream(stream: &SharedStream) -> Result<(), CaptureError> {
    let stream = stream.clone();
    run_blocking(move || {
        let mut stream = stream.lock();
        stream.stop()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FixedBackend;

    #[tokio::test]
    async fn test_enumerate_and_formats_off_runtime() {
        let backend: Arc<dyn CaptureBackend> = Arc::new(FixedBackend::from_specs(&["/dev/video0:back"]));
        let cameras = enumerate_cameras(backend.clone()).await.unwrap();
        assert_eq!(cameras.len(), 1);

        let formats = camera_formats(backend.clone(), "/dev/video0").await;
        assert!(formats.contains(&CaptureFormat::new(1280, 720, 30)));
        assert_eq!(camera_formats(backend, "/dev/missing").await, vec![CaptureFormat::FALLBACK]);
    }

    #[tokio::test]
    async fn test_worker_panic_is_an_error() {
        let result: Result<(), CaptureError> = run_blocking(|| panic!("driver blew up")).await;
        assert!(matches!(result, Err(CaptureError::Io(_))));
    }
}

//! Bounded retry around capture start
//!
//! A start that fails is tried exactly once more after a short pause,
//! never in a loop.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::pool::{run_blocking, SharedStream};
use super::types::CaptureFormat;
use crate::error::CaptureError;

/// Run `op`, and if it fails run it exactly once more after `pause`.
///
/// `op` receives the attempt number (0 or 1).
pub async fn with_bounded_retry<T, E, F, Fut>(what: &str, pause: Duration, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match op(0).await {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!("{} failed ({}), retrying once in {:?}", what, e, pause);
            tokio::time::sleep(pause).await;
            op(1).await
        }
    }
}

/// Start `stream` at `format` on the blocking pool; on failure stop, pause,
/// and start again
pub async fn start_capture(stream: &SharedStream, format: CaptureFormat, pause: Duration) -> Result<(), CaptureError> {
    let what = format!("capture start {} on {}", format, stream.lock().camera_id());
    with_bounded_retry(&what, pause, |attempt| {
        let stream = stream.clone();
        run_blocking(move || {
            let mut stream = stream.lock();
            if attempt > 0 {
                if let Err(e) = stream.stop() {
                    debug!("Stop before retry failed on {}: {}", stream.camera_id(), e);
                }
            }
            stream.start(format)
        })
    })
    .await
}

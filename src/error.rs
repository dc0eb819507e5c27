use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("Session closed")]
    SessionClosed,
}

/// Failures reported by a capture backend or stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("no capture devices available")]
    NoDevices,

    #[error("unknown camera: {0}")]
    UnknownCamera(String),

    #[error("camera busy [{camera}]: {reason}")]
    DeviceBusy { camera: String, reason: String },

    #[error("format {width}x{height}@{fps} rejected by {camera}")]
    FormatRejected {
        camera: String,
        width: u32,
        height: u32,
        fps: u32,
    },

    #[error("capture io failure: {0}")]
    Io(String),
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        match err.raw_os_error() {
            // EBUSY
            Some(16) => CaptureError::DeviceBusy {
                camera: String::new(),
                reason: err.to_string(),
            },
            _ => CaptureError::Io(err.to_string()),
        }
    }
}

/// Failures reported by the peer transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("no transport peer")]
    NoPeer,

    #[error("offer creation failed: {0}")]
    OfferFailed(String),

    #[error("description rejected: {0}")]
    DescriptionRejected(String),

    #[error("candidate rejected: {0}")]
    CandidateRejected(String),

    #[error("track operation failed: {0}")]
    Track(String),

    #[error("not supported by transport: {0}")]
    Unsupported(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ebusy_maps_to_device_busy() {
        let err = std::io::Error::from_raw_os_error(16);
        assert!(matches!(
            CaptureError::from(err),
            CaptureError::DeviceBusy { .. }
        ));
    }

    #[test]
    fn test_sub_errors_convert() {
        let err: AppError = CaptureError::UnknownCamera("cam9".into()).into();
        assert_eq!(err.to_string(), "Capture error: unknown camera: cam9");

        let err: AppError = NegotiationError::NoPeer.into();
        assert!(matches!(err, AppError::Negotiation(NegotiationError::NoPeer)));
    }
}

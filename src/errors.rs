use std::time::Duration;
use thiserror::Error;

/// Capture source failures.
///
/// An error from `open` or `start` is fatal to the process: there is no
/// fallback camera to serve sessions from.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("Camera initialization error: {0}")]
    InitializationError(String),
    #[error("Capture error: {0}")]
    CaptureError(String),
    #[error("Stream error: {0}")]
    StreamError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Capture source has not been started")]
    NotStarted,
}

/// Frame hub failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("capture source is closed")]
    SourceClosed,
}

/// Socket session termination reasons.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("write to peer failed: {0}")]
    WriteFailed(String),
}

/// Control passthrough failures. Each one ends the gamepad session.
#[derive(Debug, Error)]
pub enum GamepadError {
    #[error("control device unavailable: {0}")]
    DeviceUnavailable(#[source] std::io::Error),
    #[error("invalid report: {0}")]
    InvalidReport(String),
    #[error("write to control device failed: {0}")]
    WriteFailed(#[source] std::io::Error),
}

/// Negotiation session failures.
///
/// Every variant is confined to the session that produced it.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("invalid offer: {0}")]
    MalformedOffer(String),
    #[error("session already negotiated; renegotiation is not supported")]
    RenegotiationRejected,
    #[error("operation requires state {expected}, session is {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("capture format {0} cannot be carried on a peer connection")]
    UnsupportedCodec(String),
    #[error("peer connection error: {0}")]
    PeerConnection(String),
    #[error("candidate gathering did not complete within {0:?}")]
    GatheringTimeout(Duration),
    #[error(transparent)]
    SourceClosed(#[from] HubError),
}

impl NegotiationError {
    /// True when the caller sent something unacceptable, as opposed to a
    /// failure on the server side.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            NegotiationError::MalformedOffer(_) | NegotiationError::RenegotiationRejected
        )
    }
}

impl From<webrtc::Error> for NegotiationError {
    fn from(err: webrtc::Error) -> Self {
        NegotiationError::PeerConnection(err.to_string())
    }
}

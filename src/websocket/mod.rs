//! Socket transports: the paced frame stream and the control passthrough.

pub mod gamepad;
pub mod stream;

pub use stream::{SessionSummary, StreamOutcome, StreamingSession};

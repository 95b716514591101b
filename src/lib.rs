//! Gameview: live camera streaming over WebSocket and WebRTC.
//!
//! One capture source feeds a broadcast hub; every viewer gets its own bounded
//! queue so a slow connection only hurts itself.
//!
//! ```text
//! CaptureSource --pump--> FrameHub --+--> StreamingSession   (GET /stream)
//!                                    +--> NegotiationSession (POST /offer)
//! ```
//!
//! # Usage
//! ```rust,no_run
//! use gameview::config::GameviewConfig;
//! use gameview::testing::SyntheticDevice;
//! use gameview::{CaptureSource, FrameHub};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = GameviewConfig::default();
//! let source = Arc::new(CaptureSource::new(
//!     Box::new(SyntheticDevice::new()),
//!     config.camera.capture_format(),
//! ));
//! source.open()?;
//! source.start()?;
//!
//! let hub = FrameHub::new();
//! let _pump = hub.spawn_pump(source)?;
//! let subscription = hub.subscribe()?;
//! while let Some(frame) = subscription.recv().await {
//!     println!("frame {} ({} bytes)", frame.sequence, frame.len());
//! }
//! # Ok(())
//! # }
//! ```
pub mod config;
pub mod errors;
pub mod hub;
pub mod platform;
pub mod server;
pub mod testing;
pub mod timing;
pub mod types;
pub mod webrtc;
pub mod websocket;

// Re-exports for convenience
pub use errors::{CameraError, GamepadError, HubError, NegotiationError, StreamError};
pub use hub::{FrameHub, HubStats, PumpHandle, SubscriberId, Subscription};
pub use platform::{CaptureDevice, CaptureSource, SourceState};
pub use types::{CameraFormat, Frame, PixelFormat};
pub use webrtc::{NegotiationSession, NegotiationState};
pub use websocket::StreamingSession;

/// Initialize logging, defaulting to `gameview=info`.
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "gameview=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "gameview");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
    }
}

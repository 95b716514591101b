//! Capture source: the single owner of the camera device.
//!
//! A [`CaptureDevice`] is the raw backend (V4L2 on Linux, or the synthetic
//! source from [`crate::testing`]). [`CaptureSource`] wraps exactly one device
//! and adds the open/start barrier, end-of-stream handling and frame metadata.

#[cfg(target_os = "linux")]
pub mod linux;

use crate::errors::CameraError;
use crate::timing::PTSClock;
use crate::types::{CameraFormat, Frame};
use bytes::Bytes;
use std::sync::{Mutex, MutexGuard};

/// Backend that yields encoded buffers from hardware.
///
/// Calls are serialised by [`CaptureSource`]; implementations never see
/// concurrent use.
pub trait CaptureDevice: Send {
    /// Acquire the device and apply the requested format.
    fn open(&mut self, format: &CameraFormat) -> Result<(), CameraError>;

    /// Begin streaming.
    fn start(&mut self) -> Result<(), CameraError>;

    /// Block until the next buffer is available.
    ///
    /// `Ok(None)` means the device will never produce another buffer.
    fn read_frame(&mut self) -> Result<Option<Bytes>, CameraError>;

    /// Stop streaming and release the device.
    fn stop(&mut self) -> Result<(), CameraError>;

    /// Human readable device name for logs.
    fn name(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Created,
    Opened,
    Started,
    Closed,
}

struct Inner {
    device: Box<dyn CaptureDevice>,
    state: SourceState,
    next_sequence: u64,
}

/// The process-wide capture source.
///
/// Constructed once at startup and handed to the frame hub. `open` and
/// `start` are idempotent: repeated or concurrent calls after the first
/// successful one return `Ok(())` without touching the device again.
pub struct CaptureSource {
    inner: Mutex<Inner>,
    format: CameraFormat,
    clock: PTSClock,
}

impl CaptureSource {
    pub fn new(device: Box<dyn CaptureDevice>, format: CameraFormat) -> Self {
        Self {
            inner: Mutex::new(Inner {
                device,
                state: SourceState::Created,
                next_sequence: 1,
            }),
            format,
            clock: PTSClock::new(),
        }
    }

    pub fn format(&self) -> &CameraFormat {
        &self.format
    }

    pub fn state(&self) -> SourceState {
        self.lock().state
    }

    pub fn open(&self) -> Result<(), CameraError> {
        let mut inner = self.lock();
        match inner.state {
            SourceState::Created => {}
            SourceState::Opened | SourceState::Started => return Ok(()),
            SourceState::Closed => {
                return Err(CameraError::InitializationError(
                    "capture source was closed".to_string(),
                ))
            }
        }

        inner.device.open(&self.format)?;
        inner.state = SourceState::Opened;
        log::info!(
            "Opened {} at {}x{} {} {} fps",
            inner.device.name(),
            self.format.width,
            self.format.height,
            self.format.pixel_format,
            self.format.fps
        );
        Ok(())
    }

    pub fn start(&self) -> Result<(), CameraError> {
        let mut inner = self.lock();
        match inner.state {
            SourceState::Opened => {}
            SourceState::Started => return Ok(()),
            SourceState::Created => {
                return Err(CameraError::InitializationError(
                    "capture source must be opened before start".to_string(),
                ))
            }
            SourceState::Closed => {
                return Err(CameraError::InitializationError(
                    "capture source was closed".to_string(),
                ))
            }
        }

        inner.device.start()?;
        inner.state = SourceState::Started;
        log::info!("Camera started: {}", inner.device.name());
        Ok(())
    }

    /// Block until the next frame is available.
    ///
    /// Returns `Ok(None)` once the source is closed or the device is
    /// exhausted. Empty buffers are skipped.
    pub fn next_frame(&self) -> Result<Option<Frame>, CameraError> {
        let mut inner = self.lock();
        loop {
            match inner.state {
                SourceState::Started => {}
                SourceState::Closed => return Ok(None),
                SourceState::Created | SourceState::Opened => return Err(CameraError::NotStarted),
            }

            let data = match inner.device.read_frame()? {
                Some(data) => data,
                None => {
                    log::info!("{} reached end of stream", inner.device.name());
                    Self::shutdown(&mut inner);
                    return Ok(None);
                }
            };
            if data.is_empty() {
                continue;
            }

            let sequence = inner.next_sequence;
            inner.next_sequence = inner.next_sequence.saturating_add(1);
            return Ok(Some(Frame {
                sequence,
                timestamp_us: self.clock.micros(),
                captured_at: chrono::Utc::now(),
                data,
            }));
        }
    }

    /// Stop the device and mark the source closed. Idempotent.
    ///
    /// Waits for an in-flight `next_frame` to return, which takes at most one
    /// frame interval on a healthy device.
    pub fn close(&self) {
        let mut inner = self.lock();
        Self::shutdown(&mut inner);
    }

    fn shutdown(inner: &mut Inner) {
        if inner.state == SourceState::Closed {
            return;
        }
        if inner.state != SourceState::Created {
            if let Err(e) = inner.device.stop() {
                log::warn!("Failed to stop {}: {}", inner.device.name(), e);
            }
        }
        inner.state = SourceState::Closed;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Build the hardware backend for this platform.
#[cfg(target_os = "linux")]
pub fn default_device(path: &std::path::Path, buffers: u32) -> Box<dyn CaptureDevice> {
    Box::new(linux::V4l2Device::new(path, buffers))
}

#[cfg(not(target_os = "linux"))]
pub fn default_device(_path: &std::path::Path, _buffers: u32) -> Box<dyn CaptureDevice> {
    Box::new(UnsupportedDevice)
}

#[cfg(not(target_os = "linux"))]
struct UnsupportedDevice;

#[cfg(not(target_os = "linux"))]
impl CaptureDevice for UnsupportedDevice {
    fn open(&mut self, _format: &CameraFormat) -> Result<(), CameraError> {
        Err(CameraError::InitializationError(
            "V4L2 capture is only available on Linux; use --synthetic".to_string(),
        ))
    }

    fn start(&mut self) -> Result<(), CameraError> {
        Err(CameraError::NotStarted)
    }

    fn read_frame(&mut self) -> Result<Option<Bytes>, CameraError> {
        Ok(None)
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        Ok(())
    }

    fn name(&self) -> String {
        "unsupported".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SyntheticDevice;
    use crate::types::PixelFormat;

    fn source(frames: Vec<&'static [u8]>) -> CaptureSource {
        let device = SyntheticDevice::scripted(frames.into_iter().map(Bytes::from_static).collect());
        CaptureSource::new(Box::new(device), CameraFormat::hd(PixelFormat::Mjpeg))
    }

    #[test]
    fn test_next_frame_requires_start() {
        let source = source(vec![b"a"]);
        assert!(matches!(source.next_frame(), Err(CameraError::NotStarted)));
        source.open().unwrap();
        assert!(matches!(source.next_frame(), Err(CameraError::NotStarted)));
    }

    #[test]
    fn test_start_requires_open() {
        let source = source(vec![b"a"]);
        assert!(source.start().is_err());
        assert_eq!(source.state(), SourceState::Created);
    }

    #[test]
    fn test_frames_carry_increasing_sequence() {
        let source = source(vec![b"a", b"b", b"c"]);
        source.open().unwrap();
        source.start().unwrap();

        let sequences: Vec<u64> = std::iter::from_fn(|| source.next_frame().unwrap())
            .map(|f| f.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(source.state(), SourceState::Closed);
    }

    #[test]
    fn test_empty_buffers_are_skipped() {
        let source = source(vec![b"", b"x", b""]);
        source.open().unwrap();
        source.start().unwrap();

        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.data, Bytes::from_static(b"x"));
        assert_eq!(frame.sequence, 1);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_close_signals_end_of_stream() {
        let source = source(vec![b"a", b"b"]);
        source.open().unwrap();
        source.start().unwrap();
        source.close();
        source.close();
        assert!(source.next_frame().unwrap().is_none());
        assert!(source.open().is_err());
    }
}

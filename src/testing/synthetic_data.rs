//! Synthetic capture backend
//!
//! Produces frames shaped like real device output so the whole server can run
//! without a camera: MJPEG buffers framed by SOI/EOI markers, or H.264 access
//! units in Annex-B form. Used by `--synthetic` and by the test suite.

use crate::errors::CameraError;
use crate::platform::CaptureDevice;
use crate::types::{CameraFormat, PixelFormat};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Build a synthetic encoded frame for the given format.
///
/// The payload embeds the frame number so consecutive frames differ.
pub fn synthetic_frame(format: PixelFormat, frame_number: u64, payload_len: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload_len + 16);
    match format {
        PixelFormat::Mjpeg => {
            buf.put_slice(&[0xFF, 0xD8]);
            buf.put_u64(frame_number);
            fill_pattern(&mut buf, frame_number, payload_len);
            buf.put_slice(&[0xFF, 0xD9]);
        }
        PixelFormat::H264 => {
            // IDR slice every 30 frames, non-IDR otherwise.
            let nal_header = if frame_number % 30 == 0 { 0x65 } else { 0x41 };
            buf.put_slice(&[0, 0, 0, 1, nal_header]);
            buf.put_u64(frame_number);
            fill_pattern(&mut buf, frame_number, payload_len);
        }
    }
    buf.freeze()
}

fn fill_pattern(buf: &mut BytesMut, frame_number: u64, len: usize) {
    let base = (frame_number % 251) as u8;
    for i in 0..len {
        // Avoid emitting 0xFF so the MJPEG markers stay unambiguous.
        buf.put_u8(base.wrapping_add(i as u8) % 0xFF);
    }
}

enum Mode {
    /// Replay fixed buffers back to back, then end the stream.
    Scripted(VecDeque<Bytes>),
    /// Generate frames at the configured rate.
    Generated {
        limit: Option<u64>,
        produced: u64,
        next_due: Option<Instant>,
    },
}

/// Capture backend that never touches hardware.
pub struct SyntheticDevice {
    mode: Mode,
    format: Option<CameraFormat>,
    payload_len: usize,
    fail_after: Option<u64>,
    delivered: u64,
    streaming: bool,
    opens: Arc<AtomicUsize>,
}

impl SyntheticDevice {
    /// Endless stream paced at the configured frame rate.
    pub fn new() -> Self {
        Self::with_mode(Mode::Generated {
            limit: None,
            produced: 0,
            next_due: None,
        })
    }

    /// Stream that ends after `count` generated frames.
    pub fn limited(count: u64) -> Self {
        Self::with_mode(Mode::Generated {
            limit: Some(count),
            produced: 0,
            next_due: None,
        })
    }

    /// Replays `frames` as fast as they are requested, then ends the stream.
    pub fn scripted(frames: Vec<Bytes>) -> Self {
        Self::with_mode(Mode::Scripted(frames.into()))
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            format: None,
            payload_len: 1024,
            fail_after: None,
            delivered: 0,
            streaming: false,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Size of the generated payload in bytes.
    pub fn with_payload_len(mut self, len: usize) -> Self {
        self.payload_len = len;
        self
    }

    /// Report a capture error after `frames` buffers have been delivered.
    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Shared counter of how many times the device was opened.
    pub fn open_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opens)
    }
}

impl Default for SyntheticDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDevice for SyntheticDevice {
    fn open(&mut self, format: &CameraFormat) -> Result<(), CameraError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.format = Some(format.clone());
        Ok(())
    }

    fn start(&mut self) -> Result<(), CameraError> {
        if self.format.is_none() {
            return Err(CameraError::InitializationError(
                "synthetic device not opened".to_string(),
            ));
        }
        self.streaming = true;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Bytes>, CameraError> {
        if !self.streaming {
            return Ok(None);
        }
        if self.fail_after.is_some_and(|n| self.delivered >= n) {
            return Err(CameraError::CaptureError("synthetic device failure".to_string()));
        }

        let format = match &self.format {
            Some(format) => format.clone(),
            None => return Ok(None),
        };
        let payload_len = self.payload_len;

        let data = match &mut self.mode {
            Mode::Scripted(frames) => frames.pop_front(),
            Mode::Generated {
                limit,
                produced,
                next_due,
            } => {
                if limit.is_some_and(|l| *produced >= l) {
                    None
                } else {
                    let interval: Duration = format.frame_interval();
                    let now = Instant::now();
                    let due = next_due.unwrap_or(now);
                    if due > now {
                        std::thread::sleep(due - now);
                    }
                    *next_due = Some(due.max(now) + interval);
                    let frame = synthetic_frame(format.pixel_format, *produced, payload_len);
                    *produced += 1;
                    Some(frame)
                }
            }
        };

        if data.is_some() {
            self.delivered += 1;
        }
        Ok(data)
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        self.streaming = false;
        Ok(())
    }

    fn name(&self) -> String {
        "synthetic".to_string()
    }
}

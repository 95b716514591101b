use crate::errors::CameraError;
use crate::platform::CaptureDevice;
use crate::types::CameraFormat;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::Duration;
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

/// How long a dequeue may block before the device is considered stalled.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// V4L2 capture device using memory-mapped streaming I/O.
pub struct V4l2Device {
    path: PathBuf,
    buffers: u32,
    device: Option<Device>,
    stream: Option<MmapStream<'static>>,
    card: Option<String>,
}

impl V4l2Device {
    pub fn new(path: impl AsRef<Path>, buffers: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            buffers: buffers.max(1),
            device: None,
            stream: None,
            card: None,
        }
    }

    /// Path of the device node this backend reads from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CaptureDevice for V4l2Device {
    fn open(&mut self, format: &CameraFormat) -> Result<(), CameraError> {
        let device = Device::with_path(&self.path).map_err(|e| {
            CameraError::InitializationError(format!(
                "failed to open device {}: {}",
                self.path.display(),
                e
            ))
        })?;

        if let Ok(caps) = device.query_caps() {
            self.card = Some(caps.card);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::InitializationError(format!("failed to read device format: {}", e))
        })?;
        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = FourCC::new(&format.pixel_format.fourcc());

        let applied = device.set_format(&fmt).map_err(|e| {
            CameraError::InitializationError(format!("failed to set device format: {}", e))
        })?;
        if applied.fourcc != fmt.fourcc {
            return Err(CameraError::InitializationError(format!(
                "device {} does not support {} output (driver chose {})",
                self.path.display(),
                format.pixel_format,
                applied.fourcc
            )));
        }
        if applied.width != format.width || applied.height != format.height {
            log::warn!(
                "Requested {}x{}, driver chose {}x{}",
                format.width,
                format.height,
                applied.width,
                applied.height
            );
        }

        if let Err(e) = device.set_params(&Parameters::with_fps(format.fps)) {
            log::warn!("Failed to set frame rate {} fps: {}", format.fps, e);
        }

        self.device = Some(device);
        Ok(())
    }

    fn start(&mut self) -> Result<(), CameraError> {
        let device = self.device.as_ref().ok_or_else(|| {
            CameraError::InitializationError("device must be opened before start".to_string())
        })?;

        let mut stream = MmapStream::with_buffers(device, Type::VideoCapture, self.buffers)
            .map_err(|e| {
                CameraError::InitializationError(format!("failed to start stream: {}", e))
            })?;
        stream.set_timeout(DEQUEUE_TIMEOUT);
        self.stream = Some(stream);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Bytes>, CameraError> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Ok(None),
        };

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureError(format!("failed to dequeue buffer: {}", e)))?;
        let used = (meta.bytesused as usize).min(buf.len());
        Ok(Some(Bytes::copy_from_slice(&buf[..used])))
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        // Dropping the stream turns streaming off and unmaps the buffers.
        self.stream = None;
        self.device = None;
        Ok(())
    }

    fn name(&self) -> String {
        match &self.card {
            Some(card) => format!("{} ({})", card, self.path.display()),
            None => self.path.display().to_string(),
        }
    }
}

// The mmap arena is only touched through `&mut self`, serialised by CaptureSource.
unsafe impl Send for V4l2Device {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelFormat;

    #[test]
    fn test_missing_device_fails_to_open() {
        let mut device = V4l2Device::new("/dev/gameview-does-not-exist", 4);
        let result = device.open(&CameraFormat::hd(PixelFormat::Mjpeg));
        assert!(matches!(result, Err(CameraError::InitializationError(_))));
    }

    #[test]
    fn test_start_before_open_fails() {
        let mut device = V4l2Device::new("/dev/video0", 4);
        assert!(device.start().is_err());
        assert!(device.read_frame().unwrap().is_none());
    }
}

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Encoded output format requested from the capture device.
///
/// Frames are forwarded without transcoding, so this is also the format every
/// viewer receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Mjpeg,
    H264,
}

impl PixelFormat {
    /// V4L2 fourcc code for this format.
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            PixelFormat::Mjpeg => *b"MJPG",
            PixelFormat::H264 => *b"H264",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Mjpeg => "MJPEG",
            PixelFormat::H264 => "H264",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mjpeg" | "mjpg" => Ok(PixelFormat::Mjpeg),
            "h264" => Ok(PixelFormat::H264),
            other => Err(format!("unknown pixel format: {other}")),
        }
    }
}

/// Resolution, format and rate the device is configured with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub pixel_format: PixelFormat,
}

impl CameraFormat {
    pub fn new(width: u32, height: u32, fps: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            fps,
            pixel_format,
        }
    }

    /// 1280x720 at 30 fps, the resolution the server has always shipped with.
    pub fn hd(pixel_format: PixelFormat) -> Self {
        Self::new(1280, 720, 30, pixel_format)
    }

    /// Nominal time between two frames at the configured rate.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

/// One encoded image produced by the capture source.
///
/// Cloning is cheap: the payload is reference counted and never mutated, so
/// every subscriber shares the same buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Monotonically increasing, starting at 1 for the first frame.
    pub sequence: u64,
    /// Microseconds since the capture source was created.
    pub timestamp_us: u64,
    pub captured_at: DateTime<Utc>,
    pub data: Bytes,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_parsing() {
        assert_eq!("mjpeg".parse::<PixelFormat>(), Ok(PixelFormat::Mjpeg));
        assert_eq!("MJPG".parse::<PixelFormat>(), Ok(PixelFormat::Mjpeg));
        assert_eq!("H264".parse::<PixelFormat>(), Ok(PixelFormat::H264));
        assert!("yuyv".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn test_fourcc() {
        assert_eq!(&PixelFormat::Mjpeg.fourcc(), b"MJPG");
        assert_eq!(&PixelFormat::H264.fourcc(), b"H264");
    }

    #[test]
    fn test_frame_interval() {
        let format = CameraFormat::hd(PixelFormat::Mjpeg);
        assert_eq!(format.frame_interval(), Duration::from_nanos(33_333_333));
    }

    #[test]
    fn test_pixel_format_serde_lowercase() {
        let json = serde_json::to_string(&PixelFormat::H264).unwrap();
        assert_eq!(json, "\"h264\"");
    }
}

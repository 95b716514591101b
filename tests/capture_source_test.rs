//! Capture source lifecycle: open/start barrier, frame metadata, end-of-stream.

use bytes::Bytes;
use gameview::testing::SyntheticDevice;
use gameview::types::{CameraFormat, PixelFormat};
use gameview::{CameraError, CaptureSource, SourceState};
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn format() -> CameraFormat {
    CameraFormat::new(320, 240, 240, PixelFormat::Mjpeg)
}

#[test]
fn test_concurrent_first_open_opens_device_once() {
    let device = SyntheticDevice::limited(1);
    let opens = device.open_counter();
    let source = Arc::new(CaptureSource::new(Box::new(device), format()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let source = Arc::clone(&source);
            std::thread::spawn(move || {
                source.open()?;
                source.start()
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert_eq!(source.state(), SourceState::Started);
}

#[test]
fn test_frames_carry_increasing_sequence_and_timestamps() {
    let device = SyntheticDevice::limited(3).with_payload_len(16);
    let source = CaptureSource::new(Box::new(device), format());
    source.open().unwrap();
    source.start().unwrap();

    let frames: Vec<_> = std::iter::from_fn(|| source.next_frame().unwrap()).collect();
    assert_eq!(frames.len(), 3);
    assert_eq!(
        frames.iter().map(|f| f.sequence).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(frames.windows(2).all(|w| w[0].timestamp_us <= w[1].timestamp_us));
    assert_eq!(source.state(), SourceState::Closed);
}

#[test]
fn test_empty_buffers_are_skipped() {
    let device = SyntheticDevice::scripted(vec![
        Bytes::from_static(b"one"),
        Bytes::new(),
        Bytes::from_static(b"two"),
    ]);
    let source = CaptureSource::new(Box::new(device), format());
    source.open().unwrap();
    source.start().unwrap();

    let first = source.next_frame().unwrap().unwrap();
    let second = source.next_frame().unwrap().unwrap();
    assert_eq!(first.data, Bytes::from_static(b"one"));
    assert_eq!(second.data, Bytes::from_static(b"two"));
    assert_eq!(second.sequence, 2);
    assert!(source.next_frame().unwrap().is_none());
}

#[test]
fn test_next_frame_before_start_fails() {
    let source = CaptureSource::new(Box::new(SyntheticDevice::new()), format());
    assert!(matches!(source.next_frame(), Err(CameraError::NotStarted)));
    source.open().unwrap();
    assert!(matches!(source.next_frame(), Err(CameraError::NotStarted)));
}

#[test]
fn test_device_error_is_reported() {
    let device = SyntheticDevice::limited(10).failing_after(2);
    let source = CaptureSource::new(Box::new(device), format());
    source.open().unwrap();
    source.start().unwrap();

    assert!(source.next_frame().unwrap().is_some());
    assert!(source.next_frame().unwrap().is_some());
    assert!(matches!(source.next_frame(), Err(CameraError::CaptureError(_))));
}

#[test]
fn test_closed_source_cannot_reopen() {
    let source = CaptureSource::new(Box::new(SyntheticDevice::new()), format());
    source.open().unwrap();
    source.start().unwrap();
    source.close();
    source.close();

    assert_eq!(source.state(), SourceState::Closed);
    assert!(source.next_frame().unwrap().is_none());
    assert!(matches!(
        source.open(),
        Err(CameraError::InitializationError(_))
    ));
}

//! Control report passthrough into a device file.

use axum::extract::ws::Message;
use gameview::websocket::gamepad::{forward_reports, open_device};
use gameview::GamepadError;

#[tokio::test]
async fn test_reports_reach_device_file() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let device = open_device(file.path()).await.unwrap();

    let inbound = futures::stream::iter(vec![
        Ok::<_, axum::Error>(Message::Text("[1,2,3,4]".into())),
        Ok(Message::Binary(b"[5,6]".to_vec().into())),
    ]);
    let forwarded = forward_reports(inbound, device).await.unwrap();

    assert_eq!(forwarded, 2);
    assert_eq!(std::fs::read(file.path()).unwrap(), vec![1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn test_missing_device_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = open_device(&dir.path().join("hidg9")).await.unwrap_err();
    assert!(matches!(err, GamepadError::DeviceUnavailable(_)));
}

#[tokio::test]
async fn test_out_of_range_byte_ends_session() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let device = open_device(file.path()).await.unwrap();

    let inbound = futures::stream::iter(vec![
        Ok::<_, axum::Error>(Message::Text("[7]".into())),
        Ok(Message::Text("[300]".into())),
    ]);
    let err = forward_reports(inbound, device).await.unwrap_err();

    assert!(matches!(err, GamepadError::InvalidReport(_)));
    assert_eq!(std::fs::read(file.path()).unwrap(), vec![7]);
}

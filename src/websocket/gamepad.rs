//! Control report passthrough.
//!
//! Each inbound text or binary message is a JSON array of bytes, for example
//! `[1, 0, 128, 128]`. The decoded bytes are written to the control device as
//! a single report, unchanged. Nothing is sent back to the client.

use crate::errors::GamepadError;
use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Decode one control report.
pub fn decode_report(payload: &[u8]) -> Result<Vec<u8>, GamepadError> {
    serde_json::from_slice(payload).map_err(|e| GamepadError::InvalidReport(e.to_string()))
}

/// Open the control device. HID gadget nodes are opened read/write.
pub async fn open_device(path: &Path) -> Result<tokio::fs::File, GamepadError> {
    tokio::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .await
        .map_err(GamepadError::DeviceUnavailable)
}

/// Forward reports until the client closes. Returns the number of reports
/// written; a malformed report or a failed write ends the session with an
/// error.
pub async fn forward_reports<R, E, W>(mut inbound: R, mut device: W) -> Result<u64, GamepadError>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    W: AsyncWrite + Unpin,
{
    let mut forwarded = 0u64;
    while let Some(message) = inbound.next().await {
        let report = match message {
            Ok(Message::Text(text)) => decode_report(text.as_str().as_bytes())?,
            Ok(Message::Binary(data)) => decode_report(&data)?,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                log::debug!("Gamepad socket read error: {}", e);
                break;
            }
        };
        device
            .write_all(&report)
            .await
            .map_err(GamepadError::WriteFailed)?;
        device.flush().await.map_err(GamepadError::WriteFailed)?;
        forwarded += 1;
    }
    Ok(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_report() {
        assert_eq!(decode_report(b"[1,2,255]").unwrap(), vec![1, 2, 255]);
        assert!(decode_report(b"[256]").is_err());
        assert!(decode_report(b"{\"a\":1}").is_err());
    }

    #[tokio::test]
    async fn test_reports_are_written_verbatim() {
        let inbound = futures::stream::iter(vec![
            Ok::<_, String>(Message::Text("[1,0,128]".into())),
            Ok(Message::Ping(Default::default())),
            Ok(Message::Text("[2]".into())),
            Ok(Message::Close(None)),
            Ok(Message::Text("[9]".into())),
        ]);
        let mut device = Vec::new();
        let forwarded = forward_reports(inbound, &mut device).await.unwrap();
        assert_eq!(forwarded, 2);
        assert_eq!(device, vec![1, 0, 128, 2]);
    }

    #[tokio::test]
    async fn test_malformed_report_ends_session() {
        let inbound = futures::stream::iter(vec![
            Ok::<_, String>(Message::Text("[3]".into())),
            Ok(Message::Text("not json".into())),
            Ok(Message::Text("[4]".into())),
        ]);
        let mut device = Vec::new();
        let err = forward_reports(inbound, &mut device).await.unwrap_err();
        assert!(matches!(err, GamepadError::InvalidReport(_)));
        assert_eq!(device, vec![3]);
    }
}

use crate::errors::StreamError;
use crate::hub::{SubscriberId, Subscription};
use crate::timing::Pacer;
use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use std::fmt::Display;

/// Why a streaming session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamOutcome {
    /// The capture source reached end-of-stream.
    SourceClosed,
    /// The viewer sent a close frame or went away.
    PeerClosed,
    /// A frame could not be written to the viewer.
    WriteFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub outcome: StreamOutcome,
    pub frames_sent: u64,
    pub frames_dropped: u64,
}

/// Forwards hub frames to one socket viewer, one binary message per frame.
///
/// Output is rate limited by the session's own [`Pacer`], so a viewer that
/// asks for fewer frames than the camera produces only affects itself: its
/// queue fills and the oldest frames are dropped.
pub struct StreamingSession {
    subscription: Subscription,
    pacer: Pacer,
}

impl StreamingSession {
    pub fn new(subscription: Subscription, target_fps: u32) -> Self {
        Self::with_pacer(subscription, Pacer::with_fps(target_fps))
    }

    pub fn with_pacer(subscription: Subscription, pacer: Pacer) -> Self {
        Self {
            subscription,
            pacer,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.subscription.id()
    }

    /// Run until the source ends, the viewer closes or a write fails.
    ///
    /// The subscription is released when this returns. Inbound data messages
    /// are ignored; the channel is push-only.
    pub async fn run<S, R, E>(mut self, mut outbound: S, mut inbound: R) -> SessionSummary
    where
        S: Sink<Message> + Unpin,
        S::Error: Display,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let id = self.subscription.id();
        let mut frames_sent = 0u64;
        log::info!("Streaming session {} started ({:?} per frame)", id, self.pacer.period());

        let outcome = loop {
            tokio::select! {
                message = inbound.next() => match message {
                    None | Some(Ok(Message::Close(_))) => break StreamOutcome::PeerClosed,
                    Some(Err(e)) => {
                        log::debug!("Streaming session {} read error: {}", id, e);
                        break StreamOutcome::PeerClosed;
                    }
                    Some(Ok(_)) => {}
                },
                frame = self.subscription.recv() => {
                    let Some(frame) = frame else {
                        break StreamOutcome::SourceClosed;
                    };
                    self.pacer.wait().await;
                    if let Err(e) = outbound.send(Message::Binary(frame.data)).await {
                        let err = StreamError::WriteFailed(e.to_string());
                        log::warn!("Streaming session {}: {}", id, err);
                        break StreamOutcome::WriteFailed;
                    }
                    frames_sent += 1;
                }
            }
        };

        let frames_dropped = self.subscription.dropped();
        drop(self.subscription);
        if outcome == StreamOutcome::SourceClosed {
            let _ = outbound.send(Message::Close(None)).await;
        }
        log::info!(
            "Streaming session {} ended: {:?}, {} frames sent, {} dropped",
            id,
            outcome,
            frames_sent,
            frames_dropped
        );

        SessionSummary {
            outcome,
            frames_sent,
            frames_dropped,
        }
    }
}

//! Offer/answer state machine for one peer-connection viewer.
//!
//! ```text
//! Created -> OfferReceived -> LocalDescriptionSet -> IceGathering -> Ready -> Streaming -> Closed
//!     \____________\_________________\___________________\____________\-> Failed
//! ```
//!
//! Each session owns its own peer connection and outbound track. It only
//! touches the frame hub once negotiation has completed, so a failed
//! negotiation never leaves anything registered there.

use crate::config::GameviewConfig;
use crate::errors::NegotiationError;
use crate::hub::{FrameHub, Subscription};
use crate::types::PixelFormat;
use crate::webrtc::peer::{self, ConnectionState, SdpType, SessionDescription};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;
use webrtc::media::Sample;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NegotiationState {
    Created,
    OfferReceived,
    LocalDescriptionSet,
    IceGathering,
    Ready,
    Streaming,
    Closed,
    Failed,
}

impl NegotiationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationState::Created => "Created",
            NegotiationState::OfferReceived => "OfferReceived",
            NegotiationState::LocalDescriptionSet => "LocalDescriptionSet",
            NegotiationState::IceGathering => "IceGathering",
            NegotiationState::Ready => "Ready",
            NegotiationState::Streaming => "Streaming",
            NegotiationState::Closed => "Closed",
            NegotiationState::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Closed | NegotiationState::Failed)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings shared by every negotiation session.
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    /// Encoded format of the capture source; the track carries it as is.
    pub format: PixelFormat,
    /// Nominal frame rate, used as the sample duration on the track.
    pub fps: u32,
    pub ice_servers: Vec<String>,
    /// Offer 127.0.0.1 candidates, for viewers on the same host.
    pub include_loopback_candidates: bool,
    pub gather_timeout: Duration,
    pub subscriber_buffer: usize,
}

impl NegotiationConfig {
    pub fn new(format: PixelFormat) -> Self {
        Self {
            format,
            fps: 30,
            ice_servers: Vec::new(),
            include_loopback_candidates: false,
            gather_timeout: Duration::from_secs(5),
            subscriber_buffer: 8,
        }
    }

    pub fn from_config(config: &GameviewConfig) -> Self {
        Self {
            format: config.camera.format,
            fps: config.camera.fps,
            ice_servers: config.webrtc.ice_servers.clone(),
            include_loopback_candidates: config.webrtc.include_loopback_candidates,
            gather_timeout: config.webrtc.gather_timeout(),
            subscriber_buffer: config.webrtc.subscriber_buffer,
        }
    }

    fn sample_duration(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

/// Where a streaming session writes its samples.
pub trait SampleSink: Send + Sync {
    fn push_sample<'a>(
        &'a self,
        sample: &'a Sample,
    ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>>;
}

impl SampleSink for TrackLocalStaticSample {
    fn push_sample<'a>(
        &'a self,
        sample: &'a Sample,
    ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>> {
        Box::pin(async move {
            self.write_sample(sample)
                .await
                .map_err(|e| e.to_string())
        })
    }
}

struct SessionInner {
    id: Uuid,
    config: NegotiationConfig,
    state: watch::Sender<NegotiationState>,
    offer: Mutex<Option<RTCSessionDescription>>,
    answer: Mutex<Option<SessionDescription>>,
    peer: Mutex<Option<Arc<RTCPeerConnection>>>,
    track: Mutex<Option<Arc<TrackLocalStaticSample>>>,
    disconnected: Notify,
}

/// One viewer's peer-connection session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct NegotiationSession {
    inner: Arc<SessionInner>,
}

impl NegotiationSession {
    pub fn new(config: NegotiationConfig) -> Self {
        let (state, _) = watch::channel(NegotiationState::Created);
        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                config,
                state,
                offer: Mutex::new(None),
                answer: Mutex::new(None),
                peer: Mutex::new(None),
                track: Mutex::new(None),
                disconnected: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn state(&self) -> NegotiationState {
        *self.inner.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<NegotiationState> {
        self.inner.state.subscribe()
    }

    /// Wait until the session reaches `target`, or give up after `timeout`.
    pub async fn wait_for_state(&self, target: NegotiationState, timeout: Duration) -> bool {
        let mut rx = self.watch_state();
        let reached = rx.wait_for(|state| *state == target);
        let ok = matches!(tokio::time::timeout(timeout, reached).await, Ok(Ok(_)));
        ok
    }

    pub fn has_peer_connection(&self) -> bool {
        lock(&self.inner.peer).is_some()
    }

    /// Identifier of the outbound media track, once created.
    pub fn track_id(&self) -> Option<String> {
        lock(&self.inner.track)
            .as_ref()
            .map(|track| track.id().to_string())
    }

    pub fn answer(&self) -> Option<SessionDescription> {
        lock(&self.inner.answer).clone()
    }

    /// `Created -> OfferReceived`.
    ///
    /// `body` is the JSON session description sent by the viewer. Malformed
    /// input fails the session; a second offer is rejected and leaves the
    /// session untouched.
    pub fn receive_offer(&self, body: &[u8]) -> Result<(), NegotiationError> {
        let mut offer_slot = lock(&self.inner.offer);

        match self.state() {
            NegotiationState::Created => {}
            NegotiationState::Closed | NegotiationState::Failed => {
                return Err(NegotiationError::InvalidState {
                    expected: NegotiationState::Created.as_str(),
                    actual: self.state().as_str(),
                })
            }
            state => {
                log::warn!("Session {} rejected a second offer while {}", self.id(), state);
                return Err(NegotiationError::RenegotiationRejected);
            }
        }

        let offer = match parse_offer(body) {
            Ok(offer) => offer,
            Err(e) => {
                log::warn!("Session {} received a malformed offer: {}", self.id(), e);
                self.fail();
                return Err(e);
            }
        };

        log::info!("Session {} received offer: sdp_len={}", self.id(), offer.sdp.len());
        *offer_slot = Some(offer);
        self.advance(NegotiationState::Created, NegotiationState::OfferReceived)
    }

    /// `OfferReceived -> LocalDescriptionSet -> IceGathering -> Ready`.
    ///
    /// Returns the final answer, including every gathered candidate. On any
    /// failure the peer connection is closed and the session is `Failed`.
    pub async fn negotiate(&self) -> Result<SessionDescription, NegotiationError> {
        if self.state() == NegotiationState::Streaming {
            return Err(NegotiationError::RenegotiationRejected);
        }
        self.expect_state(NegotiationState::OfferReceived)?;

        let offer = lock(&self.inner.offer).clone().ok_or(NegotiationError::InvalidState {
            expected: NegotiationState::OfferReceived.as_str(),
            actual: NegotiationState::Created.as_str(),
        })?;

        match self.build_answer(offer).await {
            Ok(answer) => Ok(answer),
            Err(e) => {
                log::warn!("Session {} negotiation failed: {}", self.id(), e);
                self.release_peer().await;
                self.fail();
                Err(e)
            }
        }
    }

    async fn build_answer(
        &self,
        offer: RTCSessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        let config = &self.inner.config;
        let capability = peer::track_capability(config.format)?;
        let pc = peer::new_peer_connection(
            config.format,
            &config.ice_servers,
            config.include_loopback_candidates,
        )
        .await?;
        *lock(&self.inner.peer) = Some(Arc::clone(&pc));

        let track = Arc::new(TrackLocalStaticSample::new(
            capability,
            "video".to_owned(),
            format!("gameview-{}", self.id()),
        ));
        let rtp_sender = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        *lock(&self.inner.track) = Some(track);

        // Interceptors only see RTCP that somebody reads.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = rtp_sender.read(&mut rtcp_buf).await {}
        });

        let weak = Arc::downgrade(&self.inner);
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            if let Some(inner) = weak.upgrade() {
                NegotiationSession { inner }.peer_state_changed(ConnectionState::from(state));
            }
            Box::pin(async {})
        }));

        pc.set_remote_description(offer).await?;
        let answer = pc.create_answer(None).await?;
        let mut gather_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(answer).await?;
        self.advance(
            NegotiationState::OfferReceived,
            NegotiationState::LocalDescriptionSet,
        )?;

        self.advance(
            NegotiationState::LocalDescriptionSet,
            NegotiationState::IceGathering,
        )?;
        if tokio::time::timeout(config.gather_timeout, gather_complete.recv())
            .await
            .is_err()
        {
            return Err(NegotiationError::GatheringTimeout(config.gather_timeout));
        }

        let local = pc.local_description().await.ok_or_else(|| {
            NegotiationError::PeerConnection("no local description after gathering".to_string())
        })?;
        let answer = SessionDescription::from(local);
        *lock(&self.inner.answer) = Some(answer.clone());
        self.advance(NegotiationState::IceGathering, NegotiationState::Ready)?;

        log::info!("Session {} answer ready: sdp_len={}", self.id(), answer.sdp.len());
        Ok(answer)
    }

    /// `Ready -> Streaming`: subscribe to the hub and feed frames into the
    /// track until the source ends, a write fails or the peer goes away.
    pub async fn start_streaming(&self, hub: &FrameHub) -> Result<JoinHandle<()>, NegotiationError> {
        self.expect_state(NegotiationState::Ready)?;
        let track = lock(&self.inner.track).clone().ok_or_else(|| {
            NegotiationError::PeerConnection("session has no media track".to_string())
        })?;
        self.start_forwarding(hub, track).await
    }

    async fn start_forwarding(
        &self,
        hub: &FrameHub,
        sink: Arc<dyn SampleSink>,
    ) -> Result<JoinHandle<()>, NegotiationError> {
        let subscription = match hub.subscribe_with_capacity(self.inner.config.subscriber_buffer) {
            Ok(subscription) => subscription,
            Err(e) => {
                self.close().await;
                return Err(e.into());
            }
        };
        self.advance(NegotiationState::Ready, NegotiationState::Streaming)?;

        let session = self.clone();
        Ok(tokio::spawn(async move {
            session.forward_frames(subscription, sink).await;
        }))
    }

    async fn forward_frames(&self, subscription: Subscription, sink: Arc<dyn SampleSink>) {
        let duration = self.inner.config.sample_duration();
        log::info!("Session {} streaming as {}", self.id(), subscription.id());

        let reason = loop {
            tokio::select! {
                frame = subscription.recv() => match frame {
                    Some(frame) => {
                        let sample = Sample {
                            data: frame.data,
                            duration,
                            ..Default::default()
                        };
                        if let Err(e) = sink.push_sample(&sample).await {
                            break format!("track write failed: {e}");
                        }
                    }
                    None => break "capture source closed".to_string(),
                },
                _ = self.inner.disconnected.notified() => break "peer disconnected".to_string(),
            }
        };

        let dropped = subscription.dropped();
        drop(subscription);
        self.release_peer().await;
        self.mark_closed();
        log::info!("Session {} closed ({}, {} frames dropped)", self.id(), reason, dropped);
    }

    /// Only a connection that can no longer recover ends the session.
    fn peer_state_changed(&self, state: ConnectionState) {
        log::info!("Session {} peer connection {:?}", self.id(), state);
        if state.is_terminal() {
            self.inner.disconnected.notify_one();
        }
    }

    /// Tear the session down from any state. Idempotent.
    pub async fn close(&self) {
        self.inner.disconnected.notify_one();
        self.release_peer().await;
        self.mark_closed();
    }

    async fn release_peer(&self) {
        let pc = lock(&self.inner.peer).take();
        if let Some(pc) = pc {
            if let Err(e) = pc.close().await {
                log::warn!("Session {} failed to close peer connection: {}", self.id(), e);
            }
        }
        lock(&self.inner.track).take();
    }

    fn advance(
        &self,
        expected: NegotiationState,
        next: NegotiationState,
    ) -> Result<(), NegotiationError> {
        let mut actual = expected;
        let moved = self.inner.state.send_if_modified(|state| {
            if *state == expected {
                *state = next;
                true
            } else {
                actual = *state;
                false
            }
        });
        if moved {
            log::debug!("Session {}: {} -> {}", self.id(), expected, next);
            Ok(())
        } else {
            Err(NegotiationError::InvalidState {
                expected: expected.as_str(),
                actual: actual.as_str(),
            })
        }
    }

    fn expect_state(&self, expected: NegotiationState) -> Result<(), NegotiationError> {
        let actual = self.state();
        if actual == expected {
            Ok(())
        } else {
            Err(NegotiationError::InvalidState {
                expected: expected.as_str(),
                actual: actual.as_str(),
            })
        }
    }

    fn fail(&self) {
        self.inner.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = NegotiationState::Failed;
                true
            }
        });
    }

    fn mark_closed(&self) {
        self.inner.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = NegotiationState::Closed;
                true
            }
        });
    }
}

impl fmt::Debug for NegotiationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiationSession")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

fn parse_offer(body: &[u8]) -> Result<RTCSessionDescription, NegotiationError> {
    let desc: SessionDescription = serde_json::from_slice(body)
        .map_err(|e| NegotiationError::MalformedOffer(format!("invalid offer JSON: {e}")))?;
    if desc.sdp_type != SdpType::Offer {
        return Err(NegotiationError::MalformedOffer(format!(
            "expected an offer, got {:?}",
            desc.sdp_type
        )));
    }
    if desc.sdp.trim().is_empty() {
        return Err(NegotiationError::MalformedOffer("offer has no SDP".to_string()));
    }
    desc.try_into().map_err(NegotiationError::MalformedOffer)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

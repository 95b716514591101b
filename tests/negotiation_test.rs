//! Offer/answer negotiation against a real in-process offerer.

use gameview::testing::synthetic_frame;
use gameview::types::{Frame, PixelFormat};
use gameview::webrtc::{NegotiationConfig, NegotiationSession, NegotiationState, SdpType, SessionDescription};
use gameview::{FrameHub, NegotiationError};
use std::sync::Arc;
use std::time::Duration;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

/// Build a receive-only offer the way a browser viewer would.
async fn viewer_offer() -> (Arc<RTCPeerConnection>, Vec<u8>) {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().unwrap();
    let registry = register_default_interceptors(Registry::new(), &mut media_engine).unwrap();
    let mut setting_engine = SettingEngine::default();
    setting_engine.set_include_loopback_candidate(true);
    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build();
    let pc = Arc::new(
        api.new_peer_connection(RTCConfiguration::default())
            .await
            .unwrap(),
    );

    pc.add_transceiver_from_kind(
        RTPCodecType::Video,
        Some(RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Recvonly,
            send_encodings: vec![],
        }),
    )
    .await
    .unwrap();

    let offer = pc.create_offer(None).await.unwrap();
    let mut gather_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(offer).await.unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), gather_complete.recv()).await;

    let local = pc.local_description().await.unwrap();
    let body = serde_json::to_vec(&SessionDescription::from(local)).unwrap();
    (pc, body)
}

fn h264_session() -> NegotiationSession {
    NegotiationSession::new(NegotiationConfig::new(PixelFormat::H264))
}

#[tokio::test]
async fn test_malformed_offer_fails_without_touching_the_hub() {
    let hub = FrameHub::new();
    let session = h264_session();

    let err = session.receive_offer(b"{\"type\":\"offer\"").unwrap_err();
    assert!(matches!(err, NegotiationError::MalformedOffer(_)));
    assert_eq!(session.state(), NegotiationState::Failed);
    assert!(!session.has_peer_connection());
    assert!(session.start_streaming(&hub).await.is_err());
    assert_eq!(hub.subscriber_count(), 0);
}

#[tokio::test]
async fn test_full_negotiation_reaches_streaming() {
    let (viewer, offer) = viewer_offer().await;
    let hub = FrameHub::new();
    let session = h264_session();

    session.receive_offer(&offer).unwrap();
    assert_eq!(session.state(), NegotiationState::OfferReceived);

    let answer = tokio::time::timeout(Duration::from_secs(10), session.negotiate())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(answer.sdp_type, SdpType::Answer);
    assert!(answer.sdp.contains("m=video"));
    assert_eq!(session.state(), NegotiationState::Ready);
    assert_eq!(session.answer(), Some(answer));
    assert!(session.track_id().is_some());

    let task = session.start_streaming(&hub).await.unwrap();
    assert!(
        session
            .wait_for_state(NegotiationState::Streaming, Duration::from_secs(1))
            .await
    );
    assert_eq!(hub.subscriber_count(), 1);

    // End of stream tears the session down and unsubscribes it.
    hub.close();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.state(), NegotiationState::Closed);
    assert!(!session.has_peer_connection());
    assert_eq!(hub.subscriber_count(), 0);

    viewer.close().await.unwrap();
}

#[tokio::test]
async fn test_second_offer_is_rejected_without_side_effects() {
    let (viewer, offer) = viewer_offer().await;
    let hub = FrameHub::new();
    let session = h264_session();

    session.receive_offer(&offer).unwrap();
    session.negotiate().await.unwrap();
    let task = session.start_streaming(&hub).await.unwrap();
    let track_id = session.track_id();

    let err = session.receive_offer(&offer).unwrap_err();
    assert!(matches!(err, NegotiationError::RenegotiationRejected));
    assert!(err.is_client_error());
    assert_eq!(session.state(), NegotiationState::Streaming);
    assert_eq!(session.track_id(), track_id);
    assert!(matches!(
        session.negotiate().await,
        Err(NegotiationError::RenegotiationRejected)
    ));

    session.close().await;
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.state(), NegotiationState::Closed);
    assert_eq!(hub.subscriber_count(), 0);

    viewer.close().await.unwrap();
}

#[tokio::test]
async fn test_mjpeg_source_cannot_be_negotiated() {
    let (viewer, offer) = viewer_offer().await;
    let session = NegotiationSession::new(NegotiationConfig::new(PixelFormat::Mjpeg));

    session.receive_offer(&offer).unwrap();
    let err = session.negotiate().await.unwrap_err();
    assert!(matches!(err, NegotiationError::UnsupportedCodec(_)));
    assert_eq!(session.state(), NegotiationState::Failed);
    assert!(!session.has_peer_connection());

    viewer.close().await.unwrap();
}

#[tokio::test]
async fn test_closed_hub_fails_streaming_start() {
    let (viewer, offer) = viewer_offer().await;
    let hub = FrameHub::new();
    hub.close();
    let session = h264_session();

    session.receive_offer(&offer).unwrap();
    session.negotiate().await.unwrap();
    let err = session.start_streaming(&hub).await.unwrap_err();
    assert!(matches!(err, NegotiationError::SourceClosed(_)));
    assert_eq!(session.state(), NegotiationState::Closed);
    assert!(!session.has_peer_connection());

    viewer.close().await.unwrap();
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let (viewer, offer) = viewer_offer().await;
    let hub = FrameHub::new();

    let broken = h264_session();
    let _ = broken.receive_offer(b"garbage");

    let healthy = h264_session();
    healthy.receive_offer(&offer).unwrap();
    healthy.negotiate().await.unwrap();
    let task = healthy.start_streaming(&hub).await.unwrap();

    assert_eq!(broken.state(), NegotiationState::Failed);
    assert_eq!(healthy.state(), NegotiationState::Streaming);
    assert_ne!(broken.id(), healthy.id());

    healthy.close().await;
    let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
    viewer.close().await.unwrap();
}

#[tokio::test]
async fn test_published_frames_arrive_as_rtp_at_the_viewer() {
    let (viewer, offer) = viewer_offer().await;
    let (rtp_tx, mut rtp_rx) = tokio::sync::mpsc::unbounded_channel();
    viewer.on_track(Box::new(move |track, _receiver, _transceiver| {
        let rtp_tx = rtp_tx.clone();
        tokio::spawn(async move {
            while let Ok((packet, _)) = track.read_rtp().await {
                if rtp_tx.send(packet.payload.len()).is_err() {
                    break;
                }
            }
        });
        Box::pin(async {})
    }));

    let hub = FrameHub::new();
    let mut config = NegotiationConfig::new(PixelFormat::H264);
    config.include_loopback_candidates = true;
    let session = NegotiationSession::new(config);
    session.receive_offer(&offer).unwrap();
    let answer = session.negotiate().await.unwrap();
    let task = session.start_streaming(&hub).await.unwrap();
    viewer
        .set_remote_description(RTCSessionDescription::try_from(answer).unwrap())
        .await
        .unwrap();

    let publisher_hub = hub.clone();
    let publisher = tokio::spawn(async move {
        for n in 0u64.. {
            publisher_hub.publish(Frame {
                sequence: n,
                timestamp_us: n * 20_000,
                captured_at: chrono::Utc::now(),
                data: synthetic_frame(PixelFormat::H264, n, 512),
            });
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    let payload_len = tokio::time::timeout(Duration::from_secs(15), rtp_rx.recv())
        .await
        .expect("viewer should receive RTP once ICE connects")
        .unwrap();
    assert!(payload_len > 0);
    assert_eq!(session.state(), NegotiationState::Streaming);

    publisher.abort();
    hub.close();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.state(), NegotiationState::Closed);
    assert_eq!(hub.subscriber_count(), 0);

    viewer.close().await.unwrap();
}

use crate::errors::NegotiationError;
use crate::types::PixelFormat;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};

/// Constrained baseline, level 3.1, non-interleaved packetization.
pub const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";
pub const H264_PAYLOAD_TYPE: u8 = 125;
pub const VIDEO_CLOCK_RATE: u32 = 90000;

/// SDP (Session Description Protocol) type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl From<RTCSdpType> for SdpType {
    fn from(sdp_type: RTCSdpType) -> Self {
        match sdp_type {
            RTCSdpType::Offer => SdpType::Offer,
            RTCSdpType::Answer => SdpType::Answer,
            RTCSdpType::Pranswer => SdpType::Pranswer,
            RTCSdpType::Rollback => SdpType::Rollback,
            RTCSdpType::Unspecified => SdpType::Offer,
        }
    }
}

/// Session description as exchanged with browsers: `{"type": ..., "sdp": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl TryFrom<SessionDescription> for RTCSessionDescription {
    type Error = String;

    fn try_from(desc: SessionDescription) -> Result<Self, Self::Error> {
        match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp)
                .map_err(|e| format!("Invalid SDP offer: {}", e)),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp)
                .map_err(|e| format!("Invalid SDP answer: {}", e)),
            SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)
                .map_err(|e| format!("Invalid SDP pranswer: {}", e)),
            SdpType::Rollback => Err("Rollback SDP type not supported".to_string()),
        }
    }
}

impl From<RTCSessionDescription> for SessionDescription {
    fn from(desc: RTCSessionDescription) -> Self {
        SessionDescription {
            sdp_type: desc.sdp_type.into(),
            sdp: desc.sdp,
        }
    }
}

/// WebRTC peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States the connection never leaves. `Disconnected` is not one of
    /// them: ICE may restore connectivity, and gives up by moving to `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New => ConnectionState::New,
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
            RTCPeerConnectionState::Unspecified => ConnectionState::New,
        }
    }
}

/// Codec capability carried by the outbound track for a capture format.
///
/// Frames go onto the track without transcoding, so only formats with an RTP
/// payload format are accepted.
pub fn track_capability(format: PixelFormat) -> Result<RTCRtpCodecCapability, NegotiationError> {
    match format {
        PixelFormat::H264 => Ok(RTCRtpCodecCapability {
            mime_type: MIME_TYPE_H264.to_owned(),
            clock_rate: VIDEO_CLOCK_RATE,
            channels: 0,
            sdp_fmtp_line: H264_FMTP.to_owned(),
            rtcp_feedback: vec![],
        }),
        PixelFormat::Mjpeg => Err(NegotiationError::UnsupportedCodec(format.to_string())),
    }
}

/// Media engine with the default codec set plus the capture codec.
///
/// Registration problems are logged and the best-effort codec set is kept.
pub fn media_engine_for(format: PixelFormat) -> Result<MediaEngine, NegotiationError> {
    let capability = track_capability(format)?;

    let mut media_engine = MediaEngine::default();
    if let Err(e) = media_engine.register_default_codecs() {
        log::warn!("Registering default codecs failed: {}", e);
    }
    let params = RTCRtpCodecParameters {
        capability,
        payload_type: H264_PAYLOAD_TYPE,
        ..Default::default()
    };
    if let Err(e) = media_engine.register_codec(params, RTPCodecType::Video) {
        log::warn!("Registering {} codec failed: {}", format, e);
    }
    Ok(media_engine)
}

/// Create a peer connection able to send the given capture format.
pub async fn new_peer_connection(
    format: PixelFormat,
    ice_servers: &[String],
    include_loopback_candidates: bool,
) -> Result<Arc<RTCPeerConnection>, NegotiationError> {
    let mut media_engine = media_engine_for(format)?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

    let mut setting_engine = SettingEngine::default();
    setting_engine.set_include_loopback_candidate(include_loopback_candidates);

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build();

    let config = RTCConfiguration {
        ice_servers: ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };

    let peer_connection = api.new_peer_connection(config).await?;
    Ok(Arc::new(peer_connection))
}

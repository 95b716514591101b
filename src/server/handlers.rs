use super::AppState;
use crate::errors::NegotiationError;
use crate::hub::HubStats;
use crate::types::CameraFormat;
use crate::webrtc::{NegotiationConfig, NegotiationSession};
use crate::websocket::{gamepad, StreamingSession};
use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Serialize;

impl IntoResponse for NegotiationError {
    fn into_response(self) -> Response {
        let status = match &self {
            NegotiationError::MalformedOffer(_) => StatusCode::BAD_REQUEST,
            NegotiationError::RenegotiationRejected | NegotiationError::InvalidState { .. } => {
                StatusCode::CONFLICT
            }
            NegotiationError::GatheringTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            NegotiationError::SourceClosed(_) => StatusCode::SERVICE_UNAVAILABLE,
            NegotiationError::UnsupportedCodec(_) | NegotiationError::PeerConnection(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

pub(super) async fn stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let subscription = match state
        .hub
        .subscribe_with_capacity(state.config.stream.subscriber_buffer)
    {
        Ok(subscription) => subscription,
        Err(e) => return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    };
    let session = StreamingSession::new(subscription, state.config.stream.target_fps);

    ws.on_upgrade(move |socket| async move {
        let (outbound, inbound) = socket.split();
        session.run(outbound, inbound).await;
    })
}

pub(super) async fn offer(State(state): State<AppState>, body: Bytes) -> Response {
    let session = NegotiationSession::new(NegotiationConfig::from_config(&state.config));
    log::info!("Negotiation session {} created", session.id());

    if let Err(e) = session.receive_offer(&body) {
        return e.into_response();
    }
    let answer = match session.negotiate().await {
        Ok(answer) => answer,
        Err(e) => return e.into_response(),
    };
    // Nothing runs in this handler once axum writes the response, so the
    // writer starts here. Samples written before ICE connects are discarded
    // by the track, which only costs the viewer its first few frames.
    if let Err(e) = session.start_streaming(&state.hub).await {
        log::warn!("Negotiation session {} could not start streaming: {}", session.id(), e);
        return e.into_response();
    }

    Json(answer).into_response()
}

pub(super) async fn gamepad(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if !state.config.gamepad.enabled {
        return StatusCode::NOT_FOUND.into_response();
    }
    let path = state.config.gamepad.device.clone();

    ws.on_upgrade(move |socket| async move {
        let device = match gamepad::open_device(&path).await {
            Ok(device) => device,
            Err(e) => {
                log::warn!("Gamepad session refused: {}", e);
                return;
            }
        };
        match gamepad::forward_reports(socket, device).await {
            Ok(count) => log::info!("Gamepad session ended after {} reports", count),
            Err(e) => log::warn!("Gamepad session ended: {}", e),
        }
    })
}

#[derive(Debug, Serialize)]
pub(super) struct StatusReport {
    #[serde(flatten)]
    info: crate::CrateInfo,
    capture: CameraFormat,
    hub: HubStats,
}

pub(super) async fn status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(StatusReport {
        info: crate::get_info(),
        capture: state.config.camera.capture_format(),
        hub: state.hub.stats(),
    })
}

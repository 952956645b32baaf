//! WebSocket session endpoint.
//!
//! Each socket gets its own [`SessionState`](crate::session::SessionState).
//! A reader task pulls messages off the socket, the session loop processes
//! frames strictly one at a time, and a writer task drains the connection's
//! outbound channel, which carries both this session's frame results and fall
//! alerts from every session.
//!
//! When the reader task ends the client is gone: the frame being scored is
//! dropped before it can record an incident, and queued frames are discarded.
//! Both queues are bounded. A client that stops reading back-pressures its
//! own session, and alerts for it are dropped as failed deliveries.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::AppState;
use crate::broadcast::{AlertMessage, AlertObserver, ChannelObserver};
use crate::logging;
use crate::pose::{Frame, PersonFrame};
use crate::session::FrameResult;

/// Frames read ahead of the one being scored
const INBOUND_QUEUE: usize = 8;
/// Results and alerts waiting on a slow client
const OUTBOUND_QUEUE: usize = 64;

/// Inbound frame message
#[derive(Debug, Deserialize)]
struct InboundFrame {
    /// Client capture time, ms
    #[serde(default)]
    timestamp: Option<f64>,
    /// Data URL or bare base64
    #[serde(default)]
    image: Option<String>,
    /// Client-side keypoints; take precedence over `image`
    #[serde(default)]
    people: Option<Vec<PersonFrame>>,
}

#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("Invalid frame JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid base64 image: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Frame has neither image nor people")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "error")]
pub struct ErrorMessage {
    pub message: String,
}

/// Everything written to a socket
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Result(FrameResult),
    Alert(AlertMessage),
    Error(ErrorMessage),
}

impl Outbound {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorMessage {
            message: message.into(),
        })
    }
}

impl From<AlertMessage> for Outbound {
    fn from(message: AlertMessage) -> Self {
        Self::Alert(message)
    }
}

/// Decode one text message into a frame
pub fn parse_frame(text: &str) -> Result<Frame, FrameDecodeError> {
    let inbound: InboundFrame = serde_json::from_str(text)?;
    let timestamp_ms = inbound
        .timestamp
        .filter(|t| t.is_finite() && *t >= 0.0)
        .map(|t| t as u64);

    if let Some(people) = inbound.people {
        return Ok(Frame::people(people, timestamp_ms));
    }

    let image = inbound.image.ok_or(FrameDecodeError::Empty)?;
    let (mime, data) = match image.split_once(',') {
        Some((header, data)) => (data_url_mime(header), data),
        None => (None, image.as_str()),
    };
    let bytes = STANDARD.decode(data.trim())?;
    if bytes.is_empty() {
        return Err(FrameDecodeError::Empty);
    }
    Ok(Frame::image(bytes, mime, timestamp_ms))
}

/// `data:image/jpeg;base64` -> `image/jpeg`
fn data_url_mime(header: &str) -> Option<String> {
    header
        .strip_prefix("data:")
        .and_then(|h| h.split(';').next())
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

pub(super) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let peer = peer.map(|ConnectInfo(addr)| addr.to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state, peer))
}

async fn handle_socket(socket: WebSocket, state: AppState, peer: Option<String>) {
    let monitor = state.monitor;
    let mut session = monitor.open_session(peer.as_deref());
    let session_id = session.id();

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<Message>(INBOUND_QUEUE);

    // Alerts from any session land on this socket's outbound queue
    let observer: Arc<dyn AlertObserver> = Arc::new(ChannelObserver::new(session_id, tx.clone()));
    monitor.hub().subscribe(&observer);

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize outbound message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // Finishes when the client goes away, which cancels the frame in flight
    let mut reader = tokio::spawn(async move {
        while let Some(incoming) = receiver.next().await {
            match incoming {
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(message) => {
                    if inbound_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(session_id = %session_id, "WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    loop {
        let message = tokio::select! {
            biased;
            _ = &mut reader => break,
            message = inbound_rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let frame = match message {
            Message::Text(text) => parse_frame(&text),
            // Raw encoded image with no metadata
            Message::Binary(bytes) => Ok(Frame::image(bytes, None, None)),
            _ => continue,
        };

        let outbound = match frame {
            Ok(frame) => tokio::select! {
                biased;
                _ = &mut reader => break,
                result = monitor.process_frame(&mut session, frame) => Outbound::Result(result),
            },
            Err(e) => {
                logging::log_frame_rejected(&session_id, &e);
                Outbound::error(e.to_string())
            }
        };

        let sent = tokio::select! {
            biased;
            _ = &mut reader => break,
            sent = tx.send(outbound) => sent,
        };
        if sent.is_err() {
            // Writer gone: the socket is closed
            break;
        }
    }

    reader.abort();
    writer.abort();
    monitor.hub().unsubscribe(session_id);
    drop(observer);
    monitor.close_session(session);
}

//! Manages the media stream websocket connection lifecycle.

use std::{collections::VecDeque, sync::Arc};

use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use tracing::{error, info, instrument, warn};

use super::{
    protocol::OutboundMessage,
    relay::{MediaRelay, RelaySettings},
};
use crate::state::AppState;

/// What one websocket read means for the relay loop.
enum Frame {
    Text(Utf8Bytes),
    Skip,
    Closed,
}

impl Frame {
    fn classify(read: Option<Result<Message, axum::Error>>) -> Self {
        match read {
            Some(Ok(Message::Text(text))) => Frame::Text(text),
            Some(Ok(Message::Binary(data))) => {
                warn!(bytes = data.len(), "Ignoring binary frame on media stream");
                Frame::Skip
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => Frame::Skip,
            Some(Ok(Message::Close(_))) => {
                info!("Vendor sent close frame");
                Frame::Closed
            }
            Some(Err(e)) => {
                warn!(error = %e, "Media stream transport error");
                Frame::Closed
            }
            None => Frame::Closed,
        }
    }
}

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Runs one media stream until the vendor stops it or the transport closes.
///
/// Text frames are handled one at a time in arrival order. While a frame is
/// being handled the socket is still read: later text frames are queued, and a
/// transport close drops the in-flight handler, cancelling any agent call.
#[instrument(name = "media_stream", skip_all, fields(connection_id, call_sid))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id: u32 = rand::random();
    tracing::Span::current().record("connection_id", connection_id);
    info!("New media stream connection");

    let (mut socket_tx, mut socket_rx) = socket.split();
    let mut relay = MediaRelay::new(
        Arc::clone(&state.bridge),
        RelaySettings::from_config(&state.config),
    );
    let mut queued: VecDeque<Utf8Bytes> = VecDeque::new();

    loop {
        let text = match queued.pop_front() {
            Some(text) => text,
            None => match Frame::classify(socket_rx.next().await) {
                Frame::Text(text) => text,
                Frame::Skip => continue,
                Frame::Closed => break,
            },
        };

        let was_closed = relay.is_closed();
        let handled = {
            let turn = relay.handle_text(text.as_str());
            tokio::pin!(turn);
            loop {
                tokio::select! {
                    reply = &mut turn => break Some(reply),
                    read = socket_rx.next() => match Frame::classify(read) {
                        Frame::Text(next) => queued.push_back(next),
                        Frame::Skip => {}
                        Frame::Closed => break None,
                    },
                }
            }
        };

        let Some(reply) = handled else {
            warn!("Transport closed mid-turn; abandoning agent call");
            break;
        };

        if let Some(session) = relay.session() {
            tracing::Span::current().record("call_sid", session.session_id());
        }
        if let Some(reply) = reply {
            if let Err(e) = send_msg(&mut socket_tx, &reply).await {
                error!(error = ?e, "Failed to send to media stream");
                break;
            }
        }
        if !was_closed && relay.is_closed() {
            info!("Vendor stopped the stream");
        }
    }

    relay.close();
    info!("Media stream connection finished");
}

/// Serializes and sends one event to the vendor.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: &OutboundMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}

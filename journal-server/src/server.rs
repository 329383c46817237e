use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use journal_core::ServerEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::http::HttpState;
use crate::middleware::RequestIdentity;
use crate::router;
use crate::session::Session;

/// Events a session may buffer for the socket writer before producers wait.
pub const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Upper bound on the close handshake with a client that stopped reading.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Drive one upgraded WebSocket until the client leaves or the server shuts
/// down.
///
/// A writer task drains the session's outbound queue into text frames; this
/// task reads inbound frames and hands them to the router. Either side ending
/// cancels the session, which settles its turns and stops the other side.
pub async fn run_session_socket(
    socket: WebSocket,
    state: Arc<HttpState>,
    identity: RequestIdentity,
) {
    let (sink, mut frames) = socket.split();
    let (tx, rx) = mpsc::channel::<ServerEvent>(OUTBOUND_QUEUE_DEPTH);

    let session = Session::open(&state, &identity, tx).await;
    let writer = tokio::spawn(write_events(
        sink,
        rx,
        session.cancellation().clone(),
    ));

    loop {
        tokio::select! {
            _ = session.cancellation().cancelled() => {
                tracing::info!(user_id = %session.user_id(), "Session cancelled, closing socket");
                break;
            }
            frame = frames.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    router::handle_client_frame(&session, &text).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(user_id = %session.user_id(), error = %e, "Session socket error");
                    break;
                }
            }
        }
    }

    session.close().await;
    if let Err(e) = writer.await {
        tracing::error!("Session writer task failed: {}", e);
    }
}

/// Serialize queued events onto the socket until the queue closes or the
/// session is cancelled. A failed write means the client is gone.
async fn write_events(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<ServerEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to serialize session event: {}", e);
                continue;
            }
        };

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = sink.send(WsMessage::Text(frame)) => sent,
        };
        if let Err(e) = sent {
            tracing::debug!(error = %e, "Session socket write failed");
            cancel.cancel();
            break;
        }
    }

    if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
        tracing::debug!("Session socket close timed out");
    }
}

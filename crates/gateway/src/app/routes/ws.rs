//! WebSocket submission endpoint.
//!
//! The socket task owns the connection and multiplexes two directions:
//! inbound text goes to a per-connection handler task, outbound frames from
//! that task are written as they arrive. The socket is not read while the
//! handler is busy, so a client cannot queue submissions server-side; it
//! waits on TCP backpressure instead.

use std::sync::Arc;

use axum::extract::Extension;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc::{channel, unbounded_channel};
use tracing::{debug, error, info, warn};

use byteme_core::StatusFrame;

use crate::app::services::AppServices;

/// GET /ws
pub async fn upgrade(ws: WebSocketUpgrade, Extension(services): Extension<Arc<AppServices>>) -> Response {
    ws.on_upgrade(move |socket| serve(socket, services))
}

async fn serve(mut socket: WebSocket, services: Arc<AppServices>) {
    let (frames_tx, mut frames_rx) = unbounded_channel::<StatusFrame>();
    let (inbound_tx, mut inbound_rx) = channel::<String>(1);
    let (idle_tx, mut idle_rx) = channel::<()>(1);
    let session = services.session(frames_tx.clone());

    if let Err(frame) = session.open().await {
        let _ = send_frame(&mut socket, &frame).await;
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    info!("client connected");

    let handler = tokio::spawn(async move {
        while let Some(text) = inbound_rx.recv().await {
            if session.handle_text(&text).await.is_err() {
                break;
            }
            if idle_tx.send(()).await.is_err() {
                break;
            }
        }
    });

    let mut idle = true;
    loop {
        tokio::select! {
            inbound = socket.recv(), if idle => match inbound {
                Some(Ok(Message::Text(text))) => {
                    idle = false;
                    if inbound_tx.send(text).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        idle = false;
                        if inbound_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        let _ = frames_tx.send(StatusFrame::error("Invalid JSON: binary frame is not UTF-8"));
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                // Ping/pong are answered by the protocol layer.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "websocket receive failed");
                    let _ = send_frame(&mut socket, &StatusFrame::error(format!("Connection error: {e}"))).await;
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            Some(()) = idle_rx.recv() => idle = true,
            Some(frame) = frames_rx.recv() => {
                if let Err(e) = send_frame(&mut socket, &frame).await {
                    debug!(error = %e, "websocket send failed");
                    break;
                }
            }
        }
    }

    // Jobs already enqueued keep running; only the polling stops.
    handler.abort();
    info!("client disconnected");
}

async fn send_frame(socket: &mut WebSocket, frame: &StatusFrame) -> Result<(), axum::Error> {
    match frame.to_json() {
        Ok(text) => socket.send(Message::Text(text)).await,
        Err(e) => {
            error!(error = %e, "failed to encode status frame");
            Ok(())
        }
    }
}

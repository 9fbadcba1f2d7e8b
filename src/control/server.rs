// src/control/server.rs

//! WebSocket endpoint (`/ws`) for the control plane.
//!
//! Each connection gets:
//! - a writer task that owns the sink half of the socket,
//! - a forwarder that copies registry events into the writer's queue,
//! - the reader loop, which answers calls in arrival order.

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::control::dispatch::handle_text;
use crate::control::protocol::ServerFrame;
use crate::errors::Result;
use crate::process::RegistryHandle;

/// Frames queued per connection before a slow client starts losing events.
const OUTBOUND_QUEUE: usize = 512;

pub fn router(registry: RegistryHandle) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(registry)
}

/// Bind the control plane on the loopback interface.
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    Ok(TcpListener::bind(addr).await?)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    registry: RegistryHandle,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "control plane listening on ws://{addr}/ws");
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("control plane stopped");
    Ok(())
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(registry): State<RegistryHandle>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

async fn handle_socket(socket: WebSocket, registry: RegistryHandle) {
    debug!("control client connected");
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);

    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut events = registry.subscribe();
    let event_tx = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if event_tx.send(ServerFrame::Event(event).encode()).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "control client fell behind; events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                let reply = handle_text(&registry, text.as_str()).await;
                if out_tx.send(reply).await.is_err() {
                    break;
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "control socket error");
                break;
            }
        }
    }

    forwarder.abort();
    drop(out_tx);
    let _ = writer.await;
    debug!("control client disconnected");
}

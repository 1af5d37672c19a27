//! WebSocket endpoint serving the live trade stream.
//!
//! One route, `/ws`. Clients drive subscriptions with single-frame JSON
//! commands; the server pushes shaped trade frames for subscribed topics,
//! pings every 25 seconds, and drops connections that miss a cycle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ws::hub::SubscriberHub;
use crate::ws::shape::{ack_frame, error_frame, hello_frame, parse_control, ControlOp};

/// Keepalive ping cadence; a connection that has not answered the previous
/// ping by the next tick is dropped.
const PING_INTERVAL: Duration = Duration::from_secs(25);

/// Bind and serve the broadcaster until cancellation.
pub async fn serve(
    bind: &str,
    hub: Arc<SubscriberHub>,
    cancellation_token: CancellationToken,
) -> Result<()> {
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(hub);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding websocket listener on {}", bind))?;

    info!("WebSocket broadcaster listening on {}/ws", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancellation_token.cancelled().await })
        .await
        .context("websocket server failed")?;

    info!("WebSocket broadcaster stopped");
    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<SubscriberHub>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(mut socket: WebSocket, hub: Arc<SubscriberHub>) {
    let conn_id = hub.next_conn_id();
    debug!("WebSocket connection {} established", conn_id);

    if socket.send(Message::Text(hello_frame())).await.is_err() {
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of a tokio interval fires immediately.
    ping_interval.tick().await;
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }

            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match parse_control(&text) {
                            Ok(op) => {
                                match &op {
                                    ControlOp::Subscribe(topic) => {
                                        hub.subscribe(topic, conn_id, tx.clone());
                                    },
                                    ControlOp::Unsubscribe(topic) => {
                                        hub.unsubscribe(topic, conn_id);
                                    },
                                }
                                ack_frame(&op)
                            },
                            Err(code) => error_frame(code),
                        };
                        if socket.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket connection {} closed by client", conn_id);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket connection {} errored: {}", conn_id, e);
                        break;
                    }
                }
            }

            _ = ping_interval.tick() => {
                if awaiting_pong {
                    warn!("WebSocket connection {} missed keepalive, dropping", conn_id);
                    break;
                }
                awaiting_pong = true;
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    hub.drop_conn(conn_id);
    debug!("WebSocket connection {} cleaned up", conn_id);
}

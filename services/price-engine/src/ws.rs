//! WebSocket live transport
//!
//! Thin adapter between socket frames and the engine's message contract.
//! Each connection registers an outbound channel with the broadcaster,
//! receives the welcome and watch-list greeting, then pumps frames both
//! ways until either side drops. All policy lives in the engine; this
//! module only moves frames.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cycle::PriceEngine;
use crate::messages::Inbound;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PriceEngine>,
}

/// Router exposing the live-connection endpoint.
pub fn router(engine: Arc<PriceEngine>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(AppState { engine })
}

/// Bind and serve the live transport.
pub async fn serve(engine: Arc<PriceEngine>, bind_addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = bind_addr, "live transport listening");
    axum::serve(listener, router(engine)).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.engine))
}

async fn handle_socket(socket: WebSocket, engine: Arc<PriceEngine>) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let connection = engine.broadcaster().register(outbound_tx);
    engine.greet(connection);

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(message) = outbound else { break };
                if sink
                    .send(Message::Text(message.to_frame()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match Inbound::parse(&text) {
                            Some(message) => engine.handle_message(connection, message).await,
                            None => debug!(connection_id = connection, "off-contract frame ignored"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    engine.broadcaster().disconnect(connection);
    debug!(connection_id = connection, "live connection closed");
}

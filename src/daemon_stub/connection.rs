//! Per-panel connection of the stub daemon

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

use super::{Broadcast, DaemonState};
use crate::remote::protocol::{DaemonMessage, PanelMessage, AUTH_EVENT, STATUS_ERR, STATUS_OK};

/// Serve one panel until it disconnects or is kicked
pub(crate) async fn handle_connection(
    stream: TcpStream,
    state: Arc<DaemonState>,
    events: broadcast::Receiver<Broadcast>,
) {
    let addr = stream.peer_addr().ok();

    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::error!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    state.clients.fetch_add(1, Ordering::SeqCst);
    let mut conn = PanelConnection::new(ws, state.clone(), events);
    conn.run().await;
    state.clients.fetch_sub(1, Ordering::SeqCst);

    tracing::info!("Panel {} disconnected ({:?})", conn.client_id, addr);
}

struct PanelConnection {
    ws: WebSocketStream<TcpStream>,
    state: Arc<DaemonState>,
    events: broadcast::Receiver<Broadcast>,
    client_id: String,
    authenticated: bool,
}

impl PanelConnection {
    fn new(
        ws: WebSocketStream<TcpStream>,
        state: Arc<DaemonState>,
        events: broadcast::Receiver<Broadcast>,
    ) -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        Self {
            ws,
            state,
            events,
            client_id: format!("panel_{}", &uuid[..8]),
            authenticated: false,
        }
    }

    async fn run(&mut self) {
        loop {
            tokio::select! {
                msg = self.ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_message(&text).await {
                                tracing::warn!("Panel {}: {}", self.client_id, e);
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(Message::Ping(data))) => {
                            let _ = self.ws.send(Message::Pong(data)).await;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::error!("WebSocket error from {}: {}", self.client_id, e);
                            break;
                        }
                    }
                }

                incoming = self.events.recv() => {
                    match incoming {
                        Ok(Broadcast::Event { scope, event, payload }) => {
                            if self.authenticated {
                                let msg = DaemonMessage::Event { scope, event, payload };
                                if self.send(&msg).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Ok(Broadcast::Kick) | Err(broadcast::error::RecvError::Closed) => {
                            let _ = self.ws.close(None).await;
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("Panel {} lagged, {} events skipped", self.client_id, n);
                        }
                    }
                }
            }
        }
    }

    async fn handle_message(&mut self, text: &str) -> anyhow::Result<()> {
        let message = match serde_json::from_str::<PanelMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Ignoring malformed message from {}: {}", self.client_id, e);
                return Ok(());
            }
        };

        match message {
            PanelMessage::Request { id, event, payload } if event == AUTH_EVENT => {
                self.authenticated = payload.as_str() == Some(self.state.api_key.as_str());
                if self.authenticated {
                    tracing::info!("Panel {} authenticated", self.client_id);
                } else {
                    tracing::warn!("Panel {} sent a wrong API key", self.client_id);
                }
                self.respond(id, STATUS_OK, serde_json::Value::Bool(self.authenticated))
                    .await
            }
            PanelMessage::Request { id, event, .. } if !self.authenticated => {
                tracing::debug!("Rejecting '{}' from unauthenticated {}", event, self.client_id);
                self.respond(id, STATUS_ERR, serde_json::json!("unauthorized"))
                    .await
            }
            PanelMessage::Request { id, event, payload } => {
                let Some(handler) = self.state.handlers.get(&event).cloned() else {
                    tracing::debug!("No handler for '{}', leaving call {} unanswered", event, id);
                    return Ok(());
                };
                match handler(payload) {
                    Ok(result) => self.respond(id, STATUS_OK, result).await,
                    Err(message) => {
                        self.respond(id, STATUS_ERR, serde_json::Value::String(message))
                            .await
                    }
                }
            }
            PanelMessage::Emit { event, payload } => {
                if self.authenticated {
                    if let Some(handler) = self.state.handlers.get(&event).cloned() {
                        let _ = handler(payload);
                    }
                }
                Ok(())
            }
        }
    }

    async fn respond(
        &mut self,
        id: u64,
        status: u16,
        result: serde_json::Value,
    ) -> anyhow::Result<()> {
        self.send(&DaemonMessage::Response { id, status, result })
            .await
    }

    async fn send(&mut self, msg: &DaemonMessage) -> anyhow::Result<()> {
        let json = serde_json::to_string(msg)?;
        self.ws.send(Message::Text(json)).await?;
        Ok(())
    }
}

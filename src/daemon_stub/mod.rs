//! Reference daemon endpoint
//!
//! A minimal daemon that speaks the panel protocol: it checks the API key on
//! `auth`, runs registered request handlers for authenticated panels, and can
//! push scoped events to every authenticated panel. Requests without a handler
//! are ignored, so the caller observes a timeout.
//!
//! # Usage
//!
//! ```ignore
//! let daemon = StubDaemon::builder("secret")
//!     .handle("echo", |payload| Ok(payload))
//!     .bind("127.0.0.1:0")
//!     .await?;
//! daemon.broadcast(EventScope::instance("i1"), "stdout", json!("hello"));
//! ```

mod connection;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::error::{LinkError, Result};
use crate::remote::protocol::EventScope;

/// Request handler: payload in, result or error message out
pub type Handler =
    Arc<dyn Fn(serde_json::Value) -> std::result::Result<serde_json::Value, String> + Send + Sync>;

/// Fan-out from the daemon to its connections
#[derive(Debug, Clone)]
pub(crate) enum Broadcast {
    Event {
        scope: EventScope,
        event: String,
        payload: serde_json::Value,
    },
    /// Drop every connection
    Kick,
}

pub(crate) struct DaemonState {
    pub(crate) api_key: String,
    pub(crate) handlers: HashMap<String, Handler>,
    pub(crate) clients: AtomicUsize,
}

pub struct StubDaemonBuilder {
    api_key: String,
    handlers: HashMap<String, Handler>,
}

impl StubDaemonBuilder {
    /// Register a handler for `event`
    pub fn handle<F>(mut self, event: &str, handler: F) -> Self
    where
        F: Fn(serde_json::Value) -> std::result::Result<serde_json::Value, String>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(event.to_string(), Arc::new(handler));
        self
    }

    /// Bind the listener and start accepting panels
    pub async fn bind(self, addr: &str) -> Result<StubDaemon> {
        let listener = TcpListener::bind(addr).await.map_err(|e| LinkError::IoError {
            path: addr.into(),
            message: e.to_string(),
        })?;
        let local_addr = listener.local_addr()?;
        let (events, _) = broadcast::channel(256);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let state = Arc::new(DaemonState {
            api_key: self.api_key,
            handlers: self.handlers,
            clients: AtomicUsize::new(0),
        });

        tracing::info!("Stub daemon listening on ws://{}", local_addr);
        let task = tokio::spawn(accept_loop(
            listener,
            state.clone(),
            events.clone(),
            shutdown_rx,
        ));

        Ok(StubDaemon {
            addr: local_addr,
            state,
            events,
            shutdown: Some(shutdown_tx),
            task,
        })
    }
}

/// Running stub daemon; stops when shut down or dropped
pub struct StubDaemon {
    addr: SocketAddr,
    state: Arc<DaemonState>,
    events: broadcast::Sender<Broadcast>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl StubDaemon {
    pub fn builder(api_key: impl Into<String>) -> StubDaemonBuilder {
        StubDaemonBuilder {
            api_key: api_key.into(),
            handlers: HashMap::new(),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connections currently open
    pub fn connected_clients(&self) -> usize {
        self.state.clients.load(Ordering::SeqCst)
    }

    /// Push an event to every authenticated panel. Returns the number of
    /// connections it was queued for.
    pub fn broadcast(&self, scope: EventScope, event: &str, payload: serde_json::Value) -> usize {
        self.events
            .send(Broadcast::Event {
                scope,
                event: event.to_string(),
                payload,
            })
            .unwrap_or(0)
    }

    /// Close every open connection; the listener keeps accepting
    pub fn kick_all(&self) {
        let _ = self.events.send(Broadcast::Kick);
    }

    /// Stop accepting and close every connection
    pub async fn shutdown(mut self) {
        self.kick_all();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for StubDaemon {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            let _ = self.events.send(Broadcast::Kick);
            self.task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<DaemonState>,
    events: broadcast::Sender<Broadcast>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Stub daemon stopped");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        tracing::info!("Accepted panel connection from {}", addr);
                        let state = state.clone();
                        let events = events.subscribe();
                        tokio::spawn(async move {
                            connection::handle_connection(stream, state, events).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                    }
                }
            }
        }
    }
}

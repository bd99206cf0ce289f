//! Daemon session: one persistent, authenticated link to a daemon node
//!
//! # State machine
//!
//! ```text
//!            connect()             opened              auth == true
//!   Idle ─────────────► Connecting ──────► Authenticating ──────────► Ready
//!    ▲                      │                    │   auth != true       │
//!    │   closed / error     │                    └─────────► Unauthorized
//!    └──────────────────────┴──────────── (any live phase) ◄────────────┘
//! ```
//!
//! Every transport signal is tagged with the generation of the link that
//! produced it. `connect()` on a live session tears the old link down first
//! (aborting its signal pump), so at most one set of lifecycle handlers is
//! ever attached and signals from a replaced link are ignored.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{ConnectOptions, NodeConfig, PanelConfig};
use crate::error::{LinkError, Result};
use crate::remote::pending::{PendingCalls, Reply};
use crate::remote::protocol::{
    DaemonMessage, EventScope, NodeEvent, PanelMessage, AUTH_EVENT, STATUS_OK,
};
use crate::remote::router::{EventRouter, Subscription, SubscriptionId};
use crate::remote::transport::{Connector, Transport, TransportSignal};

/// Timeouts and limits shared by every session of a registry
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub call_timeout: Duration,
    pub auth_timeout: Duration,
    pub connect_timeout: Duration,
    pub event_queue_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&PanelConfig::default())
    }
}

impl From<&PanelConfig> for SessionSettings {
    fn from(config: &PanelConfig) -> Self {
        Self {
            call_timeout: Duration::from_millis(config.timeouts.call_ms),
            auth_timeout: Duration::from_millis(config.timeouts.auth_ms),
            connect_timeout: Duration::from_millis(config.timeouts.connect_ms),
            event_queue_capacity: config.events.queue_capacity,
        }
    }
}

/// Connection phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No transport
    Idle,
    /// Transport opening
    Connecting,
    /// Transport open, auth handshake in flight
    Authenticating,
    /// Authenticated, calls allowed
    Ready,
    /// Transport open but the last auth attempt failed
    Unauthorized,
}

impl SessionPhase {
    fn is_open(self) -> bool {
        matches!(self, Self::Authenticating | Self::Ready | Self::Unauthorized)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Unauthorized => "unauthorized",
        };
        f.write_str(name)
    }
}

/// Per-call options
#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    pub timeout: Duration,
    /// Fail fast with `ConnectionUnavailable` unless the session is authenticated
    pub require_ready: bool,
}

impl CallOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            require_ready: true,
        }
    }

    /// Allow the call on an open but not yet authenticated link
    pub fn during_handshake(mut self) -> Self {
        self.require_ready = false;
        self
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub phase: SessionPhase,
    pub available: bool,
    pub pending_calls: usize,
    pub subscriptions: usize,
    pub disconnects: u64,
    pub last_change: String,
}

struct Link {
    generation: u64,
    transport: Box<dyn Transport>,
    pump: JoinHandle<()>,
}

struct SessionState {
    phase: SessionPhase,
    available: bool,
    generation: u64,
    link: Option<Link>,
    last_change: DateTime<Utc>,
}

impl SessionState {
    fn set(&mut self, phase: SessionPhase, available: bool) {
        if self.phase != phase || self.available != available {
            self.phase = phase;
            self.available = available;
            self.last_change = Utc::now();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.link
            .as_ref()
            .map(|link| link.generation == generation)
            .unwrap_or(false)
    }
}

struct Inner {
    id: String,
    config: RwLock<NodeConfig>,
    settings: SessionSettings,
    connector: Arc<dyn Connector>,
    state: Mutex<SessionState>,
    pending: PendingCalls,
    router: EventRouter,
    disconnects: AtomicU64,
    watch_tx: watch::Sender<(SessionPhase, bool)>,
}

/// Session with one daemon node. Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct DaemonSession {
    inner: Arc<Inner>,
}

impl fmt::Debug for DaemonSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonSession")
            .field("id", &self.inner.id)
            .field("phase", &self.phase())
            .finish()
    }
}

impl DaemonSession {
    /// Create an idle session; nothing is opened until `connect()`
    pub fn new(
        config: NodeConfig,
        connector: Arc<dyn Connector>,
        settings: SessionSettings,
    ) -> Self {
        let (watch_tx, _) = watch::channel((SessionPhase::Idle, false));
        let id = config.id.clone();
        Self {
            inner: Arc::new(Inner {
                pending: PendingCalls::new(id.clone()),
                router: EventRouter::new(id.clone(), settings.event_queue_capacity),
                id,
                config: RwLock::new(config),
                settings,
                connector,
                state: Mutex::new(SessionState {
                    phase: SessionPhase::Idle,
                    available: false,
                    generation: 0,
                    link: None,
                    last_change: Utc::now(),
                }),
                disconnects: AtomicU64::new(0),
                watch_tx,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> NodeConfig {
        self.inner.config.read().clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.state.lock().phase
    }

    /// True only between a successful auth and the next disconnect or failed auth
    pub fn is_available(&self) -> bool {
        self.inner.state.lock().available
    }

    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn status(&self) -> SessionStatus {
        // Lock order: state before config
        let state = self.inner.state.lock();
        let config = self.inner.config.read();
        SessionStatus {
            id: self.inner.id.clone(),
            address: config.address.clone(),
            port: config.port,
            phase: state.phase,
            available: state.available,
            pending_calls: self.inner.pending.len(),
            subscriptions: self.inner.router.subscriber_count(),
            disconnects: self.inner.disconnects.load(Ordering::Relaxed),
            last_change: state.last_change.to_rfc3339(),
        }
    }

    fn describe(&self) -> String {
        self.inner.config.read().describe()
    }

    fn notify(&self, state: &SessionState) {
        self.inner.watch_tx.send_replace((state.phase, state.available));
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Open a new link to the daemon. Returns immediately; progress is
    /// observable through `phase()`, `is_available()` and the wait helpers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self, options: Option<ConnectOptions>) {
        if let Some(options) = options {
            self.inner.config.write().connect = options;
        }

        let mut state = self.inner.state.lock();
        let phase = state.phase;
        match phase {
            phase if phase.is_open() => {
                tracing::info!("Resetting daemon connection: {}", self.describe());
                self.teardown(&mut state);
            }
            SessionPhase::Connecting if state.link.is_some() => {
                drop(state);
                tracing::info!("Replacing pending daemon connection: {}", self.describe());
                self.refresh_reconnect();
                return;
            }
            _ => {}
        }
        self.open_link(&mut state);
    }

    /// Drop the current link (if any) and connect again
    pub fn refresh_reconnect(&self) {
        self.disconnect();
        self.connect(None);
    }

    /// Close the link and fail pending calls. Safe to call at any time.
    pub fn disconnect(&self) {
        let mut state = self.inner.state.lock();
        if state.link.is_some() {
            tracing::info!("Closing daemon connection: {}", self.describe());
        }
        self.teardown(&mut state);
    }

    fn teardown(&self, state: &mut SessionState) {
        if let Some(mut link) = state.link.take() {
            link.pump.abort();
            link.transport.close();
        }
        state.set(SessionPhase::Idle, false);
        self.notify(state);

        let failed = self.inner.pending.fail_all();
        if failed > 0 {
            tracing::warn!(
                "{} pending call(s) failed, connection closed: {}",
                failed,
                self.describe()
            );
        }
    }

    fn open_link(&self, state: &mut SessionState) {
        let config = self.inner.config.read().clone();
        let timeout = config
            .connect
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.inner.settings.connect_timeout);

        state.generation += 1;
        let generation = state.generation;
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();

        tracing::info!("Connecting to daemon: {} ({})", config.describe(), config.url());
        let transport = self.inner.connector.open(&config.url(), timeout, signals_tx);
        let pump = tokio::spawn(pump_signals(
            Arc::downgrade(&self.inner),
            generation,
            signals_rx,
        ));

        state.link = Some(Link {
            generation,
            transport,
            pump,
        });
        state.set(SessionPhase::Connecting, false);
        self.notify(state);
    }

    fn handle_signal(&self, generation: u64, signal: TransportSignal) {
        match signal {
            TransportSignal::Opened => self.on_connect(generation),
            TransportSignal::Message(message) => {
                if !self.inner.state.lock().is_current(generation) {
                    return;
                }
                match message {
                    DaemonMessage::Response { id, status, result } => {
                        self.inner.pending.settle(id, Reply { status, result });
                    }
                    DaemonMessage::Event {
                        scope,
                        event,
                        payload,
                    } => {
                        self.inner.router.dispatch(NodeEvent {
                            scope,
                            event,
                            payload,
                        });
                    }
                }
            }
            TransportSignal::Closed => self.on_disconnect(generation, None),
            TransportSignal::Error(reason) => self.on_disconnect(generation, Some(reason)),
        }
    }

    fn on_connect(&self, generation: u64) {
        {
            let mut state = self.inner.state.lock();
            if !state.is_current(generation) {
                return;
            }
            state.set(SessionPhase::Authenticating, false);
            self.notify(&state);
        }
        tracing::info!("Connected to daemon, authenticating: {}", self.describe());

        // Runs off the pump: the auth response arrives through the pump
        let session = self.clone();
        tokio::spawn(async move {
            let _ = session.authenticate(generation, None).await;
        });
    }

    fn on_disconnect(&self, generation: u64, reason: Option<LinkError>) {
        {
            let mut state = self.inner.state.lock();
            if !state.is_current(generation) {
                return;
            }
            // The transport already finished; releasing it is enough
            state.link = None;
            state.set(SessionPhase::Idle, false);
            self.notify(&state);
        }
        self.inner.disconnects.fetch_add(1, Ordering::Relaxed);

        match reason {
            Some(reason) => {
                tracing::warn!("Daemon connection error: {}: {}", self.describe(), reason)
            }
            None => tracing::info!("Daemon disconnected: {}", self.describe()),
        }

        let failed = self.inner.pending.fail_all();
        if failed > 0 {
            tracing::warn!(
                "{} pending call(s) failed, connection lost: {}",
                failed,
                self.describe()
            );
        }
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    /// Run the auth handshake on the current link, optionally rotating the API key first.
    ///
    /// Succeeds only if the daemon answers exactly `true`. Any other outcome
    /// leaves the session unavailable and is returned as the error.
    pub async fn auth(&self, key: Option<&str>) -> Result<()> {
        let generation = self.inner.state.lock().generation;
        self.authenticate(generation, key).await
    }

    async fn authenticate(&self, generation: u64, key: Option<&str>) -> Result<()> {
        if let Some(key) = key {
            self.inner.config.write().api_key = key.to_string();
        }
        let api_key = self.inner.config.read().api_key.clone();
        let options = CallOptions::new(self.inner.settings.auth_timeout).during_handshake();
        let outcome = self
            .request(AUTH_EVENT, serde_json::Value::String(api_key), options)
            .await;

        let mut state = self.inner.state.lock();
        let current = state.is_current(generation);
        match outcome {
            Ok(serde_json::Value::Bool(true)) if current => {
                state.set(SessionPhase::Ready, true);
                self.notify(&state);
                drop(state);
                tracing::info!("Daemon authenticated: {}", self.describe());
                Ok(())
            }
            Ok(serde_json::Value::Bool(true)) => {
                // The link this handshake ran on has been replaced
                Err(LinkError::ConnectionLost {
                    node: self.inner.id.clone(),
                })
            }
            Ok(answer) => {
                if current {
                    self.mark_unauthorized(&mut state);
                }
                drop(state);
                tracing::warn!(
                    "Daemon rejected API key: {} (answered {})",
                    self.describe(),
                    answer
                );
                Err(LinkError::AuthRejected {
                    node: self.inner.id.clone(),
                })
            }
            Err(e) => {
                if current {
                    self.mark_unauthorized(&mut state);
                }
                drop(state);
                tracing::warn!("Daemon authentication failed: {}: {}", self.describe(), e);
                Err(e)
            }
        }
    }

    fn mark_unauthorized(&self, state: &mut SessionState) {
        if state.phase.is_open() {
            state.set(SessionPhase::Unauthorized, false);
        } else {
            let phase = state.phase;
            state.set(phase, false);
        }
        self.notify(state);
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Correlated call on an authenticated session
    pub async fn call(
        &self,
        event: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        self.call_with(event, payload, CallOptions::new(timeout)).await
    }

    pub async fn call_with(
        &self,
        event: &str,
        payload: serde_json::Value,
        options: CallOptions,
    ) -> Result<serde_json::Value> {
        let result = self.request(event, payload, options).await;
        match &result {
            // The lifecycle handlers already logged the link going away
            Err(e) if e.is_connection_error() => {
                tracing::debug!("Call '{}' to daemon {} failed: {}", event, self.describe(), e);
            }
            Err(e) => {
                tracing::warn!("Call '{}' to daemon {} failed: {}", event, self.describe(), e);
            }
            Ok(_) => {}
        }
        result
    }

    async fn request(
        &self,
        event: &str,
        payload: serde_json::Value,
        options: CallOptions,
    ) -> Result<serde_json::Value> {
        let handle = {
            let state = self.inner.state.lock();
            let link = match state.link.as_ref() {
                Some(link) if state.phase.is_open() => link,
                _ => return Err(self.unavailable()),
            };
            if options.require_ready && !state.available {
                return Err(self.unavailable());
            }

            let handle = self.inner.pending.register(event, options.timeout);
            let message = PanelMessage::Request {
                id: handle.id,
                event: event.to_string(),
                payload,
            };
            if link.transport.send(message).is_err() {
                self.inner.pending.cancel(handle.id);
                return Err(LinkError::ConnectionLost {
                    node: self.inner.id.clone(),
                });
            }
            handle
        };

        let reply = self.inner.pending.wait(handle).await?;
        if reply.status == STATUS_OK {
            Ok(reply.result)
        } else {
            let message = match reply.result {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            };
            Err(LinkError::Remote {
                node: self.inner.id.clone(),
                event: event.to_string(),
                message,
            })
        }
    }

    fn unavailable(&self) -> LinkError {
        LinkError::ConnectionUnavailable {
            node: self.inner.id.clone(),
        }
    }

    /// Uncorrelated send; dropped silently without a transport
    pub fn emit_fire_and_forget(&self, event: &str, payload: serde_json::Value) {
        let state = self.inner.state.lock();
        if let Some(link) = state.link.as_ref() {
            let message = PanelMessage::Emit {
                event: event.to_string(),
                payload,
            };
            if let Err(e) = link.transport.send(message) {
                tracing::debug!("Dropped emit '{}' to {}: {}", event, self.describe(), e);
            }
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Subscribe to events on `scope`; survives reconnects
    pub fn subscribe(&self, scope: EventScope) -> Subscription {
        self.inner.router.subscribe(scope)
    }

    pub fn subscribe_fn<F>(&self, scope: EventScope, handler: F) -> SubscriptionId
    where
        F: FnMut(NodeEvent) + Send + 'static,
    {
        self.inner.router.subscribe_fn(scope, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.router.unsubscribe(id)
    }

    // ========================================================================
    // Configuration and teardown
    // ========================================================================

    /// Replace the node configuration, reconnecting if a link is up.
    /// The session id never changes.
    pub fn reconfigure(&self, mut config: NodeConfig) {
        if config.id != self.inner.id {
            tracing::warn!(
                "Ignoring id change {} -> {} for daemon session",
                self.inner.id,
                config.id
            );
            config.id = self.inner.id.clone();
        }
        *self.inner.config.write() = config;

        let live = self.inner.state.lock().link.is_some();
        if live {
            self.refresh_reconnect();
        }
    }

    /// Disconnect and drop every subscription
    pub fn shutdown(&self) {
        self.disconnect();
        self.inner.router.clear();
    }

    // ========================================================================
    // Waiting
    // ========================================================================

    /// Wait until the session is available; false on timeout
    pub async fn wait_available(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, |_, available| available).await
    }

    /// Wait until no connect or handshake is in flight and return the phase reached
    pub async fn wait_settled(&self, timeout: Duration) -> SessionPhase {
        self.wait_for(timeout, |phase, _| {
            !matches!(phase, SessionPhase::Connecting | SessionPhase::Authenticating)
        })
        .await;
        self.phase()
    }

    async fn wait_for<F>(&self, timeout: Duration, mut predicate: F) -> bool
    where
        F: FnMut(SessionPhase, bool) -> bool,
    {
        let mut rx = self.inner.watch_tx.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|(phase, available)| predicate(*phase, *available)),
        )
        .await;
        matches!(waited, Ok(Ok(_)))
    }
}

async fn pump_signals(
    inner: Weak<Inner>,
    generation: u64,
    mut signals: mpsc::UnboundedReceiver<TransportSignal>,
) {
    while let Some(signal) = signals.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let session = DaemonSession { inner };
        let terminal = matches!(
            signal,
            TransportSignal::Closed | TransportSignal::Error(_)
        );
        session.handle_signal(generation, signal);
        if terminal {
            return;
        }
    }
}

//! Remote daemon session layer
//!
//! Keeps one persistent, authenticated link per daemon node and carries
//! correlated calls and scoped events over it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              PANEL PROCESS                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │                  SessionRegistry (RwLock<HashMap>)              │    │
//! │  │                                                                 │    │
//! │  │  node_id_1 ──► DaemonSession {                                  │    │
//! │  │                  config, phase, available,                      │    │
//! │  │                  PendingCalls, EventRouter, Link?               │    │
//! │  │                }                                                │    │
//! │  │  node_id_2 ──► DaemonSession { ... }                            │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! │            ▲                                                            │
//! │            │ connect() on idle sessions, with backoff                   │
//! │        Supervisor                                                       │
//! │                                                                         │
//! │  Link ──► Transport (write side) + signal pump task (read side)         │
//! │    Opened  → auth handshake → Ready                                     │
//! │    Response → PendingCalls::settle                                      │
//! │    Event   → EventRouter::dispatch → per-subscriber queues              │
//! │    Closed / Error → Idle, pending calls fail with ConnectionLost        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol
//!
//! JSON text frames over WebSocket:
//!
//! ```json
//! // Panel -> Daemon
//! {"type": "request", "id": 1, "event": "auth", "payload": "api-key"}
//! {"type": "emit", "event": "stream/write", "payload": "..."}
//!
//! // Daemon -> Panel
//! {"type": "response", "id": 1, "status": 200, "result": true}
//! {"type": "event", "scope": "instance-uuid", "event": "stdout", "payload": "..."}
//! ```

pub(crate) mod backoff;
pub mod pending;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod session;
pub mod supervisor;
pub mod transport;

pub use protocol::{DaemonMessage, EventScope, NodeEvent, PanelMessage, STATUS_ERR, STATUS_OK};
pub use registry::{RegistryStats, SessionRegistry};
pub use router::{Subscription, SubscriptionId};
pub use session::{CallOptions, DaemonSession, SessionPhase, SessionSettings, SessionStatus};
pub use supervisor::{Supervisor, SupervisorHandle};
pub use transport::{Connector, Transport, TransportSignal, WsConnector};

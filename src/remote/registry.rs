//! Session registry
//!
//! Process-wide map of daemon sessions keyed by node id. Sessions are created
//! and discarded as nodes are added to or removed from the configuration.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::{NodeConfig, PanelConfig};
use crate::error::{LinkError, Result};
use crate::remote::session::{DaemonSession, SessionSettings, SessionStatus};
use crate::remote::transport::{Connector, WsConnector};

/// Node counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub available: usize,
}

pub struct SessionRegistry {
    connector: Arc<dyn Connector>,
    settings: SessionSettings,
    sessions: RwLock<HashMap<String, DaemonSession>>,
}

impl SessionRegistry {
    /// Create an empty registry whose sessions open links through `connector`
    pub fn new(connector: Arc<dyn Connector>, settings: SessionSettings) -> Self {
        Self {
            connector,
            settings,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Registry over the WebSocket transport with every node of `config` registered
    pub fn from_config(config: &PanelConfig) -> Self {
        Self::from_config_with(config, Arc::new(WsConnector))
    }

    pub fn from_config_with(config: &PanelConfig, connector: Arc<dyn Connector>) -> Self {
        let registry = Self::new(connector, SessionSettings::from(config));
        for node in &config.nodes {
            registry.add_node(node.clone());
        }
        registry
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Register a node. Does not connect. An existing session with the same
    /// id is shut down and replaced.
    pub fn add_node(&self, config: NodeConfig) -> DaemonSession {
        let id = config.id.clone();
        let describe = config.describe();
        let session = DaemonSession::new(config, self.connector.clone(), self.settings.clone());

        let previous = self.sessions.write().insert(id, session.clone());
        match previous {
            Some(old) => {
                tracing::info!("Replacing daemon session: {}", describe);
                old.shutdown();
            }
            None => tracing::info!("Registered daemon session: {}", describe),
        }
        session
    }

    /// Disconnect and discard a node's session. Returns false if unknown.
    pub fn remove_node(&self, id: &str) -> bool {
        let removed = self.sessions.write().remove(id);
        match removed {
            Some(session) => {
                tracing::info!("Removing daemon session: [{}]", id);
                session.shutdown();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Result<DaemonSession> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| LinkError::UnknownNodeId { id: id.to_string() })
    }

    /// Replace a node's configuration; a connected node reconnects with it
    pub fn edit_node(&self, config: NodeConfig) -> Result<()> {
        let session = self.get(&config.id)?;
        tracing::info!("Updating daemon session: {}", config.describe());
        session.reconfigure(config);
        Ok(())
    }

    pub fn connect_all(&self) {
        for session in self.sessions() {
            session.connect(None);
        }
    }

    pub fn disconnect_all(&self) {
        for session in self.sessions() {
            session.disconnect();
        }
    }

    /// Node ids in sorted order
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Sessions sorted by node id
    pub fn sessions(&self) -> Vec<DaemonSession> {
        let mut sessions: Vec<DaemonSession> = self.sessions.read().values().cloned().collect();
        sessions.sort_by(|a, b| a.id().cmp(b.id()));
        sessions
    }

    pub fn statuses(&self) -> Vec<SessionStatus> {
        self.sessions().iter().map(DaemonSession::status).collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let sessions = self.sessions.read();
        RegistryStats {
            total: sessions.len(),
            available: sessions.values().filter(|s| s.is_available()).count(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

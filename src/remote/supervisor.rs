//! Reconnect supervisor
//!
//! Sessions never reconnect on their own. The supervisor polls the registry
//! every `check_interval` and calls `connect()` on idle sessions, spacing the
//! attempts of each node with exponential backoff. A node seen `Ready` gets its
//! backoff reset. Sessions whose API key was rejected are left alone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::ReconnectConfig;
use crate::remote::backoff::Backoff;
use crate::remote::registry::SessionRegistry;
use crate::remote::session::SessionPhase;

struct NodeRetry {
    backoff: Backoff,
    next_attempt: Instant,
}

pub struct Supervisor {
    registry: Arc<SessionRegistry>,
    check_interval: Duration,
    base_ms: u64,
    max_ms: u64,
}

/// Stops the supervisor task
pub struct SupervisorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Stop the supervisor and wait for its task to finish
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.task.abort();
        }
    }
}

impl Supervisor {
    pub fn new(registry: Arc<SessionRegistry>, config: &ReconnectConfig) -> Self {
        Self {
            registry,
            check_interval: Duration::from_millis(config.check_interval_ms.max(1)),
            base_ms: config.base_ms,
            max_ms: config.max_ms,
        }
    }

    /// Start supervising on the current runtime
    pub fn spawn(self) -> SupervisorHandle {
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(self.run(rx));
        SupervisorHandle {
            shutdown: Some(tx),
            task,
        }
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        tracing::info!(
            "Reconnect supervisor started (check every {:?}, backoff {}ms..{}ms)",
            self.check_interval,
            self.base_ms,
            self.max_ms
        );
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut retries: HashMap<String, NodeRetry> = HashMap::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Reconnect supervisor stopped");
                    return;
                }
                _ = ticker.tick() => self.tick(&mut retries, Instant::now()),
            }
        }
    }

    fn tick(&self, retries: &mut HashMap<String, NodeRetry>, now: Instant) {
        let sessions = self.registry.sessions();
        // Forget nodes that were removed from the registry
        retries.retain(|id, _| sessions.iter().any(|s| s.id() == id));

        for session in sessions {
            let retry = retries
                .entry(session.id().to_string())
                .or_insert_with(|| NodeRetry {
                    backoff: Backoff::new(self.base_ms, self.max_ms),
                    next_attempt: now,
                });

            match session.phase() {
                SessionPhase::Ready => {
                    if retry.backoff.attempt() > 0 {
                        tracing::debug!("[{}] link healthy, backoff reset", session.id());
                    }
                    retry.backoff.reset();
                    retry.next_attempt = now;
                }
                SessionPhase::Idle if now >= retry.next_attempt => {
                    let attempt = retry.backoff.attempt();
                    let delay = retry.backoff.next_delay();
                    retry.next_attempt = now + delay;
                    tracing::info!(
                        "[{}] reconnecting (attempt {}, next retry not before {:?})",
                        session.id(),
                        attempt + 1,
                        delay
                    );
                    session.connect(None);
                }
                _ => {}
            }
        }
    }
}

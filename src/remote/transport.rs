//! Transport connection to a daemon node
//!
//! A [`Connector`] opens a connection in the background and reports its
//! lifecycle and inbound messages as [`TransportSignal`]s on a channel owned
//! by the session. The returned [`Transport`] is the write side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::{LinkError, Result};
use crate::remote::protocol::{DaemonMessage, PanelMessage};

/// Lifecycle and inbound traffic of one connection
#[derive(Debug)]
pub enum TransportSignal {
    /// The connection is established
    Opened,
    /// A message arrived from the daemon
    Message(DaemonMessage),
    /// The peer closed the connection
    Closed,
    /// Connecting failed or the connection broke
    Error(LinkError),
}

/// Sender half the connector reports signals on
pub type SignalSender = mpsc::UnboundedSender<TransportSignal>;

/// Opens connections to daemon nodes.
///
/// `open` must return immediately; establishment happens in the background and
/// is reported through `signals`. After a terminal signal (`Closed` or `Error`)
/// no further signals are sent. Closing the returned transport locally sends
/// no signal at all.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: &str, timeout: Duration, signals: SignalSender) -> Box<dyn Transport>;
}

/// Write side of an open (or opening) connection
pub trait Transport: Send + 'static {
    /// Queue a message; fails once the connection is gone
    fn send(&self, message: PanelMessage) -> Result<()>;

    /// Close the connection. Never fails.
    fn close(&mut self);
}

enum Outbound {
    Message(PanelMessage),
    Close,
}

/// WebSocket connector (JSON text frames)
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, url: &str, timeout: Duration, signals: SignalSender) -> Box<dyn Transport> {
        if url.starts_with("wss://") {
            install_crypto_provider();
        }
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let opened = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_socket(
            url.to_string(),
            timeout,
            opened.clone(),
            outbound_rx,
            signals,
        ));
        Box::new(WsTransport {
            url: url.to_string(),
            outbound: outbound_tx,
            opened,
            task,
        })
    }
}

/// rustls needs a process-wide provider before the first TLS handshake
fn install_crypto_provider() {
    // Err only means a provider is already installed
    let _ = rustls::crypto::ring::default_provider().install_default();
}

struct WsTransport {
    url: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    /// Set once the WebSocket handshake completed
    opened: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl WsTransport {
    fn shut(&self) {
        // Until the handshake completes there is nothing to close gracefully
        if !self.opened.load(Ordering::SeqCst) || self.outbound.send(Outbound::Close).is_err() {
            self.task.abort();
        }
    }
}

impl Transport for WsTransport {
    fn send(&self, message: PanelMessage) -> Result<()> {
        self.outbound
            .send(Outbound::Message(message))
            .map_err(|_| LinkError::ConnectionLost {
                node: self.url.clone(),
            })
    }

    fn close(&mut self) {
        self.shut();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.shut();
    }
}

async fn run_socket(
    url: String,
    timeout: Duration,
    opened: Arc<AtomicBool>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    signals: SignalSender,
) {
    let ws = match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => {
            tracing::debug!("WebSocket connect to {} failed: {}", url, e);
            let _ = signals.send(TransportSignal::Error(LinkError::from(e)));
            return;
        }
        Err(_) => {
            let _ = signals.send(TransportSignal::Error(LinkError::ConnectTimeout {
                url: url.clone(),
                timeout,
            }));
            return;
        }
    };

    opened.store(true, Ordering::SeqCst);
    let _ = signals.send(TransportSignal::Opened);
    let (mut writer, mut reader) = ws.split();

    loop {
        tokio::select! {
            cmd = outbound.recv() => {
                match cmd {
                    Some(Outbound::Message(message)) => {
                        let json = match serde_json::to_string(&message) {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::error!("Failed to encode message for {}: {}", url, e);
                                continue;
                            }
                        };
                        if let Err(e) = writer.send(Message::Text(json)).await {
                            let _ = signals.send(TransportSignal::Error(LinkError::from(e)));
                            return;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = writer.send(Message::Close(None)).await;
                        let _ = writer.close().await;
                        return;
                    }
                }
            }

            frame = reader.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<DaemonMessage>(&text) {
                            Ok(message) => {
                                let _ = signals.send(TransportSignal::Message(message));
                            }
                            Err(e) => {
                                tracing::warn!("Dropping malformed message from {}: {}", url, e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = signals.send(TransportSignal::Closed);
                        return;
                    }
                    Some(Ok(_)) => {
                        // Ping/pong handled by tungstenite; binary frames are not used
                    }
                    Some(Err(e)) => {
                        let _ = signals.send(TransportSignal::Error(LinkError::from(e)));
                        return;
                    }
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ws_connect_error_is_signalled() {
        // Bind then drop a listener to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let url = format!("ws://127.0.0.1:{}", port);
        let _transport = WsConnector.open(&url, Duration::from_secs(2), tx);

        match rx.recv().await {
            Some(TransportSignal::Error(LinkError::Transport(_))) => {}
            other => panic!("Expected Error signal, got {:?}", other),
        }
        // Terminal: nothing else follows
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_wss_url_reaches_tls_handshake() {
        use crate::config::NodeConfig;
        use tokio_tungstenite::tungstenite::error::{Error as WsError, UrlError};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let node = NodeConfig::new("n", "wss://127.0.0.1", port, "k");
        assert!(node.url().starts_with("wss://"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _transport = WsConnector.open(&node.url(), Duration::from_secs(5), tx);

        // Not a TLS server: hang up on the client hello
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);

        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap() {
            Some(TransportSignal::Error(LinkError::Transport(e))) => {
                assert!(
                    !matches!(*e, WsError::Url(UrlError::TlsFeatureNotEnabled)),
                    "TLS support missing: {}",
                    e
                );
            }
            other => panic!("Expected Transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_before_open_abandons_handshake() {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = WsConnector.open(
            &format!("ws://127.0.0.1:{}", port),
            Duration::from_secs(30),
            tx,
        );

        // Accept the TCP connection but never answer the upgrade request
        let (mut stream, _) = listener.accept().await.unwrap();
        transport.close();

        // Socket task is gone: no Opened, sender dropped
        let signal = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert!(signal.is_none());

        // The daemon side sees the client hang up
        let mut request = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut request))
            .await;
        assert!(read.is_ok());
    }

    #[tokio::test]
    async fn test_ws_send_after_failure_reports_lost() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = WsConnector.open(
            &format!("ws://127.0.0.1:{}", port),
            Duration::from_secs(2),
            tx,
        );
        // Drain until the socket task has finished
        while rx.recv().await.is_some() {}

        let result = transport.send(PanelMessage::Emit {
            event: "noop".into(),
            payload: serde_json::Value::Null,
        });
        assert!(matches!(result, Err(LinkError::ConnectionLost { .. })));
    }
}

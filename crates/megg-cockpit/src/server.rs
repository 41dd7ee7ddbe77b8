//! [`ConnectionHub`] – HTTP + WebSocket front door of the controller.
//!
//! Listens on `0.0.0.0:8765` by default.
//!
//! * WebSocket upgrades → one [`client`][crate::client] session per
//!   connection.
//! * Any other HTTP request → `200 OK` with a JSON health document carrying
//!   the current `SystemStatus`.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use megg_runtime::CoordinatorHandle;
use megg_types::MeggError;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client;

pub const DEFAULT_PORT: u16 = 8765;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub host: String,
    pub port: u16,
    /// Inbound messages per second allowed per client.
    pub rate_limit_per_sec: u32,
    /// A client that cannot accept a frame within this long is dropped.
    #[serde(with = "millis")]
    pub send_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            rate_limit_per_sec: 20,
            send_timeout: Duration::from_secs(5),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Connected clients, keyed by session id.
pub(crate) type Registry = Arc<RwLock<HashMap<Uuid, SocketAddr>>>;

/// Accepts clients and wires each one to the coordinator.
///
/// ```rust,no_run
/// # async fn demo(handle: megg_runtime::CoordinatorHandle) -> Result<(), megg_types::MeggError> {
/// use megg_cockpit::{ConnectionHub, HubConfig};
///
/// let hub = ConnectionHub::new(handle, HubConfig::default());
/// let listener = hub.bind().await?;
/// hub.serve(listener, async { let _ = tokio::signal::ctrl_c().await; }).await
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionHub {
    handle: CoordinatorHandle,
    config: HubConfig,
    clients: Registry,
}

impl ConnectionHub {
    pub fn new(handle: CoordinatorHandle, config: HubConfig) -> Self {
        Self {
            handle,
            config,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Number of open WebSocket sessions.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// # Errors
    ///
    /// [`MeggError::Bind`] when the address is unusable or taken.
    pub async fn bind(&self) -> Result<TcpListener, MeggError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        TcpListener::bind(&addr).await.map_err(|e| MeggError::Bind {
            addr,
            details: e.to_string(),
        })
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Open sessions keep running until their client leaves or the
    /// coordinator's bus closes.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), MeggError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "connection hub listening");
        }
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("connection hub no longer accepting clients");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let hub = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = hub.handle_connection(stream, peer).await {
                                warn!(%peer, error = %e, "connection error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept error"),
                },
            }
        }
    }

    /// Bind and serve in one call.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), MeggError> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), MeggError> {
        // `peek` leaves the request in place for the WebSocket handshake.
        let mut buf = [0u8; 1024];
        let n = stream.peek(&mut buf).await.map_err(|e| {
            MeggError::Channel(format!("peek error from {peer}: {e}"))
        })?;

        if is_websocket_upgrade(&String::from_utf8_lossy(&buf[..n])) {
            client::run_session(
                stream,
                peer,
                self.handle.clone(),
                self.clients.clone(),
                &self.config,
            )
            .await
        } else {
            debug!(%peer, "plain HTTP request");
            self.serve_status(stream).await
        }
    }

    async fn serve_status(&self, mut stream: TcpStream) -> Result<(), MeggError> {
        let status = self.handle.snapshot().await?;
        let body = serde_json::json!({
            "service": "megg",
            "version": env!("CARGO_PKG_VERSION"),
            "websocket": true,
            "clients": self.client_count().await,
            "status": status,
        })
        .to_string();
        let response = format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n\
             {}",
            body.len(),
            body
        );
        stream
            .write_all(response.as_bytes())
            .await
            .map_err(|e| MeggError::Channel(format!("HTTP write error: {e}")))
    }
}

pub(crate) fn is_websocket_upgrade(head: &str) -> bool {
    head.lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    })
}

use std::net::SocketAddr;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, error};

use crate::config::UdpBridgeConfig;
use crate::connection::UdpConnection;
use crate::registry::{ConnectionId, ConnectionRegistry};

pub const UDP_CONNECT_METHOD: &str = "udp/connect";
pub const UDP_CONNECT_MULTICAST_METHOD: &str = "udp/connectMulticast";
pub const UDP_CLOSE_METHOD: &str = "udp/close";
pub const UDP_WRITE_METHOD: &str = "udp/write";
pub const UDP_READ_METHOD: &str = "udp/read";

/// Result of a close operation. The `Display` forms are the exact strings the device side
///  receives over the wire.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum CloseStatus {
    Closed,
    NotFound,
}

impl Display for CloseStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseStatus::Closed => write!(f, "closed"),
            CloseStatus::NotFound => write!(f, "not found"),
        }
    }
}


/// The five operations the remote-call transport binds to the method names above. None of them
///  raises an error towards the caller: failures collapse into the sentinel id, a zero byte
///  count, an empty buffer or a "not found" status, and are logged here.
#[async_trait]
pub trait UdpBridgeApi: Send + Sync + 'static {
    /// Opens a unicast connection bound to `host:port`, returning its id, or
    ///  [`ConnectionId::NONE`] if the socket could not be set up.
    async fn connect(&self, host: &str, port: u16) -> ConnectionId;

    /// Opens a multicast connection joined to `group` and bound to `(0.0.0.0, port)`,
    ///  returning its id, or [`ConnectionId::NONE`] if binding or joining failed.
    async fn connect_multicast(&self, group: &str, port: u16) -> ConnectionId;

    /// Stops the connection's receive task, releases its socket and forgets its id.
    async fn close(&self, id: ConnectionId) -> CloseStatus;

    /// Sends `payload` to `dest_host:dest_port` through the connection's socket. Returns the
    ///  number of bytes sent, 0 for an unknown id or a failed send.
    async fn write(&self, id: ConnectionId, dest_host: &str, dest_port: u16, payload: &[u8]) -> usize;

    /// Returns up to `max_bytes` of framed received data (see [`crate::packet_frame`]), empty
    ///  if the id is unknown or nothing is queued.
    async fn read(&self, id: ConnectionId, max_bytes: usize) -> Bytes;
}


/// The connection manager: owns the registry and implements [`UdpBridgeApi`] in terms of it.
pub struct UdpBridge {
    config: Arc<UdpBridgeConfig>,
    registry: ConnectionRegistry,
}

impl UdpBridge {
    pub fn new(config: UdpBridgeConfig) -> anyhow::Result<UdpBridge> {
        config.validate()?;

        Ok(UdpBridge {
            config: Arc::new(config),
            registry: ConnectionRegistry::new(),
        })
    }

    pub async fn num_connections(&self) -> usize {
        self.registry.len().await
    }

    /// the address a connection's socket actually bound to - for callers that opened port 0
    pub async fn local_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.registry.get(id).await
            .map(|conn| conn.local_addr())
    }

    /// Whether a connection's receive task is still running. A connection whose task died
    ///  stays registered and writable until it is closed - it just stops receiving. Callers
    ///  deciding to deregister such connections do so through [`UdpBridgeApi::close`].
    pub async fn is_receive_alive(&self, id: ConnectionId) -> Option<bool> {
        self.registry.get(id).await
            .map(|conn| conn.is_receive_alive())
    }

    async fn register(&self, opened: anyhow::Result<UdpConnection>, kind: &str, host: &str, port: u16) -> ConnectionId {
        match opened {
            Ok(conn) => {
                let id = conn.id();
                self.registry.insert(Arc::new(conn)).await;
                debug!("{}: {}:{} -> connection {}", kind, host, port, id);
                id
            }
            Err(e) => {
                error!("{}: error opening {}:{}: {}", kind, host, port, e);
                ConnectionId::NONE
            }
        }
    }
}

#[async_trait]
impl UdpBridgeApi for UdpBridge {
    async fn connect(&self, host: &str, port: u16) -> ConnectionId {
        let id = self.registry.allocate();
        let opened = UdpConnection::open(id, host, port, self.config.clone()).await;
        self.register(opened, UDP_CONNECT_METHOD, host, port).await
    }

    async fn connect_multicast(&self, group: &str, port: u16) -> ConnectionId {
        let id = self.registry.allocate();
        let opened = UdpConnection::open_multicast(id, group, port, self.config.clone()).await;
        self.register(opened, UDP_CONNECT_MULTICAST_METHOD, group, port).await
    }

    async fn close(&self, id: ConnectionId) -> CloseStatus {
        // taking the connection out of the table first keeps a concurrent second close from
        //  blocking behind this one's join wait - it just finds the id gone
        match self.registry.remove(id).await {
            Some(conn) => {
                conn.shutdown().await;
                debug!("closed connection {}", id);
                CloseStatus::Closed
            }
            None => {
                debug!("close for unknown connection {}", id);
                CloseStatus::NotFound
            }
        }
    }

    async fn write(&self, id: ConnectionId, dest_host: &str, dest_port: u16, payload: &[u8]) -> usize {
        let conn = match self.registry.get(id).await {
            Some(conn) => conn,
            None => {
                debug!("write to unknown connection {}", id);
                return 0;
            }
        };

        // the send happens outside the table lock so a slow network stack cannot stall
        //  unrelated connections' operations
        match conn.send_to(dest_host, dest_port, payload).await {
            Ok(num_sent) => num_sent,
            Err(e) => {
                error!("error sending on connection {}: {}", id, e);
                0
            }
        }
    }

    async fn read(&self, id: ConnectionId, max_bytes: usize) -> Bytes {
        match self.registry.get(id).await {
            None => Bytes::new(),
            Some(conn) => conn.read(max_bytes).await,
        }
    }
}

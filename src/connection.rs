use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::bail;
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::config::UdpBridgeConfig;
use crate::packet_frame::PacketFrame;
use crate::packet_queue::PacketQueue;
use crate::registry::ConnectionId;

/// One bridged UDP socket: the socket itself, the background task that frames and queues
///  everything the socket receives, and the queue the caller drains through `read`.
///
/// A connection only ever exists with its receive task running - construction spawns the task,
///  and the only way to stop it is [`UdpConnection::shutdown`]. The task polls the socket in
///  bounded waits so it notices the shutdown flag within one [`UdpBridgeConfig::recv_poll_timeout`]
///  interval without having to be interrupted mid-receive.
pub struct UdpConnection {
    id: ConnectionId,
    local_addr: SocketAddr,
    multicast: bool,
    socket: Arc<UdpSocket>,
    queue: Arc<PacketQueue>,
    running: Arc<AtomicBool>,
    receive_alive: Arc<AtomicBool>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    config: Arc<UdpBridgeConfig>,
}

impl Drop for UdpConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.receive_task.get_mut().take() {
            handle.abort();
        }
    }
}

impl UdpConnection {
    /// Opens a unicast connection bound to the given local endpoint. The hostname is resolved,
    ///  and the first IPv4 address is used - the framing header has no room for anything else.
    pub async fn open(id: ConnectionId, host: &str, port: u16, config: Arc<UdpBridgeConfig>) -> anyhow::Result<UdpConnection> {
        let bind_addr = Self::resolve_v4(host, port).await?;
        let socket = Self::bind_reuse_addr(bind_addr)?;

        Self::start(id, socket, false, config)
    }

    /// Opens a multicast connection: bound to `(0.0.0.0, port)`, joined to the given group on
    ///  the default interface. Group membership, not the bind address, determines which
    ///  multicast traffic is received, so the socket deliberately binds to the any-address.
    pub async fn open_multicast(id: ConnectionId, group: &str, port: u16, config: Arc<UdpBridgeConfig>) -> anyhow::Result<UdpConnection> {
        let group: Ipv4Addr = group.parse()?;

        let socket = Self::bind_reuse_addr(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
        socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;

        Self::start(id, socket, true, config)
    }

    async fn resolve_v4(host: &str, port: u16) -> anyhow::Result<SocketAddrV4> {
        let resolved = lookup_host((host, port)).await?
            .find_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(v4),
                SocketAddr::V6(_) => None,
            });

        match resolved {
            Some(addr) => Ok(addr),
            None => bail!("{} does not resolve to an IPv4 address", host),
        }
    }

    /// The device side re-opens connections on ports it just gave up, so the socket gets
    ///  SO_REUSEADDR before binding. That requires assembling it outside tokio.
    fn bind_reuse_addr(bind_addr: SocketAddrV4) -> anyhow::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&SocketAddr::V4(bind_addr).into())?;
        socket.set_nonblocking(true)?;

        Ok(UdpSocket::from_std(socket.into())?)
    }

    fn start(id: ConnectionId, socket: UdpSocket, multicast: bool, config: Arc<UdpBridgeConfig>) -> anyhow::Result<UdpConnection> {
        let socket = Arc::new(socket);
        let local_addr = socket.local_addr()?;
        let queue = Arc::new(PacketQueue::new());
        let running = Arc::new(AtomicBool::new(true));
        let receive_alive = Arc::new(AtomicBool::new(true));

        let handle = tokio::spawn(Self::recv_loop(
            id,
            socket.clone(),
            queue.clone(),
            running.clone(),
            receive_alive.clone(),
            config.clone(),
        ));

        info!("connection {}: bound {} socket to {:?}", id, if multicast { "multicast" } else { "unicast" }, local_addr);

        Ok(UdpConnection {
            id,
            local_addr,
            multicast,
            socket,
            queue,
            running,
            receive_alive,
            receive_task: Mutex::new(Some(handle)),
            config,
        })
    }

    async fn recv_loop(
        id: ConnectionId,
        socket: Arc<UdpSocket>,
        queue: Arc<PacketQueue>,
        running: Arc<AtomicBool>,
        receive_alive: Arc<AtomicBool>,
        config: Arc<UdpBridgeConfig>,
    ) {
        let mut buf = vec![0u8; config.recv_buffer_size];

        while running.load(Ordering::Acquire) {
            let (num_read, from) = match timeout(config.recv_poll_timeout, socket.recv_from(&mut buf)).await {
                Err(_elapsed) => continue,
                Ok(Ok(x)) => x,
                Ok(Err(e)) => {
                    if running.load(Ordering::Acquire) {
                        error!("connection {}: error receiving datagram: {}", id, e);
                    }
                    break;
                }
            };

            if num_read == 0 {
                // zero-length datagrams carry nothing to frame
                continue;
            }

            let source = match from {
                SocketAddr::V4(v4) => v4,
                SocketAddr::V6(_) => {
                    warn!("connection {}: dropping datagram from non-IPv4 peer {:?}", id, from);
                    continue;
                }
            };

            trace!("connection {}: received {} bytes from {:?}", id, num_read, source);

            let frame = PacketFrame::new(source, Bytes::copy_from_slice(&buf[..num_read]));
            queue.push(frame.to_bytes()).await;
        }

        receive_alive.store(false, Ordering::Release);
        debug!("connection {}: receive task terminated", id);
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// the address the socket actually bound to - port 0 requests resolve here
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_multicast(&self) -> bool {
        self.multicast
    }

    /// Cleared once the receive task has exited, whether through shutdown or a socket failure.
    ///  A connection with a dead receive task stays registered and writable until it is closed;
    ///  it just stops accumulating received data.
    pub fn is_receive_alive(&self) -> bool {
        self.receive_alive.load(Ordering::Acquire)
    }

    pub async fn read(&self, max_bytes: usize) -> Bytes {
        self.queue.read(max_bytes).await
    }

    pub async fn num_queued_records(&self) -> usize {
        self.queue.num_records().await
    }

    /// Sends the payload to an arbitrary destination through this connection's socket,
    ///  independent of the receive queue and of the local endpoint the socket is bound to.
    pub async fn send_to(&self, dest_host: &str, dest_port: u16, payload: &[u8]) -> anyhow::Result<usize> {
        let num_sent = self.socket.send_to(payload, (dest_host, dest_port)).await?;
        trace!("connection {}: sent {} bytes to {}:{}", self.id, num_sent, dest_host, dest_port);
        Ok(num_sent)
    }

    /// Stops the receive task and waits for it to exit, bounded by
    ///  [`UdpBridgeConfig::close_join_timeout`]. A task that does not come back in time is
    ///  aborted. The socket is released when the connection is dropped.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::Release);

        let handle = self.receive_task.lock().await.take();
        if let Some(mut handle) = handle {
            match timeout(self.config.close_join_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("connection {}: receive task failed during shutdown: {}", self.id, e),
                Err(_elapsed) => {
                    warn!("connection {}: receive task did not stop within {:?}, aborting it", self.id, self.config.close_join_timeout);
                    handle.abort();
                }
            }
        }

        debug!("connection {} shut down", self.id);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    async fn read_framed(conn: &UdpConnection) -> PacketFrame {
        let raw = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let data = conn.read(usize::MAX).await;
                if !data.is_empty() {
                    return data;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }).await.expect("no datagram was queued in time");

        let mut b: &[u8] = &raw;
        let frame = PacketFrame::deser(&mut b).unwrap();
        assert!(b.is_empty());
        frame
    }

    #[tokio::test]
    async fn test_open_receives_framed_datagram() {
        let config = Arc::new(UdpBridgeConfig::default());
        let conn = UdpConnection::open(ConnectionId(1), "127.0.0.1", 0, config).await.unwrap();

        assert_ne!(conn.local_addr().port(), 0);
        assert!(!conn.is_multicast());
        assert!(conn.is_receive_alive());

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(b"hello", conn.local_addr()).await.unwrap();

        let frame = read_framed(&conn).await;
        assert_eq!(frame.source_addr, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(frame.source_port, peer.local_addr().unwrap().port());
        assert_eq!(frame.payload, Bytes::from_static(b"hello"));

        assert!(conn.read(usize::MAX).await.is_empty());
        conn.shutdown().await;
    }

    #[tokio::test]
    async fn test_datagram_boundaries_preserved_in_arrival_order() {
        let config = Arc::new(UdpBridgeConfig::default());
        let conn = UdpConnection::open(ConnectionId(2), "127.0.0.1", 0, config).await.unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(b"one", conn.local_addr()).await.unwrap();
        peer.send_to(b"f o u r", conn.local_addr()).await.unwrap();

        assert_eq!(read_framed(&conn).await.payload, Bytes::from_static(b"one"));
        assert_eq!(read_framed(&conn).await.payload, Bytes::from_static(b"f o u r"));

        conn.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_to_bypasses_queue() {
        let config = Arc::new(UdpBridgeConfig::default());
        let conn = UdpConnection::open(ConnectionId(3), "127.0.0.1", 0, config).await.unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_port = peer.local_addr().unwrap().port();

        let num_sent = conn.send_to("127.0.0.1", peer_port, b"ping").await.unwrap();
        assert_eq!(num_sent, 4);

        let mut buf = [0u8; 64];
        let (n, _) = tokio::time::timeout(Duration::from_secs(5), peer.recv_from(&mut buf)).await.unwrap().unwrap();
        // the payload goes out raw - framing applies only to queued received data
        assert_eq!(&buf[..n], b"ping");

        assert!(conn.read(usize::MAX).await.is_empty());
        conn.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_prompt_and_stops_receive_task() {
        let config = Arc::new(UdpBridgeConfig::default());
        let conn = UdpConnection::open(ConnectionId(4), "127.0.0.1", 0, config.clone()).await.unwrap();
        assert!(conn.is_receive_alive());

        let before = Instant::now();
        conn.shutdown().await;

        // one poll interval for the task to notice the flag, plus scheduling slack
        assert!(before.elapsed() < config.recv_poll_timeout + config.close_join_timeout);
        assert!(!conn.is_receive_alive());
    }

    #[tokio::test]
    async fn test_open_unresolvable_host_fails() {
        let config = Arc::new(UdpBridgeConfig::default());
        assert!(UdpConnection::open(ConnectionId(5), "host.invalid.", 0, config).await.is_err());
    }

    #[tokio::test]
    async fn test_open_multicast_non_address_group_fails() {
        let config = Arc::new(UdpBridgeConfig::default());
        assert!(UdpConnection::open_multicast(ConnectionId(6), "not-an-address", 9001, config).await.is_err());
    }
}

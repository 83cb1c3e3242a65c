use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::Mutex;

use crate::connection::UdpConnection;

/// Opaque handle for one bridged UDP socket. Handles are process-unique, strictly increasing
///  and never reused while the process runs; [`ConnectionId::NONE`] (zero) is the sentinel a
///  caller gets when opening a connection failed.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Ord, PartialOrd)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    pub const NONE: ConnectionId = ConnectionId(0);

    pub fn to_raw(self) -> u32 {
        self.0
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}


/// The process-wide table of open connections. All membership changes go through this one
///  mutex, so a close racing a read or write on the same id observes the connection either
///  fully present or fully absent, never half-removed.
pub struct ConnectionRegistry {
    next_id: AtomicU32,
    connections: Mutex<FxHashMap<ConnectionId, Arc<UdpConnection>>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> ConnectionRegistry {
        ConnectionRegistry {
            next_id: AtomicU32::new(1),
            connections: Mutex::new(FxHashMap::default()),
        }
    }

    /// Hands out the next connection id. Ids allocated for connections that then fail to open
    ///  are discarded, leaving gaps - the sequence stays strictly increasing either way.
    pub fn allocate(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::AcqRel))
    }

    pub async fn insert(&self, connection: Arc<UdpConnection>) {
        let prev = self.connections.lock().await
            .insert(connection.id(), connection);
        debug_assert!(prev.is_none(), "connection ids are never reused");
    }

    pub async fn get(&self, id: ConnectionId) -> Option<Arc<UdpConnection>> {
        self.connections.lock().await
            .get(&id)
            .cloned()
    }

    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<UdpConnection>> {
        self.connections.lock().await
            .remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UdpBridgeConfig;

    #[test]
    fn test_allocate_strictly_increasing_and_nonzero() {
        let registry = ConnectionRegistry::new();

        let mut prev = ConnectionId::NONE;
        for _ in 0..100 {
            let id = registry.allocate();
            assert!(id > prev);
            assert_ne!(id, ConnectionId::NONE);
            prev = id;
        }
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let registry = ConnectionRegistry::new();
        let config = Arc::new(UdpBridgeConfig::default());

        let id = registry.allocate();
        let conn = Arc::new(UdpConnection::open(id, "127.0.0.1", 0, config).await.unwrap());
        registry.insert(conn.clone()).await;

        assert_eq!(registry.len().await, 1);
        assert!(registry.get(id).await.is_some());
        assert!(registry.get(registry.allocate()).await.is_none());

        let removed = registry.remove(id).await.unwrap();
        assert_eq!(removed.id(), id);
        assert!(registry.get(id).await.is_none());
        assert!(registry.remove(id).await.is_none());
        assert_eq!(registry.len().await, 0);

        removed.shutdown().await;
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId(17).to_string(), "#17");
        assert_eq!(ConnectionId::NONE.to_raw(), 0);
    }
}

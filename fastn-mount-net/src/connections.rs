use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Cache of live connections, one per remote node.
///
/// All protocol streams to a peer share one connection. A cached connection
/// that has been closed is dropped and re-established on the next use.
#[derive(Clone, Default)]
pub struct PeerConnections {
    connections: Arc<Mutex<HashMap<iroh::NodeId, iroh::endpoint::Connection>>>,
}

impl PeerConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached connection to `addr.node_id`, or connect.
    ///
    /// The lock is not held while connecting; two concurrent callers may both
    /// connect, in which case the later connection replaces the earlier one in
    /// the cache and both remain usable.
    pub async fn get_or_connect(
        &self,
        endpoint: &iroh::Endpoint,
        addr: iroh::NodeAddr,
    ) -> eyre::Result<iroh::endpoint::Connection> {
        let node_id = addr.node_id;
        if let Some(conn) = self.cached(&node_id) {
            return Ok(conn);
        }

        tracing::debug!(%node_id, "connecting to peer");
        let conn = endpoint
            .connect(addr, crate::ALPN_MOUNT)
            .await
            .map_err(|e| eyre::eyre!("failed to connect to {node_id}: {e}"))?;

        self.lock().insert(node_id, conn.clone());
        Ok(conn)
    }

    /// Forget the connection to `node_id` (e.g. after a failed stream open).
    pub fn forget(&self, node_id: &iroh::NodeId) {
        self.lock().remove(node_id);
    }

    fn cached(&self, node_id: &iroh::NodeId) -> Option<iroh::endpoint::Connection> {
        let mut connections = self.lock();
        match connections.get(node_id) {
            Some(conn) if conn.close_reason().is_none() => Some(conn.clone()),
            Some(_) => {
                connections.remove(node_id);
                None
            }
            None => None,
        }
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<iroh::NodeId, iroh::endpoint::Connection>> {
        // a poisoned cache only holds connection handles, which stay valid
        self.connections
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

//! In-process [`PeerNetwork`] for tests and embedding.
//!
//! Peers join a shared [`MemoryHub`]; a stream between two of them is a
//! `tokio::io::duplex` pipe handed to the remote handler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{BoxedStream, IncomingStream, IncomingStreams, PeerNetwork};
use crate::{NetAddr, PeerId, ProtocolName};

const PIPE_CAPACITY: usize = 64 * 1024;

type Handlers = HashMap<ProtocolName, tokio::sync::mpsc::Sender<IncomingStream>>;

#[derive(Clone, Default)]
pub struct MemoryHub {
    peers: Arc<Mutex<HashMap<PeerId, Handlers>>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer named `peer` to the hub.
    pub fn join(&self, peer: &str) -> eyre::Result<MemoryNetwork> {
        let peer = PeerId::new(peer)?;
        let mut peers = self.lock();
        if peers.contains_key(&peer) {
            eyre::bail!("peer {peer} already joined");
        }
        peers.insert(peer.clone(), HashMap::new());
        drop(peers);

        Ok(MemoryNetwork {
            hub: self.clone(),
            local: peer,
            addresses: Mutex::new(HashMap::new()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PeerId, Handlers>> {
        self.peers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

pub struct MemoryNetwork {
    hub: MemoryHub,
    local: PeerId,
    addresses: Mutex<HashMap<PeerId, (NetAddr, tokio::time::Instant)>>,
}

impl MemoryNetwork {
    /// Address recorded for `peer`, if it has not expired yet.
    pub fn recorded_address(&self, peer: &PeerId) -> Option<NetAddr> {
        let mut addresses = self
            .addresses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match addresses.get(peer) {
            Some((addr, expires)) if *expires > tokio::time::Instant::now() => Some(addr.clone()),
            Some(_) => {
                addresses.remove(peer);
                None
            }
            None => None,
        }
    }
}

#[async_trait::async_trait]
impl PeerNetwork for MemoryNetwork {
    fn local_peer(&self) -> PeerId {
        self.local.clone()
    }

    async fn resolve(&self, peer: &PeerId) -> eyre::Result<()> {
        if self.hub.lock().contains_key(peer) {
            return Ok(());
        }
        eyre::bail!("peer {peer} is not on this hub")
    }

    fn record_temporary_address(&self, peer: &PeerId, addr: &NetAddr, ttl: std::time::Duration) {
        let expires = tokio::time::Instant::now() + ttl;
        self.addresses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(peer.clone(), (addr.clone(), expires));
    }

    async fn open_stream(&self, peer: &PeerId, protocol: &ProtocolName) -> eyre::Result<BoxedStream> {
        let handler = {
            let peers = self.hub.lock();
            let handlers = peers
                .get(peer)
                .ok_or_else(|| eyre::eyre!("no route to peer {peer}"))?;
            handlers
                .get(protocol)
                .cloned()
                .ok_or_else(|| eyre::eyre!("peer {peer} does not handle {protocol}"))?
        };

        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        handler
            .send(IncomingStream {
                peer: self.local.clone(),
                stream: Box::new(theirs),
            })
            .await
            .map_err(|_| eyre::eyre!("handler for {protocol} on {peer} went away"))?;

        Ok(Box::new(ours))
    }

    fn listen(&self, protocol: &ProtocolName) -> eyre::Result<IncomingStreams> {
        let mut peers = self.hub.lock();
        let handlers = peers.entry(self.local.clone()).or_default();
        if handlers.contains_key(protocol) {
            eyre::bail!("{protocol} is already handled by {}", self.local);
        }
        let (tx, rx) = tokio::sync::mpsc::channel(super::INCOMING_BACKLOG);
        handlers.insert(protocol.clone(), tx);
        Ok(rx)
    }

    fn unlisten(&self, protocol: &ProtocolName) {
        if let Some(handlers) = self.hub.lock().get_mut(&self.local) {
            handlers.remove(protocol);
        }
    }
}

impl Drop for MemoryNetwork {
    fn drop(&mut self) {
        self.hub.lock().remove(&self.local);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn proto(name: &str) -> ProtocolName {
        ProtocolName::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_stream_between_peers() {
        let hub = MemoryHub::new();
        let a = hub.join("a").unwrap();
        let b = hub.join("b").unwrap();

        let mut incoming = b.listen(&proto("/x/echo")).unwrap();
        let mut stream = a
            .open_stream(&b.local_peer(), &proto("/x/echo"))
            .await
            .unwrap();
        let mut accepted = incoming.recv().await.unwrap();
        assert_eq!(accepted.peer.as_str(), "a");

        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        accepted.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_duplicate_handler_rejected() {
        let hub = MemoryHub::new();
        let a = hub.join("a").unwrap();
        let _incoming = a.listen(&proto("/x/echo")).unwrap();
        assert!(a.listen(&proto("/x/echo")).is_err());

        a.unlisten(&proto("/x/echo"));
        assert!(a.listen(&proto("/x/echo")).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_peer_and_protocol() {
        let hub = MemoryHub::new();
        let a = hub.join("a").unwrap();
        let b = hub.join("b").unwrap();

        let ghost = PeerId::new("ghost").unwrap();
        assert!(a.resolve(&ghost).await.is_err());
        assert!(a.resolve(&b.local_peer()).await.is_ok());
        assert!(a.open_stream(&ghost, &proto("/x/echo")).await.is_err());
        assert!(a.open_stream(&b.local_peer(), &proto("/x/echo")).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_temporary_address_expires() {
        let hub = MemoryHub::new();
        let a = hub.join("a").unwrap();
        let peer = PeerId::new("b").unwrap();
        let addr: NetAddr = "/ip4/10.0.0.2/udp/4433".parse().unwrap();

        a.record_temporary_address(&peer, &addr, std::time::Duration::from_secs(10));
        assert_eq!(a.recorded_address(&peer), Some(addr));

        tokio::time::advance(std::time::Duration::from_secs(11)).await;
        assert_eq!(a.recorded_address(&peer), None);
    }
}

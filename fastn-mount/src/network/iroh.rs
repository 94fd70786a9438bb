//! [`PeerNetwork`] over iroh.
//!
//! One endpoint, one ALPN. Protocol streams are QUIC bidirectional streams
//! that start with a header line naming the protocol (see
//! `fastn_mount_net::open_stream`). Streams for protocols without a handler
//! are refused with an error line.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{BoxedStream, IncomingStream, IncomingStreams, PeerNetwork};
use crate::{NetAddr, PeerId, ProtocolName};

type Handlers = Arc<Mutex<HashMap<String, tokio::sync::mpsc::Sender<IncomingStream>>>>;

pub struct IrohNetwork {
    endpoint: ::iroh::Endpoint,
    handlers: Handlers,
    connections: fastn_mount_net::PeerConnections,
    addresses: Mutex<HashMap<::iroh::NodeId, (NetAddr, tokio::time::Instant)>>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl IrohNetwork {
    /// Start accepting connections on `endpoint`.
    ///
    /// The endpoint must have been created with
    /// `fastn_mount_net::create_endpoint` so that it speaks the mount ALPN.
    pub fn new(endpoint: ::iroh::Endpoint) -> Self {
        let handlers: Handlers = Default::default();
        let accept_task = tokio::spawn(accept_loop(endpoint.clone(), handlers.clone()));

        Self {
            endpoint,
            handlers,
            connections: fastn_mount_net::PeerConnections::new(),
            addresses: Mutex::new(HashMap::new()),
            accept_task,
        }
    }

    /// Stop accepting and close every connection.
    pub async fn close(&self) {
        self.accept_task.abort();
        self.endpoint.close().await;
    }

    fn node_id(peer: &PeerId) -> eyre::Result<::iroh::NodeId> {
        peer.as_str()
            .parse()
            .map_err(|e| eyre::eyre!("`{peer}` is not an iroh node id: {e}"))
    }

    /// Node address for dialing, with the recorded direct address if any.
    async fn node_addr(&self, node_id: ::iroh::NodeId) -> ::iroh::NodeAddr {
        let hint = {
            let mut addresses = self
                .addresses
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            match addresses.get(&node_id) {
                Some((addr, expires)) if *expires > tokio::time::Instant::now() => Some(addr.clone()),
                Some(_) => {
                    addresses.remove(&node_id);
                    None
                }
                None => None,
            }
        };

        let addr = ::iroh::NodeAddr::new(node_id);
        let Some(hint) = hint else {
            return addr;
        };
        match hint.resolve().await {
            Ok(direct) => addr.with_direct_addresses(direct),
            Err(e) => {
                tracing::debug!(%node_id, %hint, "ignoring unresolvable address hint: {e}");
                addr
            }
        }
    }
}

#[async_trait::async_trait]
impl PeerNetwork for IrohNetwork {
    fn local_peer(&self) -> PeerId {
        PeerId(self.endpoint.node_id().to_string())
    }

    async fn resolve(&self, peer: &PeerId) -> eyre::Result<()> {
        Self::node_id(peer).map(|_| ())
    }

    fn record_temporary_address(&self, peer: &PeerId, addr: &NetAddr, ttl: std::time::Duration) {
        let Ok(node_id) = Self::node_id(peer) else {
            return;
        };
        let expires = tokio::time::Instant::now() + ttl;
        self.addresses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(node_id, (addr.clone(), expires));
    }

    async fn open_stream(&self, peer: &PeerId, protocol: &ProtocolName) -> eyre::Result<BoxedStream> {
        let node_id = Self::node_id(peer)?;
        let addr = self.node_addr(node_id).await;
        let conn = self.connections.get_or_connect(&self.endpoint, addr).await?;

        match fastn_mount_net::open_stream(&conn, protocol.as_str()).await {
            Ok((send, recv)) => Ok(Box::new(tokio::io::join(recv, send))),
            Err(e) => {
                if conn.close_reason().is_some() {
                    self.connections.forget(&node_id);
                }
                Err(e)
            }
        }
    }

    fn listen(&self, protocol: &ProtocolName) -> eyre::Result<IncomingStreams> {
        let mut handlers = self
            .handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if handlers.contains_key(protocol.as_str()) {
            eyre::bail!("{protocol} is already handled");
        }
        let (tx, rx) = tokio::sync::mpsc::channel(super::INCOMING_BACKLOG);
        handlers.insert(protocol.to_string(), tx);
        Ok(rx)
    }

    fn unlisten(&self, protocol: &ProtocolName) {
        self.handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(protocol.as_str());
    }
}

impl Drop for IrohNetwork {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(endpoint: ::iroh::Endpoint, handlers: Handlers) {
    while let Some(incoming) = endpoint.accept().await {
        let handlers = handlers.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(incoming, handlers).await {
                tracing::debug!("connection ended: {e}");
            }
        });
    }
    tracing::info!("iroh endpoint closed, no more connections");
}

async fn handle_connection(
    incoming: ::iroh::endpoint::Incoming,
    handlers: Handlers,
) -> eyre::Result<()> {
    let conn = incoming.await?;
    let node_id = conn.remote_node_id()?;
    let peer = PeerId(node_id.to_string());
    tracing::debug!(%peer, "peer connected");

    loop {
        let (send, recv) = fastn_mount_net::accept_stream(&conn).await?;
        let handlers = handlers.clone();
        let peer = peer.clone();
        tokio::spawn(async move {
            if let Err(e) = route_stream(&peer, send, recv, &handlers).await {
                tracing::debug!(%peer, "dropping stream: {e}");
            }
        });
    }
}

/// How long an accepted stream may take to name its protocol.
const HEADER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Read the header of one stream and hand it to the protocol's handler.
async fn route_stream<S, R>(
    peer: &PeerId,
    mut send: S,
    mut recv: R,
    handlers: &Handlers,
) -> eyre::Result<()>
where
    S: tokio::io::AsyncWrite + Send + Unpin + 'static,
    R: tokio::io::AsyncBufRead + Send + Unpin + 'static,
{
    let header = tokio::time::timeout(HEADER_TIMEOUT, fastn_mount_net::read_header(&mut recv))
        .await
        .map_err(|_| eyre::eyre!("no stream header within {HEADER_TIMEOUT:?}"))??;
    let handler = handlers
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .get(&header.protocol)
        .cloned();

    let Some(handler) = handler else {
        tracing::debug!(%peer, protocol = %header.protocol, "refusing stream for unhandled protocol");
        return fastn_mount_net::reject_stream(send, &format!("no handler for {}", header.protocol)).await;
    };

    fastn_mount_net::ack_stream(&mut send).await?;
    let stream = IncomingStream {
        peer: peer.clone(),
        stream: Box::new(tokio::io::join(recv, send)),
    };
    if handler.send(stream).await.is_err() {
        tracing::debug!(%peer, protocol = %header.protocol, "handler went away before stream was delivered");
    }
    Ok(())
}

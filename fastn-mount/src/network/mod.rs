//! The peer-to-peer side of a forward.
//!
//! The engine does not speak any wire protocol itself. It needs a
//! [`PeerNetwork`] that can open a protocol stream to a peer, deliver incoming
//! streams for a protocol, and remember where a peer can be reached for a
//! short while.

pub mod iroh;
pub mod memory;

use crate::{NetAddr, PeerId, ProtocolName};

/// A bidirectional byte stream.
pub trait AsyncStream: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// A protocol stream opened by a remote peer.
pub struct IncomingStream {
    pub peer: PeerId,
    pub stream: BoxedStream,
}

impl std::fmt::Debug for IncomingStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingStream")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Streams delivered to a registered protocol handler.
///
/// Yields `None` once the handler has been unregistered.
pub type IncomingStreams = tokio::sync::mpsc::Receiver<IncomingStream>;

/// Buffer of not yet accepted incoming streams per protocol handler.
pub const INCOMING_BACKLOG: usize = 32;

#[async_trait::async_trait]
pub trait PeerNetwork: Send + Sync + 'static {
    /// Identity of this peer.
    fn local_peer(&self) -> PeerId;

    /// Check that `peer` is a usable identity on this network.
    async fn resolve(&self, peer: &PeerId) -> eyre::Result<()>;

    /// Remember that `peer` can be reached at `addr` for `ttl`.
    fn record_temporary_address(&self, peer: &PeerId, addr: &NetAddr, ttl: std::time::Duration);

    /// Open a stream to `peer` for `protocol`.
    ///
    /// Fails if the peer cannot be reached or has no handler for `protocol`.
    async fn open_stream(&self, peer: &PeerId, protocol: &ProtocolName) -> eyre::Result<BoxedStream>;

    /// Start delivering streams opened for `protocol`.
    ///
    /// Fails if a handler for `protocol` is already registered.
    fn listen(&self, protocol: &ProtocolName) -> eyre::Result<IncomingStreams>;

    /// Stop delivering streams for `protocol`. No-op if nothing is registered.
    fn unlisten(&self, protocol: &ProtocolName);
}

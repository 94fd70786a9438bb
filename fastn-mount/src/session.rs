//! Piping bytes between the two halves of a forwarded stream.

use std::sync::Arc;

use crate::{Endpoint, ProtocolName, StreamRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the second half (stream open or dial).
    Pairing,
    /// Both halves exist and the stream is registered.
    Piping,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CloseReason {
    /// One direction reached end of stream.
    Finished {
        /// Bytes copied from the origin to the target.
        sent: u64,
        /// Bytes copied from the target back to the origin.
        received: u64,
    },
    Failed { error: String },
    Reset,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Finished { sent, received } => {
                write!(f, "finished ({sent} bytes sent, {received} bytes received)")
            }
            CloseReason::Failed { error } => write!(f, "failed: {error}"),
            CloseReason::Reset => f.write_str("reset"),
        }
    }
}

/// One forwarded connection, from pairing to close.
///
/// The registry entry is removed exactly once: when piping ends, or when the
/// session is dropped early (task aborted). A reset through the registry
/// removes it first, which is harmless since unregistering is idempotent.
pub(crate) struct Session {
    streams: Arc<StreamRegistry>,
    state: SessionState,
    handle: Option<u64>,
    reset: tokio_util::sync::CancellationToken,
}

impl Session {
    /// `reset` ends the session in any state; the registry cancels it on
    /// reset, the engine on shutdown.
    pub(crate) fn new(streams: Arc<StreamRegistry>, reset: tokio_util::sync::CancellationToken) -> Self {
        Self {
            streams,
            state: SessionState::Pairing,
            handle: None,
            reset,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.reset.cancelled()
    }

    /// Register the paired stream, moving to `Piping`.
    pub(crate) fn register(
        &mut self,
        protocol: ProtocolName,
        origin_address: Endpoint,
        target_address: Endpoint,
    ) -> crate::Result<u64> {
        debug_assert_eq!(self.state, SessionState::Pairing);
        let handle =
            self.streams
                .register(protocol, origin_address, target_address, self.reset.clone())?;
        self.handle = Some(handle);
        self.state = SessionState::Piping;
        Ok(handle)
    }

    /// Copy both directions until the session ends, then close it.
    ///
    /// The session ends as soon as either direction reaches end of stream,
    /// fails, or the session is reset. Whatever was read before end of
    /// stream is written through and the opposite writer shut down; then both
    /// halves are dropped, including the one that was still open.
    pub(crate) async fn pipe<O, T>(&mut self, origin: O, target: T) -> CloseReason
    where
        O: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
        T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut origin_read, mut origin_write) = tokio::io::split(origin);
        let (mut target_read, mut target_write) = tokio::io::split(target);
        let mut sent = 0;
        let mut received = 0;

        let ended = tokio::select! {
            biased;
            _ = self.reset.cancelled() => None,
            copied = copy_half(&mut origin_read, &mut target_write, &mut sent) => Some(copied),
            copied = copy_half(&mut target_read, &mut origin_write, &mut received) => Some(copied),
        };
        drop((origin_read, origin_write, target_read, target_write));

        let reason = match ended {
            None => CloseReason::Reset,
            Some(Ok(())) => CloseReason::Finished { sent, received },
            Some(Err(e)) => CloseReason::Failed { error: e.to_string() },
        };
        self.close();
        reason
    }

    fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.streams.unregister(handle);
        }
        self.state = SessionState::Closed;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

async fn copy_half<R, W>(
    reader: &mut R,
    writer: &mut W,
    copied: &mut u64,
) -> std::io::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        *copied += n as u64;
    }
    match writer.shutdown().await {
        // the other side may already be fully gone
        Err(e) if e.kind() != std::io::ErrorKind::NotConnected => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn registered(streams: &Arc<StreamRegistry>) -> (Session, u64) {
        let mut session = Session::new(streams.clone(), tokio_util::sync::CancellationToken::new());
        assert_eq!(session.state(), SessionState::Pairing);
        let handle = session
            .register(
                ProtocolName::new("/x/test").unwrap(),
                "/ip4/127.0.0.1/tcp/1".parse().unwrap(),
                "/p2p/remote".parse().unwrap(),
            )
            .unwrap();
        assert_eq!(session.state(), SessionState::Piping);
        (session, handle)
    }

    #[tokio::test]
    async fn test_origin_eof_closes_both_halves() {
        let streams = Arc::new(StreamRegistry::new());
        let (mut session, handle) = registered(&streams);

        let (origin, mut client) = tokio::io::duplex(1024);
        let (target, mut server) = tokio::io::duplex(1024);
        let piping = tokio::spawn(async move {
            let reason = session.pipe(origin, target).await;
            (reason, session.state())
        });

        client.write_all(b"request").await.unwrap();
        client.shutdown().await.unwrap();

        // the target never answers, the session still ends
        let (reason, state) = piping.await.unwrap();
        assert_eq!(reason, CloseReason::Finished { sent: 7, received: 0 });
        assert_eq!(state, SessionState::Closed);
        assert!(streams.get(handle).is_none());

        let mut request = Vec::new();
        server.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"request");
        assert!(server.write_all(b"too late").await.is_err());

        let mut response = Vec::new();
        assert_eq!(client.read_to_end(&mut response).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_target_eof_flushes_to_origin() {
        let streams = Arc::new(StreamRegistry::new());
        let (mut session, handle) = registered(&streams);

        let (origin, mut client) = tokio::io::duplex(1024);
        let (target, mut server) = tokio::io::duplex(1024);
        let piping = tokio::spawn(async move { session.pipe(origin, target).await });

        server.write_all(b"bye").await.unwrap();
        server.shutdown().await.unwrap();

        assert_eq!(
            piping.await.unwrap(),
            CloseReason::Finished { sent: 0, received: 3 }
        );
        assert!(streams.get(handle).is_none());

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"bye");
    }

    #[tokio::test]
    async fn test_reset_ends_piping() {
        let streams = Arc::new(StreamRegistry::new());
        let (mut session, handle) = registered(&streams);

        let (origin, mut client) = tokio::io::duplex(1024);
        let (target, _server) = tokio::io::duplex(1024);
        let piping = tokio::spawn(async move { session.pipe(origin, target).await });

        streams.reset(handle).unwrap();
        assert_eq!(piping.await.unwrap(), CloseReason::Reset);

        // both halves were dropped
        let mut buf = Vec::new();
        assert_eq!(client.read_to_end(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_parent_cancellation_resets() {
        let streams = Arc::new(StreamRegistry::new());
        let shutdown = tokio_util::sync::CancellationToken::new();
        let mut session = Session::new(streams.clone(), shutdown.child_token());
        session
            .register(
                ProtocolName::new("/x/test").unwrap(),
                "/ip4/127.0.0.1/tcp/1".parse().unwrap(),
                "/p2p/remote".parse().unwrap(),
            )
            .unwrap();

        let (origin, _client) = tokio::io::duplex(1024);
        let (target, _server) = tokio::io::duplex(1024);
        shutdown.cancel();
        assert_eq!(session.pipe(origin, target).await, CloseReason::Reset);
        assert!(streams.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_session_unregisters() {
        let streams = Arc::new(StreamRegistry::new());
        let (session, handle) = registered(&streams);
        assert!(streams.get(handle).is_some());
        drop(session);
        assert!(streams.is_empty());
    }
}

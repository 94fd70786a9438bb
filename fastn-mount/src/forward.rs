//! Accept loops and the sessions they spawn.

use std::sync::Arc;

use crate::network::{IncomingStream, IncomingStreams, PeerNetwork};
use crate::session::{Session, SessionState};
use crate::{Endpoint, Event, Listener, ListenerRegistry, NetAddr, PeerId, StreamRegistry};

/// What accept loops and sessions share with their engine.
#[derive(Clone)]
pub(crate) struct Context {
    pub(crate) network: Arc<dyn PeerNetwork>,
    pub(crate) listeners: Arc<ListenerRegistry>,
    pub(crate) streams: Arc<StreamRegistry>,
    pub(crate) events: tokio::sync::broadcast::Sender<Event>,
    pub(crate) sessions: tokio_util::task::TaskTracker,
    /// Cancelled on engine shutdown; every session token is a child of it.
    pub(crate) shutdown: tokio_util::sync::CancellationToken,
}

impl Context {
    fn session(&self) -> Session {
        Session::new(self.streams.clone(), self.shutdown.child_token())
    }

    pub(crate) fn publish(&self, event: Event) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// The accept loop of `listener` stopped without being asked to.
    fn listener_lost(&self, listener: &Arc<Listener>) {
        if listener.mark_closed() {
            self.listeners.remove(listener);
            self.publish(Event::ListenerClosed {
                listener: listener.info(),
            });
        }
    }

    fn session_failed(&self, listener: &Listener, error: crate::Error) {
        tracing::warn!(
            protocol = %listener.protocol(),
            listen = %listener.listen_address(),
            "session failed: {error}"
        );
        listener.record_failure(&error);
        self.publish(Event::SessionFailed {
            listener: listener.info(),
            error: error.to_string(),
        });
    }

    async fn run_session<O, T>(&self, mut session: Session, origin: O, target: T, handle: u64)
    where
        O: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
        T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let reason = session.pipe(origin, target).await;
        debug_assert_eq!(session.state(), SessionState::Closed);
        tracing::debug!(handle, %reason, "stream closed");
        self.publish(Event::StreamClosed { handle, reason });
    }
}

/// Accept TCP connections and forward each one to `peer`.
pub(crate) async fn outbound_loop(
    ctx: Context,
    listener: Arc<Listener>,
    tcp: tokio::net::TcpListener,
    peer: PeerId,
) {
    loop {
        tokio::select! {
            biased;
            _ = listener.cancelled() => break,
            accepted = tcp.accept() => match accepted {
                Ok((conn, addr)) => {
                    let ctx2 = ctx.clone();
                    let listener = listener.clone();
                    let peer = peer.clone();
                    ctx.sessions.spawn(async move {
                        outbound_session(ctx2, listener, conn, addr, peer).await;
                    });
                }
                Err(e) => {
                    tracing::warn!(listen = %listener.listen_address(), "failed to accept connection: {e}");
                }
            },
        }
    }

    drop(tcp);
    tracing::info!(protocol = %listener.protocol(), listen = %listener.listen_address(), "stopped accepting");
}

async fn outbound_session(
    ctx: Context,
    listener: Arc<Listener>,
    conn: tokio::net::TcpStream,
    addr: std::net::SocketAddr,
    peer: PeerId,
) {
    let session = ctx.session();
    let protocol = listener.protocol().clone();
    tracing::debug!(%protocol, %addr, %peer, "opening stream for new connection");

    let opened = tokio::select! {
        biased;
        _ = session.cancelled() => return,
        opened = ctx.network.open_stream(&peer, &protocol) => opened,
    };
    let stream = match opened {
        Ok(stream) => stream,
        Err(source) => {
            ctx.session_failed(
                &listener,
                crate::Error::OpenStream {
                    peer: peer.to_string(),
                    protocol: protocol.to_string(),
                    source,
                },
            );
            return;
        }
    };

    pair(
        ctx,
        &listener,
        session,
        Endpoint::Net(NetAddr::tcp(addr)),
        Endpoint::Peer(peer),
        conn,
        stream,
    )
    .await;
}

/// Receive streams for the listener's protocol and forward each one to
/// `target`.
pub(crate) async fn inbound_loop(
    ctx: Context,
    listener: Arc<Listener>,
    mut incoming: IncomingStreams,
    target: NetAddr,
) {
    loop {
        tokio::select! {
            biased;
            _ = listener.cancelled() => {
                ctx.network.unlisten(listener.protocol());
                break;
            }
            next = incoming.recv() => match next {
                Some(stream) => {
                    let ctx2 = ctx.clone();
                    let listener = listener.clone();
                    let target = target.clone();
                    ctx.sessions.spawn(async move {
                        inbound_session(ctx2, listener, stream, target).await;
                    });
                }
                None => {
                    tracing::warn!(protocol = %listener.protocol(), "protocol handler removed by the network");
                    ctx.listener_lost(&listener);
                    break;
                }
            },
        }
    }

    tracing::info!(protocol = %listener.protocol(), target = %target, "stopped accepting");
}

async fn inbound_session(
    ctx: Context,
    listener: Arc<Listener>,
    incoming: IncomingStream,
    target: NetAddr,
) {
    let session = ctx.session();
    tracing::debug!(protocol = %listener.protocol(), peer = %incoming.peer, %target, "dialing for incoming stream");

    let dialed = tokio::select! {
        biased;
        _ = session.cancelled() => return,
        dialed = crate::net::dial(&target) => dialed,
    };
    let conn = match dialed {
        Ok(conn) => conn,
        Err(e) => {
            // dropping the incoming stream closes it for the remote peer
            ctx.session_failed(&listener, e);
            return;
        }
    };

    pair(
        ctx,
        &listener,
        session,
        Endpoint::Peer(incoming.peer),
        Endpoint::Net(target),
        incoming.stream,
        conn,
    )
    .await;
}

async fn pair<O, T>(
    ctx: Context,
    listener: &Listener,
    mut session: Session,
    origin_address: Endpoint,
    target_address: Endpoint,
    origin: O,
    target: T,
) where
    O: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let handle = match session.register(
        listener.protocol().clone(),
        origin_address,
        target_address,
    ) {
        Ok(handle) => handle,
        Err(e) => {
            ctx.session_failed(listener, e);
            return;
        }
    };

    if let Some(stream) = ctx.streams.get(handle) {
        tracing::debug!(
            handle,
            protocol = %stream.protocol,
            origin = %stream.origin_address,
            target = %stream.target_address,
            "stream opened"
        );
        ctx.publish(Event::StreamOpened { stream });
    }

    ctx.run_session(session, origin, target, handle).await;
}

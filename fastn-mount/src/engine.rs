use std::sync::Arc;

use crate::forward::{self, Context};
use crate::network::PeerNetwork;
use crate::{
    Direction, EngineConfig, Event, Listener, ListenerInfo, ListenerRegistry, MatchCriteria,
    NetAddr, PeerAddr, PeerId, ProtocolName, StreamInfo, StreamRegistry, StreamSelector,
};

/// Creates listeners, pairs connections with protocol streams and keeps the
/// registries up to date.
///
/// Cheap to clone; clones share the same registries.
#[derive(Clone)]
pub struct ForwardingEngine {
    ctx: Context,
    config: Arc<EngineConfig>,
}

impl ForwardingEngine {
    pub fn new(network: Arc<dyn PeerNetwork>, config: EngineConfig) -> Self {
        let (events, _) = tokio::sync::broadcast::channel(config.event_capacity.max(1));
        Self {
            ctx: Context {
                network,
                listeners: Arc::new(ListenerRegistry::new()),
                streams: Arc::new(StreamRegistry::new()),
                events,
                sessions: tokio_util::task::TaskTracker::new(),
                shutdown: tokio_util::sync::CancellationToken::new(),
            },
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn local_peer(&self) -> PeerId {
        self.ctx.network.local_peer()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.ctx.events.subscribe()
    }

    /// Bind `listen` and forward every accepted connection to `target` over
    /// `protocol`.
    #[tracing::instrument(skip_all, fields(%protocol, %listen, %target))]
    pub async fn create_local_forward(
        &self,
        protocol: ProtocolName,
        listen: NetAddr,
        target: PeerAddr,
        allow_custom_protocol: bool,
    ) -> crate::Result<ListenerInfo> {
        protocol.check_namespace(&self.config.protocol_prefix, allow_custom_protocol)?;
        listen.require_tcp()?;

        self.ctx
            .network
            .resolve(&target.peer)
            .await
            .map_err(|source| crate::Error::PeerResolution {
                peer: target.peer.to_string(),
                source,
            })?;
        if let Some(hint) = &target.hint {
            self.ctx.network.record_temporary_address(
                &target.peer,
                hint,
                self.config.temp_addr_ttl(),
            );
        }

        let (tcp, bound) = crate::net::bind(&listen).await?;
        let listener = Arc::new(Listener::new(
            protocol,
            Direction::Outbound,
            crate::Endpoint::Net(bound),
            crate::Endpoint::Peer(target.peer.clone()),
        ));
        // on failure the socket is dropped here, nothing stays bound
        self.ctx.listeners.add(listener.clone())?;

        listener.set_task(tokio::spawn(forward::outbound_loop(
            self.ctx.clone(),
            listener.clone(),
            tcp,
            target.peer,
        )));

        Ok(self.opened(&listener))
    }

    /// Handle `protocol` on the local peer and forward every incoming stream
    /// to `target`.
    #[tracing::instrument(skip_all, fields(%protocol, %target))]
    pub async fn create_remote_forward(
        &self,
        protocol: ProtocolName,
        target: NetAddr,
        allow_custom_protocol: bool,
    ) -> crate::Result<ListenerInfo> {
        protocol.check_namespace(&self.config.protocol_prefix, allow_custom_protocol)?;
        target.require_tcp()?;

        let already_handled = || crate::Error::ProtocolAlreadyHandled {
            protocol: protocol.to_string(),
        };

        // the handler goes first so a listener is never listed before it can
        // receive streams
        let incoming = match self.ctx.network.listen(&protocol) {
            Ok(incoming) => incoming,
            Err(e) => {
                tracing::debug!("network refused handler: {e}");
                return Err(already_handled());
            }
        };

        let listener = Arc::new(Listener::new(
            protocol.clone(),
            Direction::Inbound,
            crate::Endpoint::Peer(self.local_peer()),
            crate::Endpoint::Net(target.clone()),
        ));
        if let Err(e) = self.ctx.listeners.add(listener.clone()) {
            // only our handler can be registered for `protocol` right now
            self.ctx.network.unlisten(&protocol);
            return Err(match e {
                crate::Error::DuplicateListener { .. } => already_handled(),
                e => e,
            });
        }

        listener.set_task(tokio::spawn(forward::inbound_loop(
            self.ctx.clone(),
            listener.clone(),
            incoming,
            target,
        )));

        Ok(self.opened(&listener))
    }

    fn opened(&self, listener: &Listener) -> ListenerInfo {
        let info = listener.info();
        tracing::info!(
            protocol = %info.protocol,
            listen = %info.listen_address,
            target = %info.target_address,
            "listener opened"
        );
        self.ctx.publish(Event::ListenerOpened {
            listener: info.clone(),
        });
        info
    }

    pub fn list_listeners(&self) -> Vec<ListenerInfo> {
        self.ctx.listeners.list()
    }

    pub fn list_streams(&self) -> Vec<StreamInfo> {
        self.ctx.streams.list()
    }

    /// Close every listener matching `criteria`. Returns how many were closed.
    ///
    /// Every matched listener is attempted; failures are reported together
    /// afterwards.
    pub async fn close_listeners(&self, criteria: &MatchCriteria) -> crate::Result<usize> {
        let matched = self.ctx.listeners.select_matching(|l| criteria.matches(l));

        let mut closed = 0;
        let mut errors = Vec::new();
        for listener in matched {
            match self.ctx.listeners.close(&listener).await {
                Ok(()) => {
                    closed += 1;
                    let info = listener.info();
                    tracing::info!(
                        protocol = %info.protocol,
                        listen = %info.listen_address,
                        "listener closed"
                    );
                    self.ctx.publish(Event::ListenerClosed { listener: info });
                }
                Err(e) => errors.push(e),
            }
        }

        crate::Error::aggregate("listeners", errors)?;
        Ok(closed)
    }

    /// Reset the selected streams. Returns how many were reset.
    pub fn close_stream(&self, selector: StreamSelector) -> crate::Result<usize> {
        let reset = self.ctx.streams.close(selector)?;
        tracing::debug!(?selector, reset, "streams reset");
        Ok(reset)
    }

    /// Close every listener, reset every stream and wait for all sessions to
    /// end.
    pub async fn shutdown(&self) -> crate::Result<()> {
        let closed = self.close_listeners(&MatchCriteria::All).await;
        let reset = self.ctx.streams.reset_all();
        self.ctx.shutdown.cancel();

        self.ctx.sessions.close();
        self.ctx.sessions.wait().await;
        tracing::info!(reset, "engine shut down");

        closed.map(|_| ())
    }
}

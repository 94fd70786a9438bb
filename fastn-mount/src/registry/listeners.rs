use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::{Endpoint, ProtocolName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Local network endpoint forwarded to a remote peer (`forward`).
    Outbound,
    /// Local protocol handler forwarded to a network endpoint (`listen`).
    Inbound,
}

/// Snapshot of a listener, as returned by `list`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ListenerInfo {
    pub protocol: ProtocolName,
    pub direction: Direction,
    pub listen_address: Endpoint,
    pub target_address: Endpoint,
    /// Sessions that could not be paired since the listener was created.
    #[serde(default)]
    pub failures: u64,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// One active forwarding rule.
///
/// The accept loop driving a listener watches its cancellation token and
/// releases the bound socket or protocol handler before it returns, so
/// awaiting the loop in [`Listener::close`] means the resource is free.
pub struct Listener {
    protocol: ProtocolName,
    direction: Direction,
    listen_address: Endpoint,
    target_address: Endpoint,
    cancel: tokio_util::sync::CancellationToken,
    closed: AtomicBool,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    failures: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Listener {
    pub(crate) fn new(
        protocol: ProtocolName,
        direction: Direction,
        listen_address: Endpoint,
        target_address: Endpoint,
    ) -> Self {
        Self {
            protocol,
            direction,
            listen_address,
            target_address,
            cancel: tokio_util::sync::CancellationToken::new(),
            closed: AtomicBool::new(false),
            task: Mutex::new(None),
            failures: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn protocol(&self) -> &ProtocolName {
        &self.protocol
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn listen_address(&self) -> &Endpoint {
        &self.listen_address
    }

    pub fn target_address(&self) -> &Endpoint {
        &self.target_address
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> ListenerInfo {
        ListenerInfo {
            protocol: self.protocol.clone(),
            direction: self.direction,
            listen_address: self.listen_address.clone(),
            target_address: self.target_address.clone(),
            failures: self.failures.load(Ordering::Relaxed),
            last_error: lock(&self.last_error).clone(),
        }
    }

    pub(crate) fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub(crate) fn set_task(&self, task: tokio::task::JoinHandle<()>) {
        *lock(&self.task) = Some(task);
    }

    pub(crate) fn record_failure(&self, error: &crate::Error) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        *lock(&self.last_error) = Some(error.to_string());
    }

    /// Stop accepting and wait until the bound resource is released.
    ///
    /// Sessions already spawned keep running.
    pub(crate) async fn close(&self) -> crate::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(crate::Error::ListenerClosed {
                protocol: self.protocol.to_string(),
                listen_address: self.listen_address.to_string(),
            });
        }

        self.cancel.cancel();
        let task = lock(&self.task).take();
        if let Some(task) = task
            && let Err(e) = task.await
            && e.is_panic()
        {
            tracing::warn!(protocol = %self.protocol, "accept loop panicked: {e}");
        }
        Ok(())
    }

    /// Mark the listener closed from its own accept loop, once that loop
    /// has stopped for good. Returns `false` if a close was already under
    /// way, in which case that close finishes the job.
    pub(crate) fn mark_closed(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();
        true
    }

    fn key(&self) -> (ProtocolName, Endpoint) {
        (self.protocol.clone(), self.listen_address.clone())
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("protocol", &self.protocol)
            .field("direction", &self.direction)
            .field("listen_address", &self.listen_address)
            .field("target_address", &self.target_address)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Which listeners a close request applies to.
///
/// Built from raw options before any registry access so that an invalid
/// combination never closes anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchCriteria {
    All,
    /// Conjunction of the given fields; `None` matches anything.
    Fields {
        protocol: Option<ProtocolName>,
        listen_address: Option<Endpoint>,
        target_address: Option<Endpoint>,
    },
}

impl MatchCriteria {
    pub fn from_options(
        all: bool,
        protocol: Option<ProtocolName>,
        listen_address: Option<Endpoint>,
        target_address: Option<Endpoint>,
    ) -> crate::Result<Self> {
        let any_field = protocol.is_some() || listen_address.is_some() || target_address.is_some();
        match (all, any_field) {
            (true, true) => Err(crate::Error::ConflictingOptions),
            (true, false) => Ok(MatchCriteria::All),
            (false, false) => Err(crate::Error::NoMatchingOptions),
            (false, true) => Ok(MatchCriteria::Fields {
                protocol,
                listen_address,
                target_address,
            }),
        }
    }

    pub fn matches(&self, listener: &Listener) -> bool {
        match self {
            MatchCriteria::All => true,
            MatchCriteria::Fields {
                protocol,
                listen_address,
                target_address,
            } => {
                protocol.as_ref().is_none_or(|p| p == listener.protocol())
                    && listen_address
                        .as_ref()
                        .is_none_or(|a| a == listener.listen_address())
                    && target_address
                        .as_ref()
                        .is_none_or(|a| a == listener.target_address())
            }
        }
    }
}

/// Active listeners keyed by (protocol, listen address).
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<indexmap::IndexMap<(ProtocolName, Endpoint), Arc<Listener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<Listener>) -> crate::Result<()> {
        let mut listeners = lock(&self.listeners);
        let key = listener.key();
        if listeners.contains_key(&key) {
            return Err(crate::Error::DuplicateListener {
                protocol: key.0.to_string(),
                listen_address: key.1.to_string(),
            });
        }
        listeners.insert(key, listener);
        Ok(())
    }

    /// Remove `listener` if it is still registered. Idempotent.
    pub fn remove(&self, listener: &Arc<Listener>) {
        let mut listeners = lock(&self.listeners);
        let key = listener.key();
        if listeners
            .get(&key)
            .is_some_and(|registered| Arc::ptr_eq(registered, listener))
        {
            listeners.shift_remove(&key);
        }
    }

    pub fn list(&self) -> Vec<ListenerInfo> {
        lock(&self.listeners).values().map(|l| l.info()).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn select_matching(&self, predicate: impl Fn(&Listener) -> bool) -> Vec<Arc<Listener>> {
        lock(&self.listeners)
            .values()
            .filter(|l| predicate(l))
            .cloned()
            .collect()
    }

    /// Close `listener` and drop it from the registry.
    ///
    /// Fails with `ListenerClosed` if it was closed before; the registry is
    /// left as it is in that case.
    pub async fn close(&self, listener: &Arc<Listener>) -> crate::Result<()> {
        listener.close().await?;
        self.remove(listener);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound(protocol: &str, port: u16) -> Arc<Listener> {
        Arc::new(Listener::new(
            ProtocolName::new(protocol).unwrap(),
            Direction::Outbound,
            format!("/ip4/127.0.0.1/tcp/{port}").parse().unwrap(),
            "/p2p/remote".parse().unwrap(),
        ))
    }

    #[test]
    fn test_add_rejects_duplicate_key() {
        let registry = ListenerRegistry::new();
        registry.add(outbound("/x/a", 1000)).unwrap();
        registry.add(outbound("/x/b", 1000)).unwrap();
        assert!(matches!(
            registry.add(outbound("/x/a", 1000)),
            Err(crate::Error::DuplicateListener { .. })
        ));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_list_keeps_insertion_order() {
        let registry = ListenerRegistry::new();
        for (i, protocol) in ["/x/c", "/x/a", "/x/b"].into_iter().enumerate() {
            registry.add(outbound(protocol, 2000 + i as u16)).unwrap();
        }
        let protocols: Vec<_> = registry
            .list()
            .into_iter()
            .map(|l| l.protocol.to_string())
            .collect();
        assert_eq!(protocols, ["/x/c", "/x/a", "/x/b"]);
    }

    #[test]
    fn test_remove_is_idempotent_and_ignores_replacements() {
        let registry = ListenerRegistry::new();
        let first = outbound("/x/a", 1000);
        registry.add(first.clone()).unwrap();
        registry.remove(&first);
        registry.remove(&first);
        assert!(registry.is_empty());

        let second = outbound("/x/a", 1000);
        registry.add(second).unwrap();
        registry.remove(&first);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_criteria_validation() {
        let protocol = Some(ProtocolName::new("/x/a").unwrap());
        assert!(matches!(
            MatchCriteria::from_options(false, None, None, None),
            Err(crate::Error::NoMatchingOptions)
        ));
        assert!(matches!(
            MatchCriteria::from_options(true, protocol.clone(), None, None),
            Err(crate::Error::ConflictingOptions)
        ));
        assert_eq!(
            MatchCriteria::from_options(true, None, None, None).unwrap(),
            MatchCriteria::All
        );
        assert!(MatchCriteria::from_options(false, protocol, None, None).is_ok());
    }

    #[test]
    fn test_criteria_are_a_conjunction() {
        let registry = ListenerRegistry::new();
        registry.add(outbound("/x/a", 1000)).unwrap();
        registry.add(outbound("/x/a", 1001)).unwrap();
        registry.add(outbound("/x/b", 1002)).unwrap();

        let by_protocol = MatchCriteria::from_options(
            false,
            Some(ProtocolName::new("/x/a").unwrap()),
            None,
            None,
        )
        .unwrap();
        assert_eq!(registry.select_matching(|l| by_protocol.matches(l)).len(), 2);

        let narrowed = MatchCriteria::from_options(
            false,
            Some(ProtocolName::new("/x/a").unwrap()),
            Some("/ip4/127.0.0.1/tcp/1001".parse().unwrap()),
            None,
        )
        .unwrap();
        let matched = registry.select_matching(|l| narrowed.matches(l));
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].listen_address().to_string(), "/ip4/127.0.0.1/tcp/1001");

        let by_target = MatchCriteria::from_options(
            false,
            None,
            None,
            Some("/p2p/someone-else".parse().unwrap()),
        )
        .unwrap();
        assert!(registry.select_matching(|l| by_target.matches(l)).is_empty());
    }

    #[tokio::test]
    async fn test_close_twice() {
        let registry = ListenerRegistry::new();
        let listener = outbound("/x/a", 1000);
        let cancelled = listener.cancel.clone();
        registry.add(listener.clone()).unwrap();

        registry.close(&listener).await.unwrap();
        assert!(cancelled.is_cancelled());
        assert!(listener.is_closed());
        assert!(registry.is_empty());

        assert!(matches!(
            registry.close(&listener).await,
            Err(crate::Error::ListenerClosed { .. })
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_close() {
        let registry = ListenerRegistry::new();
        let listener = outbound("/x/a", 1000);
        registry.add(listener.clone()).unwrap();
        let watched = listener.clone();
        listener.set_task(tokio::spawn(async move {
            watched.cancelled().await;
            tokio::task::yield_now().await;
        }));

        let (first, second) = tokio::join!(registry.close(&listener), registry.close(&listener));
        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(crate::Error::ListenerClosed { .. })))
                .count(),
            1
        );
        assert!(listener.is_closed());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_mark_closed_defers_to_running_close() {
        let listener = outbound("/x/a", 1000);
        assert!(listener.mark_closed());
        assert!(listener.is_closed());
        assert!(!listener.mark_closed());
        assert!(matches!(
            listener.close().await,
            Err(crate::Error::ListenerClosed { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_waits_for_accept_loop() {
        let listener = outbound("/x/a", 1000);
        let (done_tx, mut done_rx) = tokio::sync::oneshot::channel();
        let watched = listener.clone();
        listener.set_task(tokio::spawn(async move {
            watched.cancelled().await;
            let _ = done_tx.send(());
        }));

        listener.close().await.unwrap();
        assert!(done_rx.try_recv().is_ok());
    }

    #[test]
    fn test_failures_show_in_info() {
        let listener = outbound("/x/a", 1000);
        listener.record_failure(&crate::Error::StreamNotFound { handle: 3 });
        let info = listener.info();
        assert_eq!(info.failures, 1);
        assert_eq!(info.last_error.as_deref(), Some("no stream with id 3"));
    }
}

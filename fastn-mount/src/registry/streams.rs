use std::sync::Mutex;

use crate::{Endpoint, ProtocolName};

/// Snapshot of a forwarded stream.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StreamInfo {
    pub handle: u64,
    pub protocol: ProtocolName,
    /// Side that accepted the stream: the TCP client for outbound forwards,
    /// the remote peer for inbound ones.
    pub origin_address: Endpoint,
    pub target_address: Endpoint,
}

/// Which streams a close request applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSelector {
    Handle(u64),
    All,
}

impl StreamSelector {
    pub fn from_options(handle: Option<u64>, all: bool) -> crate::Result<Self> {
        match (handle, all) {
            (Some(_), true) => Err(crate::Error::ConflictingOptions),
            (Some(handle), false) => Ok(StreamSelector::Handle(handle)),
            (None, true) => Ok(StreamSelector::All),
            (None, false) => Err(crate::Error::NoStreamSelected),
        }
    }
}

struct Entry {
    info: StreamInfo,
    reset: tokio_util::sync::CancellationToken,
}

#[derive(Default)]
struct Streams {
    next_handle: u64,
    entries: indexmap::IndexMap<u64, Entry>,
}

/// Active streams keyed by handle.
///
/// Handles start at 0 and only grow, so a closed stream's handle is never
/// given to another stream of the same registry.
#[derive(Default)]
pub struct StreamRegistry {
    streams: Mutex<Streams>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream and return its handle.
    ///
    /// `reset` is cancelled when the stream is reset through the registry.
    pub fn register(
        &self,
        protocol: ProtocolName,
        origin_address: Endpoint,
        target_address: Endpoint,
        reset: tokio_util::sync::CancellationToken,
    ) -> crate::Result<u64> {
        let mut streams = self.lock();
        let handle = streams.next_handle;
        streams.next_handle = handle.wrapping_add(1);
        if streams.entries.contains_key(&handle) {
            return Err(crate::Error::HandleCollision { handle });
        }

        let info = StreamInfo {
            handle,
            protocol,
            origin_address,
            target_address,
        };
        streams.entries.insert(handle, Entry { info, reset });
        Ok(handle)
    }

    /// Forget `handle`. Returns whether it was registered.
    pub fn unregister(&self, handle: u64) -> bool {
        self.lock().entries.shift_remove(&handle).is_some()
    }

    pub fn list(&self) -> Vec<StreamInfo> {
        self.lock()
            .entries
            .values()
            .map(|e| e.info.clone())
            .collect()
    }

    pub fn get(&self, handle: u64) -> Option<StreamInfo> {
        self.lock().entries.get(&handle).map(|e| e.info.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove `handle` and signal its session to stop.
    ///
    /// The entry is gone when this returns; the session drops its halves
    /// shortly after.
    pub fn reset(&self, handle: u64) -> crate::Result<()> {
        let entry = self
            .lock()
            .entries
            .shift_remove(&handle)
            .ok_or(crate::Error::StreamNotFound { handle })?;
        entry.reset.cancel();
        Ok(())
    }

    /// Reset every registered stream. Returns how many there were.
    pub fn reset_all(&self) -> usize {
        let entries: Vec<Entry> = self.lock().entries.drain(..).map(|(_, e)| e).collect();
        for entry in &entries {
            entry.reset.cancel();
        }
        entries.len()
    }

    pub fn close(&self, selector: StreamSelector) -> crate::Result<usize> {
        match selector {
            StreamSelector::Handle(handle) => self.reset(handle).map(|()| 1),
            StreamSelector::All => Ok(self.reset_all()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Streams> {
        self.streams
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn register(registry: &StreamRegistry) -> (u64, CancellationToken) {
        let token = CancellationToken::new();
        let handle = registry
            .register(
                ProtocolName::new("/x/test").unwrap(),
                "/ip4/127.0.0.1/tcp/50000".parse().unwrap(),
                "/p2p/remote".parse().unwrap(),
                token.clone(),
            )
            .unwrap();
        (handle, token)
    }

    #[test]
    fn test_handles_are_never_reused() {
        let registry = StreamRegistry::new();
        let (a, _) = register(&registry);
        let (b, _) = register(&registry);
        assert_eq!((a, b), (0, 1));

        assert!(registry.unregister(a));
        assert!(!registry.unregister(a));
        let (c, _) = register(&registry);
        assert_eq!(c, 2);
        assert_eq!(
            registry.list().iter().map(|s| s.handle).collect::<Vec<_>>(),
            [1, 2]
        );
    }

    #[test]
    fn test_collision_is_reported() {
        let registry = StreamRegistry::new();
        let (handle, _) = register(&registry);
        registry.lock().next_handle = handle;
        assert!(matches!(
            registry.register(
                ProtocolName::new("/x/test").unwrap(),
                "/ip4/127.0.0.1/tcp/1".parse().unwrap(),
                "/p2p/remote".parse().unwrap(),
                CancellationToken::new(),
            ),
            Err(crate::Error::HandleCollision { handle: 0 })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reset_one() {
        let registry = StreamRegistry::new();
        let (a, a_token) = register(&registry);
        let (b, b_token) = register(&registry);

        registry.reset(a).unwrap();
        assert!(a_token.is_cancelled());
        assert!(!b_token.is_cancelled());
        assert!(registry.get(a).is_none());
        assert_eq!(registry.get(b).unwrap().handle, b);

        assert!(matches!(
            registry.reset(a),
            Err(crate::Error::StreamNotFound { handle }) if handle == a
        ));
    }

    #[test]
    fn test_reset_all() {
        let registry = StreamRegistry::new();
        let tokens: Vec<_> = (0..3).map(|_| register(&registry).1).collect();

        assert_eq!(registry.close(StreamSelector::All).unwrap(), 3);
        assert!(registry.is_empty());
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
        assert_eq!(registry.close(StreamSelector::All).unwrap(), 0);
    }

    #[test]
    fn test_selector_validation() {
        assert!(matches!(
            StreamSelector::from_options(None, false),
            Err(crate::Error::NoStreamSelected)
        ));
        assert!(matches!(
            StreamSelector::from_options(Some(1), true),
            Err(crate::Error::ConflictingOptions)
        ));
        assert_eq!(
            StreamSelector::from_options(Some(4), false).unwrap(),
            StreamSelector::Handle(4)
        );
        assert_eq!(
            StreamSelector::from_options(None, true).unwrap(),
            StreamSelector::All
        );
    }
}

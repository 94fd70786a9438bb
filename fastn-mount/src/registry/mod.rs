//! Passive indexes of what an engine is currently forwarding.
//!
//! Both registries keep their entries in insertion order behind a single
//! mutex. The lock covers structural changes and snapshots only; closing a
//! listener or resetting a stream happens after it is released.

mod listeners;
mod streams;

pub use listeners::{Direction, Listener, ListenerInfo, ListenerRegistry, MatchCriteria};
pub use streams::{StreamInfo, StreamRegistry, StreamSelector};

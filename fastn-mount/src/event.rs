use crate::{CloseReason, ListenerInfo, StreamInfo};

/// Something that happened inside a [`crate::ForwardingEngine`].
///
/// Delivered through a broadcast channel; a subscriber that falls behind
/// misses events rather than slowing forwarding down.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    ListenerOpened { listener: ListenerInfo },
    ListenerClosed { listener: ListenerInfo },
    StreamOpened { stream: StreamInfo },
    StreamClosed { handle: u64, reason: CloseReason },
    /// A connection or incoming stream could not be paired; the listener
    /// keeps accepting.
    SessionFailed { listener: ListenerInfo, error: String },
}

//! Protocol multiplexing over a single iroh connection.
//!
//! Every mounted protocol (`/x/ssh`, `/x/http`, ...) travels over the same
//! ALPN. Two peers keep one QUIC connection between them and each forwarded
//! session gets its own bidirectional stream:
//!
//! ```text
//! Single Connection between peers
//!     ├── Stream 1: /x/ssh
//!     ├── Stream 2: /x/ssh
//!     ├── Stream 3: /x/http
//!     └── Stream N: ...
//! ```
//!
//! # Stream Lifecycle
//!
//! 1. The dialing peer opens a bidirectional stream
//! 2. It sends a JSON [`StreamHeader`] line naming the protocol
//! 3. The accepting peer answers with [`ACK`] if a handler is registered for
//!    that protocol, or with an error line and closes the stream
//! 4. Raw forwarded bytes follow in both directions
//!
//! Opening a new stream is a single round trip on an existing connection, so
//! a burst of forwarded TCP connections does not pay a TLS handshake each.

/// Single ALPN protocol identifier for all fastn-mount connections.
pub const ALPN_MOUNT: &[u8] = b"/fastn/mount/0.1";

/// Line sent by the accepting side once the protocol is accepted.
pub const ACK: &str = "ack";

/// Upper bound on a header or ACK line, newline included.
pub const MAX_HEADER_LEN: u64 = 4096;

/// First message on every stream.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StreamHeader {
    /// Protocol name the stream should be routed to
    pub protocol: String,
}

impl StreamHeader {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
        }
    }
}

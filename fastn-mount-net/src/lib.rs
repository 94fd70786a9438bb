//! Network plumbing for fastn-mount.
//!
//! This crate owns everything that touches iroh directly: creating the
//! endpoint, the per-stream protocol header exchange, line framing, the
//! per-peer connection cache and the daemon key file. The forwarding engine in
//! `fastn-mount` builds its iroh `PeerNetwork` on top of these helpers.

mod connections;
mod endpoint;
mod framing;
mod protocol;
mod secret;
mod stream;

pub use connections::PeerConnections;
pub use endpoint::create_endpoint;
pub use framing::{next_json, next_line, write_json_line, write_line};
pub use protocol::{ACK, ALPN_MOUNT, MAX_HEADER_LEN, StreamHeader};
pub use secret::{KEY_FILE, read_or_create_key};
pub use stream::{RecvHalf, accept_stream, ack_stream, open_stream, read_header, reject_stream};

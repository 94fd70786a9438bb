//! # fastn-mount
//!
//! Forward TCP services over peer-to-peer protocol streams.
//!
//! A *local forward* binds a TCP address and turns every accepted connection
//! into a protocol stream to a remote peer. A *remote forward* handles a
//! protocol on the local peer and turns every incoming stream into a TCP
//! connection to a local address. The [`ForwardingEngine`] owns both kinds of
//! listener and every stream they pipe, and keeps them listable and closable
//! while traffic flows.
//!
//! ```rust,ignore
//! let hub = fastn_mount::network::memory::MemoryHub::new();
//! let engine = fastn_mount::ForwardingEngine::new(
//!     std::sync::Arc::new(hub.join("alice")?),
//!     fastn_mount::EngineConfig::default(),
//! );
//! engine
//!     .create_remote_forward("/x/ssh".parse()?, "127.0.0.1:22".parse()?, false)
//!     .await?;
//! ```
//!
//! The peer side is abstracted by [`network::PeerNetwork`]; the daemon uses
//! the iroh implementation, tests use the in-memory one.

mod config;
pub mod control;
mod endpoint;
mod engine;
mod error;
mod event;
mod forward;
mod net;
pub mod network;
mod protocol;
mod registry;
mod session;

pub use config::EngineConfig;
pub use endpoint::{Endpoint, Host, NetAddr, PeerAddr, PeerId, Transport};
pub use engine::ForwardingEngine;
pub use error::{Error, ErrorKind, Result};
pub use event::Event;
pub use protocol::{PROTOCOL_PREFIX, ProtocolName};
pub use registry::{
    Direction, Listener, ListenerInfo, ListenerRegistry, MatchCriteria, StreamInfo,
    StreamRegistry, StreamSelector,
};
pub use session::{CloseReason, SessionState};

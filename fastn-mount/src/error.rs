//! Error types for fastn-mount

/// Broad classification of [`Error`]s.
///
/// Configuration and conflict errors are returned from create operations and
/// leave nothing registered. Transport errors during a session only end that
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Conflict,
    Resolution,
    Transport,
    NotFound,
    Aggregate,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid endpoint `{input}`: {reason}")]
    InvalidEndpoint { input: String, reason: String },

    #[error("unsupported transport `{transport}`, only tcp can be forwarded")]
    UnsupportedTransport { transport: String },

    #[error("invalid peer address `{input}`: {reason}")]
    InvalidPeerAddress { input: String, reason: String },

    #[error("protocol name must not be empty")]
    EmptyProtocol,

    #[error("protocol name must be within '{prefix}' namespace")]
    InvalidProtocolNamespace { protocol: String, prefix: String },

    #[error("no matching options given")]
    NoMatchingOptions,

    #[error("can't combine --all with other matching options")]
    ConflictingOptions,

    #[error("no stream id specified")]
    NoStreamSelected,

    #[error("listener for {protocol} on {listen_address} already registered")]
    DuplicateListener {
        protocol: String,
        listen_address: String,
    },

    #[error("protocol handler for {protocol} already registered")]
    ProtocolAlreadyHandled { protocol: String },

    #[error("stream handle {handle} is already in use")]
    HandleCollision { handle: u64 },

    #[error("failed to resolve peer {peer}: {source}")]
    PeerResolution { peer: String, source: eyre::Report },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("failed to dial {address}: {source}")]
    Dial {
        address: String,
        source: std::io::Error,
    },

    #[error("failed to open {protocol} stream to {peer}: {source}")]
    OpenStream {
        peer: String,
        protocol: String,
        source: eyre::Report,
    },

    #[error("no stream with id {handle}")]
    StreamNotFound { handle: u64 },

    #[error("listener for {protocol} on {listen_address} already closed")]
    ListenerClosed {
        protocol: String,
        listen_address: String,
    },

    #[error("errors when closing {what}: {}", .errors.join("; "))]
    Aggregate { what: String, errors: Vec<String> },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidEndpoint { .. }
            | Error::UnsupportedTransport { .. }
            | Error::InvalidPeerAddress { .. }
            | Error::EmptyProtocol
            | Error::InvalidProtocolNamespace { .. }
            | Error::NoMatchingOptions
            | Error::ConflictingOptions
            | Error::NoStreamSelected => ErrorKind::Configuration,
            Error::DuplicateListener { .. }
            | Error::ProtocolAlreadyHandled { .. }
            | Error::HandleCollision { .. } => ErrorKind::Conflict,
            Error::PeerResolution { .. } => ErrorKind::Resolution,
            Error::Bind { .. }
            | Error::Dial { .. }
            | Error::OpenStream { .. } => ErrorKind::Transport,
            Error::StreamNotFound { .. } | Error::ListenerClosed { .. } => ErrorKind::NotFound,
            Error::Aggregate { .. } => ErrorKind::Aggregate,
        }
    }

    /// Collect per-item failures of a bulk operation into one error.
    ///
    /// Returns `Ok(())` when nothing failed.
    pub(crate) fn aggregate(what: &str, errors: Vec<Error>) -> Result<(), Error> {
        if errors.is_empty() {
            return Ok(());
        }
        Err(Error::Aggregate {
            what: what.to_string(),
            errors: errors.iter().map(ToString::to_string).collect(),
        })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Error types for the tile client.
//!
//! Every failure is handled inside the owning instance: fetch problems become
//! silent retries or textual responses on the wire, and only channel-creation
//! failures propagate out of `InstanceRegistry::create`.

use thiserror::Error;

/// Errors raised by the inter-process channel transport.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Failed to create a server endpoint for the given channel name.
    #[error("failed to create channel '{name}': {reason}")]
    Create { name: String, reason: String },

    /// No endpoint is registered under the given channel name.
    #[error("channel '{0}' is not registered")]
    NotFound(String),

    /// The peer went away while sending or receiving.
    #[error("channel closed")]
    Closed,
}

/// Errors raised while fetching from the remote tile service.
///
/// Kept `Clone` so mock HTTP clients can hand out canned results in tests.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Transport-level HTTP failure (connect, timeout, non-2xx status).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The server answered with an error document instead of image data.
    #[error("server returned an error document")]
    ServerError,

    /// The fetch was aborted by instance shutdown.
    #[error("fetch cancelled by shutdown")]
    Cancelled,

    /// Local filesystem failure while persisting the tile.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        FetchError::Io(e.to_string())
    }
}

/// Errors raised while parsing a wire request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The request text was empty.
    #[error("empty request")]
    Empty,

    /// A known command arrived with the wrong number of fields.
    #[error("command '{command}' expects {expected} fields, got {actual}")]
    FieldCount {
        command: String,
        expected: usize,
        actual: usize,
    },

    /// The command name is not part of the protocol.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}

/// Errors surfaced by instance creation and registry operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The channel endpoint could not be created or used.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The HTTP transport could not be initialized.
    #[error("failed to initialize HTTP transport: {0}")]
    Http(#[from] FetchError),

    /// The addressed instance does not exist or was already destroyed.
    #[error("no instance with id {0}")]
    NoSuchInstance(usize),
}

//! Transport error definitions.

use thiserror::Error;

/// Errors raised while wiring or operating a channel.
///
/// Every variant is a lifecycle error: the remote execution context is
/// missing or could not be created. Callers abort the context setup instead
/// of retrying.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The embedded document is detached or was never attached.
    #[error("Embedded document has no content window")]
    NoContentWindow,

    /// The document was not created inside a parent document.
    #[error("Document has no parent window")]
    NoParentWindow,

    /// The paired execution context has been torn down.
    #[error("Remote execution context is gone")]
    PeerGone,

    /// No host half is waiting for the given pairing id.
    #[error("No dynamic script channel registered with id {0}")]
    PairingNotFound(u64),

    /// A cross-context inbox was wired outside of a Tokio runtime.
    #[error("No async runtime available to pump messages for {0}")]
    NoRuntime(String),

    /// The script catalog has no entry for the requested location.
    #[error("No script registered for location: {0}")]
    UnknownLocation(String),

    /// The location could not be resolved against the base URL.
    #[error("Invalid location '{location}': {source}")]
    InvalidLocation {
        location: String,
        #[source]
        source: url::ParseError,
    },

    /// The OS refused to start the context thread.
    #[error("Failed to spawn execution context: {0}")]
    ContextSpawn(#[from] std::io::Error),
}

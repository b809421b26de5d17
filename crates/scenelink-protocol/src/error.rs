//! Protocol error definitions.

use scenelink_transport::TransportError;
use thiserror::Error;

/// Errors that can occur while running the synchronization protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The channel could not be wired or its peer is gone.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// An envelope or world document could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reading or writing a world document failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No tool with that name is attached to the host.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// A tool with that name is already attached to the host.
    #[error("Tool already attached: {0}")]
    DuplicateTool(String),

    /// The tool has not received its first snapshot yet.
    #[error("Tool {0} has not been initialized")]
    NotInitialized(String),
}

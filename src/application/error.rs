// Error taxonomy for the communication layer
use crate::domain::level::NodeAddress;
use thiserror::Error;

/// Failures moving a message between processes.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Node unreachable: {0}")]
    Unreachable(String),

    #[error("Delivery to {node} rejected with status {status}")]
    Rejected { node: String, status: u16 },

    #[error("HTTP request failed: {0}")]
    Http(String),
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("Message {0} has no target id")]
    MissingTarget(String),

    #[error("Target {0} is not reachable from this node")]
    UnknownTarget(NodeAddress),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("No acknowledgement for message {message_id} within {timeout_ms} ms")]
    AckTimeout { message_id: String, timeout_ms: u64 },
}

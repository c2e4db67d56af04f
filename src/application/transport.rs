// Transport contract consumed by the communication service
use crate::application::error::TransportError;
use crate::domain::level::{DashboardLevel, NodeAddress};
use crate::domain::message::DashboardMessage;
use async_trait::async_trait;

#[async_trait]
pub trait DashboardTransport: Send + Sync {
    /// Deliver one message to one node. Success means the receiving node
    /// accepted the envelope, not that any handler produced a reply.
    async fn deliver(&self, target: &NodeAddress, message: &DashboardMessage) -> Result<(), TransportError>;

    /// Nodes at `level` this node can currently address.
    fn reachable_nodes(&self, level: DashboardLevel) -> Vec<NodeAddress>;
}

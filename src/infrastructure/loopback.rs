// In-process transport connecting several nodes in one runtime
use crate::application::communication_service::CommunicationService;
use crate::application::error::TransportError;
use crate::application::transport::DashboardTransport;
use crate::domain::level::{DashboardLevel, NodeAddress};
use crate::domain::message::DashboardMessage;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};

/// Shared routing table for loopback nodes.
///
/// Nodes are held weakly so dropping a service removes it from the mesh.
/// A node can be made unreachable (delivery fails) or silent (delivery
/// succeeds but the message is lost).
#[derive(Default)]
pub struct LoopbackNetwork {
    nodes: RwLock<BTreeMap<String, (DashboardLevel, Weak<CommunicationService>)>>,
    unreachable: RwLock<HashSet<String>>,
    silent: RwLock<HashSet<String>>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a communication service for `address` and attach it.
    pub fn join(self: &Arc<Self>, address: NodeAddress) -> Arc<CommunicationService> {
        let transport = Arc::new(LoopbackTransport {
            network: self.clone(),
            me: address.id.clone(),
        });
        let service = Arc::new(CommunicationService::new(address.clone(), transport));
        self.nodes
            .write()
            .insert(address.id, (address.level, Arc::downgrade(&service)));
        service
    }

    pub fn set_unreachable(&self, id: &str, unreachable: bool) {
        toggle(&self.unreachable, id, unreachable);
    }

    pub fn set_silent(&self, id: &str, silent: bool) {
        toggle(&self.silent, id, silent);
    }
}

fn toggle(set: &RwLock<HashSet<String>>, id: &str, on: bool) {
    if on {
        set.write().insert(id.to_string());
    } else {
        set.write().remove(id);
    }
}

pub struct LoopbackTransport {
    network: Arc<LoopbackNetwork>,
    me: String,
}

#[async_trait]
impl DashboardTransport for LoopbackTransport {
    async fn deliver(&self, target: &NodeAddress, message: &DashboardMessage) -> Result<(), TransportError> {
        if self.network.unreachable.read().contains(&target.id) {
            return Err(TransportError::Unreachable(target.id.clone()));
        }

        let service = {
            let nodes = self.network.nodes.read();
            let (_, weak) = nodes
                .get(&target.id)
                .ok_or_else(|| TransportError::UnknownNode(target.id.clone()))?;
            weak.upgrade()
                .ok_or_else(|| TransportError::Unreachable(target.id.clone()))?
        };

        if self.network.silent.read().contains(&target.id) {
            tracing::debug!("Loopback dropped {} to silent node {}", message.message_type(), target);
            return Ok(());
        }

        let message = message.clone();
        tokio::spawn(async move {
            service.receive(message).await;
        });
        Ok(())
    }

    fn reachable_nodes(&self, level: DashboardLevel) -> Vec<NodeAddress> {
        self.network
            .nodes
            .read()
            .iter()
            .filter(|(id, (node_level, _))| *node_level == level && **id != self.me)
            .map(|(id, (node_level, _))| NodeAddress::new(*node_level, id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::communication_service::MessageHandler;
    use crate::domain::message::MessageType;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Inbox {
        received: Mutex<Vec<DashboardMessage>>,
    }

    #[async_trait]
    impl MessageHandler for Inbox {
        fn name(&self) -> &str {
            "inbox"
        }

        fn accepts(&self, _message: &DashboardMessage) -> bool {
            true
        }

        async fn handle(&self, message: &DashboardMessage) -> Option<DashboardMessage> {
            self.received.lock().push(message.clone());
            None
        }
    }

    #[tokio::test]
    async fn test_reachable_nodes_excludes_self() {
        let net = LoopbackNetwork::new();
        let r = net.join(NodeAddress::new(DashboardLevel::Regional, "emea"));
        let _b1 = net.join(NodeAddress::new(DashboardLevel::Branch, "b1"));
        let _b2 = net.join(NodeAddress::new(DashboardLevel::Branch, "b2"));
        let _r2 = net.join(NodeAddress::new(DashboardLevel::Regional, "apac"));

        let branches = r.reachable_nodes(DashboardLevel::Branch);
        assert_eq!(branches.len(), 2);
        let regionals = r.reachable_nodes(DashboardLevel::Regional);
        assert_eq!(regionals, vec![NodeAddress::new(DashboardLevel::Regional, "apac")]);
    }

    #[tokio::test]
    async fn test_delivery_reaches_handler_and_failures_are_reported() {
        let net = LoopbackNetwork::new();
        let r = net.join(NodeAddress::new(DashboardLevel::Regional, "emea"));
        let b1 = net.join(NodeAddress::new(DashboardLevel::Branch, "b1"));
        let _b2 = net.join(NodeAddress::new(DashboardLevel::Branch, "b2"));
        let inbox = Arc::new(Inbox::default());
        b1.register_handler(inbox.clone());
        net.set_unreachable("b2", true);

        let msg = DashboardMessage::builder(MessageType::PolicyUpdate, r.identity(), DashboardLevel::Branch).build();
        let result = r.broadcast(&msg, &[DashboardLevel::Branch], None).await;
        assert_eq!(result.get("b1"), Some(true));
        assert_eq!(result.get("b2"), Some(false));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(inbox.received.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_node_is_unreachable() {
        let net = LoopbackNetwork::new();
        let r = net.join(NodeAddress::new(DashboardLevel::Regional, "emea"));
        let b1 = net.join(NodeAddress::new(DashboardLevel::Branch, "b1"));
        drop(b1);

        let msg = DashboardMessage::builder(MessageType::StatusUpdate, r.identity(), DashboardLevel::Branch)
            .target_id("b1")
            .build();
        assert!(r.send(&msg).await.is_err());
    }
}

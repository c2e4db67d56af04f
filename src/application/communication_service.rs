// Communication service - Addressed/broadcast delivery and handler dispatch
use crate::application::error::DashboardError;
use crate::application::transport::DashboardTransport;
use crate::domain::level::{DashboardLevel, NodeAddress};
use crate::domain::message::{keys, DashboardMessage};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

pub type HandlerId = u64;

/// A message handler registered with the communication service.
///
/// At most one registered handler should return a response for any given
/// `(message type, source level)` pair. When more than one does, only the
/// first registered responder's reply is sent.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &str;

    fn accepts(&self, message: &DashboardMessage) -> bool;

    /// Handle an inbound message, optionally producing a reply for the sender.
    async fn handle(&self, message: &DashboardMessage) -> Option<DashboardMessage>;
}

/// Per-node outcome of a broadcast. Every addressed node has an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BroadcastResult {
    results: BTreeMap<String, bool>,
}

impl BroadcastResult {
    pub fn get(&self, node_id: &str) -> Option<bool> {
        self.results.get(node_id).copied()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.results.values().filter(|ok| **ok).count()
    }

    /// Convenience view: at least one node accepted the message.
    pub fn any_succeeded(&self) -> bool {
        self.success_count() > 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub matched: usize,
    pub responded: bool,
    pub dropped_responses: usize,
    pub completed_ack: bool,
}

/// A sent message whose acknowledgement has not arrived yet.
#[derive(Debug)]
pub struct PendingAck {
    message_id: String,
    waiter: oneshot::Receiver<DashboardMessage>,
}

pub struct CommunicationService {
    identity: NodeAddress,
    transport: Arc<dyn DashboardTransport>,
    handlers: RwLock<Vec<(HandlerId, Arc<dyn MessageHandler>)>>,
    next_handler_id: AtomicU64,
    pending_acks: Mutex<HashMap<String, oneshot::Sender<DashboardMessage>>>,
}

impl CommunicationService {
    pub fn new(identity: NodeAddress, transport: Arc<dyn DashboardTransport>) -> Self {
        Self {
            identity,
            transport,
            handlers: RwLock::new(Vec::new()),
            next_handler_id: AtomicU64::new(1),
            pending_acks: Mutex::new(HashMap::new()),
        }
    }

    pub fn current_id(&self) -> &str {
        &self.identity.id
    }

    pub fn identity(&self) -> &NodeAddress {
        &self.identity
    }

    pub fn reachable_nodes(&self, level: DashboardLevel) -> Vec<NodeAddress> {
        self.transport.reachable_nodes(level)
    }

    /// Deliver to exactly one `(target level, target id)`.
    pub async fn send(&self, message: &DashboardMessage) -> Result<(), DashboardError> {
        let target_id = message
            .target_id()
            .ok_or_else(|| DashboardError::MissingTarget(message.id().to_string()))?;
        let target = NodeAddress::new(message.target_level(), target_id);

        let known = self
            .transport
            .reachable_nodes(target.level)
            .iter()
            .any(|n| n.id == target.id);
        if !known {
            tracing::warn!("Cannot send {} {}: unknown target {}", message.message_type(), message.id(), target);
            return Err(DashboardError::UnknownTarget(target));
        }

        match self.transport.deliver(&target, message).await {
            Ok(()) => {
                tracing::debug!("Sent {} {} to {}", message.message_type(), message.id(), target);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to send {} {} to {}: {}", message.message_type(), message.id(), target, e);
                Err(e.into())
            }
        }
    }

    /// Deliver to every reachable node at `levels` except `exclude_id`.
    /// Individual failures show up as `false`; the call itself never fails.
    pub async fn broadcast(
        &self,
        message: &DashboardMessage,
        levels: &[DashboardLevel],
        exclude_id: Option<&str>,
    ) -> BroadcastResult {
        let mut seen = HashSet::new();
        let targets: Vec<NodeAddress> = levels
            .iter()
            .flat_map(|level| self.transport.reachable_nodes(*level))
            .filter(|node| Some(node.id.as_str()) != exclude_id)
            .filter(|node| seen.insert(node.id.clone()))
            .collect();

        let deliveries = targets.iter().map(|target| async move {
            let outcome = self.transport.deliver(target, message).await;
            if let Err(e) = &outcome {
                tracing::warn!("Broadcast of {} {} to {} failed: {}", message.message_type(), message.id(), target, e);
            }
            (target.id.clone(), outcome.is_ok())
        });

        let result = BroadcastResult {
            results: join_all(deliveries).await.into_iter().collect(),
        };
        tracing::debug!(
            "Broadcast {} {} reached {}/{} nodes",
            message.message_type(),
            message.id(),
            result.success_count(),
            result.len()
        );
        result
    }

    pub fn register_handler(&self, handler: Arc<dyn MessageHandler>) -> HandlerId {
        let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Registered message handler {} ({})", handler.name(), id);
        self.handlers.write().push((id, handler));
        id
    }

    pub fn unregister_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    /// Inbound entry point used by transports.
    pub async fn receive(&self, message: DashboardMessage) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        if let Some(target_id) = message.target_id() {
            if target_id != self.identity.id {
                tracing::warn!("Ignoring {} {} addressed to {}", message.message_type(), message.id(), target_id);
                return outcome;
            }
        }

        if message.message_type().is_acknowledgement() {
            outcome.completed_ack = self.complete_pending_ack(&message);
        }

        let handlers: Vec<Arc<dyn MessageHandler>> = self
            .handlers
            .read()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();

        let mut reply: Option<DashboardMessage> = None;
        for handler in handlers.iter().filter(|h| h.accepts(&message)) {
            outcome.matched += 1;
            if let Some(response) = handler.handle(&message).await {
                if reply.is_none() {
                    reply = Some(response);
                } else {
                    outcome.dropped_responses += 1;
                    tracing::warn!(
                        "Handler {} produced a second response to {} {}; dropping it",
                        handler.name(),
                        message.message_type(),
                        message.id()
                    );
                }
            }
        }

        if outcome.matched == 0 && !outcome.completed_ack {
            tracing::debug!("No handler for {} from {}", message.message_type(), message.source());
        }

        if let Some(response) = reply {
            outcome.responded = true;
            // Send failures are already logged.
            let _ = self.send(&response).await;
        }

        outcome
    }

    /// Send and wait for the MESSAGE_ACK or ACTION_RESPONSE that references
    /// this message. Gives up after `timeout`; nothing is retried.
    pub async fn send_expecting_ack(
        &self,
        message: &DashboardMessage,
        timeout: Duration,
    ) -> Result<DashboardMessage, DashboardError> {
        let pending = self.send_tracked(message).await?;
        self.await_ack(pending, timeout).await
    }

    /// Register the acknowledgement waiter, then send. Delivery failures come
    /// back here, before any waiting starts.
    pub async fn send_tracked(&self, message: &DashboardMessage) -> Result<PendingAck, DashboardError> {
        let (tx, rx) = oneshot::channel();
        self.pending_acks.lock().insert(message.id().to_string(), tx);

        if let Err(e) = self.send(message).await {
            self.pending_acks.lock().remove(message.id());
            return Err(e);
        }
        Ok(PendingAck {
            message_id: message.id().to_string(),
            waiter: rx,
        })
    }

    pub async fn await_ack(&self, pending: PendingAck, timeout: Duration) -> Result<DashboardMessage, DashboardError> {
        match tokio::time::timeout(timeout, pending.waiter).await {
            Ok(Ok(ack)) => Ok(ack),
            _ => {
                self.pending_acks.lock().remove(&pending.message_id);
                tracing::warn!(
                    "AckTimeout: no acknowledgement for {} within {:?}",
                    pending.message_id,
                    timeout
                );
                Err(DashboardError::AckTimeout {
                    message_id: pending.message_id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    pub fn pending_ack_count(&self) -> usize {
        self.pending_acks.lock().len()
    }

    fn complete_pending_ack(&self, ack: &DashboardMessage) -> bool {
        let Some(original) = ack.meta(keys::ORIGINAL_MESSAGE_ID) else {
            return false;
        };
        match self.pending_acks.lock().remove(original) {
            Some(waiter) => waiter.send(ack.clone()).is_ok(),
            None => false,
        }
    }
}

// Regional tier policy - Relays between GLOBAL above and BRANCH/LOCAL below
use crate::application::communication_service::{CommunicationService, MessageHandler, PendingAck};
use crate::application::error::DashboardError;
use crate::application::escalation::EscalationPolicy;
use crate::application::tier_state::TierState;
use crate::domain::level::{DashboardLevel, NodeAddress};
use crate::domain::message::{DashboardMessage, MessageBuilder, MessageType};
use crate::domain::payload::MessagePayload;
use crate::domain::provenance::{self, BroadcastRoute};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use std::time::Duration;

const DOWNWARD: [DashboardLevel; 2] = [DashboardLevel::Branch, DashboardLevel::Local];
const ESCALATION_FAILED: &str = "ESCALATION_FAILED";
const ESCALATION_TIMEOUT: &str = "ESCALATION_TIMEOUT";

pub struct RegionalDashboardHandler {
    identity: NodeAddress,
    communication: Weak<CommunicationService>,
    policy: EscalationPolicy,
    state: Arc<TierState>,
    ack_timeout: Duration,
}

impl RegionalDashboardHandler {
    /// Build the handler and register it with `communication`.
    pub fn register(
        communication: &Arc<CommunicationService>,
        policy: EscalationPolicy,
        state: Arc<TierState>,
        ack_timeout: Duration,
    ) -> Arc<Self> {
        let handler = Arc::new(Self {
            identity: communication.identity().clone(),
            communication: Arc::downgrade(communication),
            policy,
            state,
            ack_timeout,
        });
        communication.register_handler(handler.clone());
        handler
    }

    fn from_global(message: &DashboardMessage) -> bool {
        message.source_level() == DashboardLevel::Global
    }

    fn from_below(message: &DashboardMessage) -> bool {
        matches!(message.source_level(), DashboardLevel::Branch | DashboardLevel::Local)
    }

    async fn handle_from_global(&self, message: &DashboardMessage) -> Option<DashboardMessage> {
        match message.message_type() {
            MessageType::PolicyUpdate => {
                self.state.apply_policy(message);
                self.relay_down(message).await;
                None
            }
            MessageType::ConfigChange => {
                self.state.apply_config(message);
                if self.policy.is_relevant_for_branches(message) {
                    self.relay_down(message).await;
                }
                None
            }
            MessageType::StatusUpdate => {
                self.state.record_status(message);
                None
            }
            MessageType::ActionRequest => {
                self.state.record_action(message);
                Some(self.action_response(message, "COMPLETED"))
            }
            _ => None,
        }
    }

    async fn handle_from_below(&self, message: &DashboardMessage) -> Option<DashboardMessage> {
        match message.message_type() {
            MessageType::StatusUpdate => {
                self.state.record_status(message);
                if self.policy.is_relevant_for_global(message) {
                    let summary = self.status_summary(message);
                    self.escalate(message, MessageType::StatusUpdate, Some(summary)).await;
                }
                None
            }
            MessageType::Alert | MessageType::CriticalAlert => {
                self.state.record_alert(message);
                let critical = self.policy.is_critical(message);
                if critical || self.policy.is_alert_relevant_for_global(message) {
                    self.escalate(message, message.message_type(), None).await;
                }
                critical.then(|| self.ack(message))
            }
            MessageType::MetricReport => {
                self.state.record_metric_report(message);
                None
            }
            MessageType::PerformanceIssue => {
                self.state.record_alert(message);
                if self.policy.is_performance_issue_significant(message) {
                    self.escalate(message, MessageType::PerformanceIssue, None).await;
                }
                Some(self.ack(message))
            }
            MessageType::ActionRequest => {
                if self.policy.is_resolvable_locally(message) {
                    self.state.record_action(message);
                    return Some(self.action_response(message, "COMPLETED"));
                }
                self.escalate_action(message).await
            }
            _ => None,
        }
    }

    /// Rebroadcast a message from GLOBAL to every branch and local node,
    /// excluding any node already in its chain. Each tier gets its own copy
    /// addressed to that tier.
    async fn relay_down(&self, message: &DashboardMessage) {
        let Some(communication) = self.communication.upgrade() else {
            return;
        };
        let exclude = match provenance::broadcast_route(message, &DOWNWARD) {
            BroadcastRoute::Open => None,
            BroadcastRoute::Exclude(id) => Some(id),
            BroadcastRoute::Suppressed => {
                tracing::debug!("Suppressed downward relay of {}: chain already spans lower tiers", message.id());
                return;
            }
        };

        let (mut reached, mut addressed) = (0, 0);
        for level in DOWNWARD {
            let relayed = provenance::forward_message(message, &self.identity, message.message_type(), level, None);
            let result = communication.broadcast(&relayed, &[level], exclude.as_deref()).await;
            reached += result.success_count();
            addressed += result.len();
        }
        tracing::info!(
            "Relayed {} {} down to {}/{} nodes",
            message.message_type(),
            message.id(),
            reached,
            addressed
        );
    }

    /// GLOBAL nodes a forward of `message` may go to, in directory order.
    fn global_targets(&self, communication: &CommunicationService, message: &DashboardMessage) -> Vec<NodeAddress> {
        communication
            .reachable_nodes(DashboardLevel::Global)
            .into_iter()
            .filter(|target| {
                let loops = provenance::would_loop(message, target.level, Some(&target.id));
                if loops {
                    tracing::debug!("Dropping forward of {} to {}: it originated there", message.id(), target);
                }
                !loops
            })
            .collect()
    }

    fn forward_to(
        &self,
        message: &DashboardMessage,
        message_type: MessageType,
        target: &NodeAddress,
        content: Option<&str>,
    ) -> DashboardMessage {
        let mut builder = provenance::forward_builder(message, &self.identity, message_type, target.level)
            .target_id(target.id.clone());
        if let Some(content) = content {
            builder = builder.content(content);
        }
        builder.build()
    }

    /// Forward to every eligible GLOBAL node.
    async fn escalate(&self, message: &DashboardMessage, message_type: MessageType, content: Option<String>) {
        let Some(communication) = self.communication.upgrade() else {
            return;
        };
        let watch = self.policy.is_critical(message)
            && matches!(message_type, MessageType::Alert | MessageType::CriticalAlert);

        let mut sent = 0;
        for target in self.global_targets(&communication, message) {
            let forwarded = self.forward_to(message, message_type, &target, content.as_deref());
            let delivered = if watch {
                match communication.send_tracked(&forwarded).await {
                    Ok(pending) => {
                        watch_ack(communication.clone(), pending, self.ack_timeout);
                        true
                    }
                    Err(_) => false,
                }
            } else {
                communication.send(&forwarded).await.is_ok()
            };
            if delivered {
                sent += 1;
            }
        }

        if sent > 0 {
            tracing::info!("Escalated {} {} from {} to GLOBAL", message.message_type(), message.id(), message.source());
        } else {
            tracing::warn!(
                "Could not escalate {} {} from {}: no GLOBAL node accepted it",
                message.message_type(),
                message.id(),
                message.source()
            );
        }
    }

    /// Hand an action request to one GLOBAL node, trying eligible nodes in
    /// order until one accepts it. Returns the immediate failure reply when
    /// none does; otherwise the answer is relayed once it arrives.
    async fn escalate_action(&self, message: &DashboardMessage) -> Option<DashboardMessage> {
        let Some(communication) = self.communication.upgrade() else {
            return Some(self.action_response(message, ESCALATION_FAILED));
        };

        for target in self.global_targets(&communication, message) {
            let forwarded = self.forward_to(message, MessageType::ActionRequest, &target, None);
            if let Ok(pending) = communication.send_tracked(&forwarded).await {
                tracing::info!("Escalated action request {} from {} to {}", message.id(), message.source(), target);
                defer_action(
                    communication.clone(),
                    self.identity.clone(),
                    message.clone(),
                    pending,
                    self.ack_timeout,
                );
                return None;
            }
        }

        tracing::warn!("No GLOBAL node accepted action request {} from {}", message.id(), message.source());
        Some(self.action_response(message, ESCALATION_FAILED))
    }

    fn status_summary(&self, message: &DashboardMessage) -> String {
        let reporting = self.state.snapshot().statuses.len();
        format!(
            "Regional {} ({} nodes reporting): escalated status from {}: {}",
            self.identity.id,
            reporting,
            provenance::origin(message),
            message.content()
        )
    }

    fn ack(&self, message: &DashboardMessage) -> DashboardMessage {
        message
            .reply(MessageType::MessageAck, &self.identity)
            .subject(format!("ack {}", message.message_type()))
            .build()
    }

    fn action_response(&self, message: &DashboardMessage, status: &str) -> DashboardMessage {
        action_reply(message, &self.identity, status)
            .subject(format!("response to {}", message.subject()))
            .build()
    }
}

fn action_reply(request: &DashboardMessage, responder: &NodeAddress, status: &str) -> MessageBuilder {
    request
        .reply(MessageType::ActionResponse, responder)
        .payload(MessagePayload::ActionResponse {
            original_message_id: Some(request.id().to_string()),
            status: Some(status.to_string()),
        })
}

/// Log whether GLOBAL acknowledges a critical forward in time.
fn watch_ack(communication: Arc<CommunicationService>, pending: PendingAck, timeout: Duration) {
    tokio::spawn(async move {
        if let Ok(ack) = communication.await_ack(pending, timeout).await {
            tracing::debug!("GLOBAL {} acknowledged {}", ack.source_id(), provenance::original_message_id(&ack));
        }
    });
}

/// Wait for GLOBAL's answer to a forwarded action request and relay it to
/// the requester, referencing the requester's own message id.
fn defer_action(
    communication: Arc<CommunicationService>,
    identity: NodeAddress,
    request: DashboardMessage,
    pending: PendingAck,
    timeout: Duration,
) {
    tokio::spawn(async move {
        let relay = match communication.await_ack(pending, timeout).await {
            Ok(answer) => {
                let status = match answer.payload() {
                    MessagePayload::ActionResponse { status, .. } => status,
                    _ => None,
                };
                action_reply(&request, &identity, status.as_deref().unwrap_or("COMPLETED"))
                    .subject(answer.subject())
                    .content(answer.content())
                    .meta("respondedBy", answer.source_id())
                    .build()
            }
            Err(e) => {
                tracing::warn!("Action request {} got no answer from GLOBAL: {}", request.id(), e);
                let (status, reason) = match e {
                    DashboardError::AckTimeout { .. } => (ESCALATION_TIMEOUT, "No response from GLOBAL"),
                    _ => (ESCALATION_FAILED, "GLOBAL could not be reached"),
                };
                action_reply(&request, &identity, status).content(reason).build()
            }
        };
        let _ = communication.send(&relay).await;
    });
}

#[async_trait]
impl MessageHandler for RegionalDashboardHandler {
    fn name(&self) -> &str {
        "regional-policy"
    }

    fn accepts(&self, message: &DashboardMessage) -> bool {
        use MessageType::*;
        if Self::from_global(message) {
            matches!(message.message_type(), PolicyUpdate | ConfigChange | StatusUpdate | ActionRequest)
        } else if Self::from_below(message) {
            matches!(
                message.message_type(),
                StatusUpdate | Alert | CriticalAlert | MetricReport | PerformanceIssue | ActionRequest
            )
        } else {
            false
        }
    }

    async fn handle(&self, message: &DashboardMessage) -> Option<DashboardMessage> {
        if Self::from_global(message) {
            self.handle_from_global(message).await
        } else {
            self.handle_from_below(message).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::communication_service::tests::RecordingTransport;
    use crate::application::endpoint_handler::EndpointTierHandler;
    use crate::domain::message::keys;
    use crate::infrastructure::config::EscalationConfig;
    use crate::infrastructure::loopback::LoopbackNetwork;
    use parking_lot::Mutex;

    fn regional() -> NodeAddress {
        NodeAddress::new(DashboardLevel::Regional, "emea")
    }

    fn topology() -> Vec<NodeAddress> {
        vec![
            NodeAddress::new(DashboardLevel::Global, "hq"),
            NodeAddress::new(DashboardLevel::Branch, "b1"),
            NodeAddress::new(DashboardLevel::Branch, "b2"),
            NodeAddress::new(DashboardLevel::Local, "courier-9"),
        ]
    }

    fn setup() -> (Arc<RecordingTransport>, Arc<CommunicationService>, Arc<TierState>) {
        let transport = Arc::new(RecordingTransport::with_nodes(topology()));
        let comm = Arc::new(CommunicationService::new(regional(), transport.clone()));
        let state = Arc::new(TierState::new());
        RegionalDashboardHandler::register(
            &comm,
            EscalationPolicy::new(EscalationConfig::default()),
            state.clone(),
            Duration::from_secs(30),
        );
        (transport, comm, state)
    }

    fn from(level: DashboardLevel, id: &str, message_type: MessageType) -> crate::domain::message::MessageBuilder {
        DashboardMessage::builder(message_type, &NodeAddress::new(level, id), DashboardLevel::Regional).target_id("emea")
    }

    fn sent_to(transport: &RecordingTransport, id: &str) -> Vec<DashboardMessage> {
        transport
            .sent()
            .into_iter()
            .filter(|(target, _)| target.id == id)
            .map(|(_, m)| m)
            .collect()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_policy_update_applied_and_broadcast_down() {
        let (transport, comm, state) = setup();
        let policy = from(DashboardLevel::Global, "hq", MessageType::PolicyUpdate)
            .content("Signature required over 500 EUR")
            .meta(keys::POLICY_KEY, "signature-threshold")
            .build();

        let outcome = comm.receive(policy.clone()).await;

        assert!(!outcome.responded);
        assert!(state.policy("signature-threshold").is_some());
        for (id, level) in [
            ("b1", DashboardLevel::Branch),
            ("b2", DashboardLevel::Branch),
            ("courier-9", DashboardLevel::Local),
        ] {
            let got = sent_to(&transport, id);
            assert_eq!(got.len(), 1, "node {}", id);
            assert_eq!(got[0].message_type(), MessageType::PolicyUpdate);
            assert_eq!(got[0].target_level(), level, "node {}", id);
            assert_eq!(got[0].content(), policy.content());
            assert_eq!(got[0].meta(keys::ORIGINAL_SOURCE_ID), Some("hq"));
        }
        assert!(sent_to(&transport, "hq").is_empty());
    }

    #[tokio::test]
    async fn test_config_change_only_relayed_when_relevant() {
        let (transport, comm, _state) = setup();
        let regional_only = from(DashboardLevel::Global, "hq", MessageType::ConfigChange)
            .content("Regional reporting currency is EUR")
            .build();
        comm.receive(regional_only).await;
        assert!(transport.sent().is_empty());

        let branch_wide = from(DashboardLevel::Global, "hq", MessageType::ConfigChange)
            .content("Cut-off moves to 17:00")
            .meta(keys::APPLY_TO_BRANCHES, "true")
            .build();
        comm.receive(branch_wide).await;
        assert_eq!(transport.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_critical_alert_forwarded_and_acknowledged() {
        let (transport, comm, state) = setup();
        let alert = from(DashboardLevel::Branch, "b1", MessageType::Alert)
            .content("outage detected")
            .meta(keys::SEVERITY, "critical")
            .build();

        let outcome = comm.receive(alert.clone()).await;
        settle().await;

        assert!(outcome.responded);
        assert_eq!(state.alert_count(), 1);

        let to_global = sent_to(&transport, "hq");
        assert_eq!(to_global.len(), 1);
        let fwd = &to_global[0];
        assert_eq!(fwd.message_type(), MessageType::Alert);
        assert_eq!(fwd.source_id(), "emea");
        assert_eq!(fwd.meta(keys::ORIGINAL_SOURCE_ID), Some("b1"));
        assert_eq!(fwd.meta(keys::ORIGINAL_MESSAGE_ID), Some(alert.id()));
        assert_eq!(fwd.meta(keys::FORWARDED_BY), Some("emea"));

        let to_branch = sent_to(&transport, "b1");
        assert_eq!(to_branch.len(), 1);
        assert_eq!(to_branch[0].message_type(), MessageType::MessageAck);
        assert_eq!(to_branch[0].meta(keys::ORIGINAL_MESSAGE_ID), Some(alert.id()));
    }

    #[tokio::test]
    async fn test_minor_alert_is_stored_only() {
        let (transport, comm, state) = setup();
        let alert = from(DashboardLevel::Branch, "b1", MessageType::Alert)
            .content("label printer low on paper")
            .meta(keys::SEVERITY, "low")
            .build();

        let outcome = comm.receive(alert).await;

        assert!(!outcome.responded);
        assert_eq!(state.alert_count(), 1);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_alert_never_forwarded_back_to_its_origin() {
        let (transport, comm, _state) = setup();
        // A GLOBAL-originated message bounced up by a branch.
        let bounced = from(DashboardLevel::Branch, "b1", MessageType::CriticalAlert)
            .content("critical: depot closed")
            .meta(keys::ORIGINAL_MESSAGE_ID, "m-1")
            .meta(keys::ORIGINAL_SOURCE_LEVEL, "GLOBAL")
            .meta(keys::ORIGINAL_SOURCE_ID, "hq")
            .meta(keys::FORWARDED_BY, "b1")
            .build();

        let outcome = comm.receive(bounced).await;
        settle().await;

        assert!(sent_to(&transport, "hq").is_empty());
        assert!(outcome.responded, "sender is still acknowledged");
        assert_eq!(sent_to(&transport, "b1").len(), 1);
    }

    #[tokio::test]
    async fn test_policy_from_branch_origin_not_relayed_back_to_it() {
        let (transport, comm, _state) = setup();
        let policy = from(DashboardLevel::Global, "hq", MessageType::PolicyUpdate)
            .content("Adopt b2's sorting layout")
            .meta(keys::ORIGINAL_MESSAGE_ID, "m-7")
            .meta(keys::ORIGINAL_SOURCE_LEVEL, "BRANCH")
            .meta(keys::ORIGINAL_SOURCE_ID, "b2")
            .build();

        comm.receive(policy).await;

        assert_eq!(sent_to(&transport, "b1").len(), 1);
        assert_eq!(sent_to(&transport, "courier-9").len(), 1);
        assert!(sent_to(&transport, "b2").is_empty());
    }

    #[tokio::test]
    async fn test_metric_report_consumed_locally() {
        let (transport, comm, state) = setup();
        let report = from(DashboardLevel::Branch, "b2", MessageType::MetricReport)
            .content("{\"deliveries\": 12}")
            .meta(keys::DATA_TYPE, "DELIVERY_METRICS")
            .build();

        let outcome = comm.receive(report).await;

        assert_eq!(outcome.matched, 1);
        assert!(transport.sent().is_empty());
        assert_eq!(state.snapshot().metric_reports.len(), 1);
    }

    #[tokio::test]
    async fn test_performance_issue_always_acknowledged() {
        let (transport, comm, _state) = setup();
        let minor = from(DashboardLevel::Local, "courier-9", MessageType::PerformanceIssue)
            .content("scanner slow")
            .meta(keys::IMPACT, "low")
            .build();
        let major = from(DashboardLevel::Branch, "b1", MessageType::PerformanceIssue)
            .content("sorting line stalled")
            .meta(keys::IMPACT, "major")
            .build();

        assert!(comm.receive(minor).await.responded);
        assert!(comm.receive(major).await.responded);

        assert_eq!(sent_to(&transport, "hq").len(), 1);
        assert_eq!(sent_to(&transport, "courier-9")[0].message_type(), MessageType::MessageAck);
    }

    #[tokio::test]
    async fn test_status_escalated_as_summary() {
        let (transport, comm, state) = setup();
        let routine = from(DashboardLevel::Branch, "b1", MessageType::StatusUpdate)
            .content("all vans out")
            .build();
        let severe = from(DashboardLevel::Branch, "b2", MessageType::StatusUpdate)
            .content("major flooding at depot")
            .build();

        comm.receive(routine).await;
        comm.receive(severe).await;

        let to_global = sent_to(&transport, "hq");
        assert_eq!(to_global.len(), 1);
        assert_eq!(to_global[0].message_type(), MessageType::StatusUpdate);
        assert!(to_global[0].content().contains("2 nodes reporting"));
        assert!(to_global[0].content().contains("major flooding at depot"));
        assert_eq!(to_global[0].meta(keys::ORIGINAL_SOURCE_ID), Some("b2"));
        assert!(state.status_of("b1").is_some());
    }

    #[tokio::test]
    async fn test_local_action_answered_by_regional() {
        let (transport, comm, _state) = setup();
        let request = from(DashboardLevel::Branch, "b1", MessageType::ActionRequest)
            .meta(keys::ACTION, "reroute_van")
            .build();

        let outcome = comm.receive(request.clone()).await;

        assert!(outcome.responded);
        let reply = &sent_to(&transport, "b1")[0];
        assert_eq!(reply.message_type(), MessageType::ActionResponse);
        assert_eq!(reply.meta(keys::ORIGINAL_MESSAGE_ID), Some(request.id()));
        assert_eq!(reply.meta(keys::STATUS), Some("COMPLETED"));
        assert!(sent_to(&transport, "hq").is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_global_fails_action_immediately() {
        let (transport, comm, _state) = setup();
        transport.down.lock().insert("hq".into());
        let request = from(DashboardLevel::Branch, "b1", MessageType::ActionRequest)
            .subject("approve overtime budget")
            .meta(keys::ACTION, "budget_approval")
            .build();

        let outcome = comm.receive(request.clone()).await;
        settle().await;

        assert!(outcome.responded);
        let replies = sent_to(&transport, "b1");
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].meta(keys::ORIGINAL_MESSAGE_ID), Some(request.id()));
        assert_eq!(replies[0].meta(keys::STATUS), Some("ESCALATION_FAILED"));
        assert_eq!(comm.pending_ack_count(), 0);
    }

    #[tokio::test]
    async fn test_critical_alert_to_unreachable_global_is_not_watched() {
        let (transport, comm, state) = setup();
        transport.down.lock().insert("hq".into());
        let alert = from(DashboardLevel::Branch, "b1", MessageType::CriticalAlert)
            .content("critical: depot fire")
            .build();

        let outcome = comm.receive(alert).await;
        settle().await;

        assert!(outcome.responded, "sender is still acknowledged");
        assert_eq!(state.alert_count(), 1);
        assert!(sent_to(&transport, "hq").is_empty());
        assert_eq!(comm.pending_ack_count(), 0);
    }

    /// Captures what a branch receives.
    #[derive(Default)]
    struct BranchInbox {
        received: Mutex<Vec<DashboardMessage>>,
    }

    #[async_trait]
    impl MessageHandler for BranchInbox {
        fn name(&self) -> &str {
            "branch-inbox"
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
    async fn test_global_action_deferred_and_relayed() {
        let net = LoopbackNetwork::new();
        let global = net.join(NodeAddress::new(DashboardLevel::Global, "hq"));
        let regional_comm = net.join(regional());
        let branch = net.join(NodeAddress::new(DashboardLevel::Branch, "b1"));

        let global_state = Arc::new(TierState::new());
        global.register_handler(Arc::new(EndpointTierHandler::new(
            global.identity().clone(),
            EscalationPolicy::new(EscalationConfig::default()),
            global_state.clone(),
        )));
        RegionalDashboardHandler::register(
            &regional_comm,
            EscalationPolicy::new(EscalationConfig::default()),
            Arc::new(TierState::new()),
            Duration::from_secs(5),
        );
        let inbox = Arc::new(BranchInbox::default());
        branch.register_handler(inbox.clone());

        let request = DashboardMessage::builder(MessageType::ActionRequest, branch.identity(), DashboardLevel::Regional)
            .target_id("emea")
            .subject("approve overtime budget")
            .meta(keys::ACTION, "budget_approval")
            .build();
        branch.send(&request).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        let received = inbox.received.lock().clone();
        assert_eq!(received.len(), 1);
        let answer = &received[0];
        assert_eq!(answer.message_type(), MessageType::ActionResponse);
        assert_eq!(answer.source_id(), "emea");
        assert_eq!(answer.meta(keys::ORIGINAL_MESSAGE_ID), Some(request.id()));
        assert_eq!(answer.meta(keys::STATUS), Some("COMPLETED"));
        assert_eq!(answer.meta("respondedBy"), Some("hq"));
        assert_eq!(global_state.snapshot().actions_handled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_escalation_times_out() {
        let net = LoopbackNetwork::new();
        let _global = net.join(NodeAddress::new(DashboardLevel::Global, "hq"));
        let regional_comm = net.join(regional());
        let branch = net.join(NodeAddress::new(DashboardLevel::Branch, "b1"));
        net.set_silent("hq", true);

        RegionalDashboardHandler::register(
            &regional_comm,
            EscalationPolicy::new(EscalationConfig::default()),
            Arc::new(TierState::new()),
            Duration::from_secs(5),
        );
        let inbox = Arc::new(BranchInbox::default());
        branch.register_handler(inbox.clone());

        let request = DashboardMessage::builder(MessageType::ActionRequest, branch.identity(), DashboardLevel::Regional)
            .target_id("emea")
            .meta(keys::REQUIRES_GLOBAL_HANDLING, "true")
            .build();
        branch.send(&request).await.unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;

        let received = inbox.received.lock().clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].meta(keys::STATUS), Some("ESCALATION_TIMEOUT"));
        assert_eq!(regional_comm.pending_ack_count(), 0);
    }

    fn global_endpoint(net: &Arc<LoopbackNetwork>, id: &str) -> (Arc<CommunicationService>, Arc<TierState>) {
        let node = net.join(NodeAddress::new(DashboardLevel::Global, id));
        let state = Arc::new(TierState::new());
        node.register_handler(Arc::new(EndpointTierHandler::new(
            node.identity().clone(),
            EscalationPolicy::new(EscalationConfig::default()),
            state.clone(),
        )));
        (node, state)
    }

    #[tokio::test]
    async fn test_action_goes_to_one_global_and_is_answered_once() {
        let net = LoopbackNetwork::new();
        let (_hq_node, hq) = global_endpoint(&net, "hq");
        let (_backup_node, hq_backup) = global_endpoint(&net, "hq-backup");
        let regional_comm = net.join(regional());
        let branch = net.join(NodeAddress::new(DashboardLevel::Branch, "b1"));
        RegionalDashboardHandler::register(
            &regional_comm,
            EscalationPolicy::new(EscalationConfig::default()),
            Arc::new(TierState::new()),
            Duration::from_secs(5),
        );
        let inbox = Arc::new(BranchInbox::default());
        branch.register_handler(inbox.clone());

        let request = DashboardMessage::builder(MessageType::ActionRequest, branch.identity(), DashboardLevel::Regional)
            .target_id("emea")
            .meta(keys::ACTION, "budget_approval")
            .build();
        branch.send(&request).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let received = inbox.received.lock().clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].meta(keys::STATUS), Some("COMPLETED"));
        assert_eq!(received[0].meta("respondedBy"), Some("hq"));
        assert_eq!(hq.snapshot().actions_handled, 1);
        assert_eq!(hq_backup.snapshot().actions_handled, 0);
    }

    #[tokio::test]
    async fn test_action_fails_over_to_next_global() {
        let net = LoopbackNetwork::new();
        let (_hq_node, _) = global_endpoint(&net, "hq");
        let (_backup_node, hq_backup) = global_endpoint(&net, "hq-backup");
        net.set_unreachable("hq", true);
        let regional_comm = net.join(regional());
        let branch = net.join(NodeAddress::new(DashboardLevel::Branch, "b1"));
        RegionalDashboardHandler::register(
            &regional_comm,
            EscalationPolicy::new(EscalationConfig::default()),
            Arc::new(TierState::new()),
            Duration::from_secs(5),
        );
        let inbox = Arc::new(BranchInbox::default());
        branch.register_handler(inbox.clone());

        let request = DashboardMessage::builder(MessageType::ActionRequest, branch.identity(), DashboardLevel::Regional)
            .target_id("emea")
            .meta(keys::ACTION, "budget_approval")
            .build();
        branch.send(&request).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let received = inbox.received.lock().clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].meta("respondedBy"), Some("hq-backup"));
        assert_eq!(hq_backup.snapshot().actions_handled, 1);
    }
}

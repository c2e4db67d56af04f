// Endpoint tier handler - GLOBAL and BRANCH nodes apply what they receive and never forward
use crate::application::communication_service::MessageHandler;
use crate::application::escalation::EscalationPolicy;
use crate::application::tier_state::TierState;
use crate::domain::level::NodeAddress;
use crate::domain::message::{DashboardMessage, MessageType};
use crate::domain::payload::MessagePayload;
use async_trait::async_trait;
use std::sync::Arc;

pub struct EndpointTierHandler {
    identity: NodeAddress,
    policy: EscalationPolicy,
    state: Arc<TierState>,
}

impl EndpointTierHandler {
    pub fn new(identity: NodeAddress, policy: EscalationPolicy, state: Arc<TierState>) -> Self {
        Self { identity, policy, state }
    }

    fn ack(&self, message: &DashboardMessage) -> DashboardMessage {
        message
            .reply(MessageType::MessageAck, &self.identity)
            .subject(format!("ack {}", message.message_type()))
            .build()
    }
}

#[async_trait]
impl MessageHandler for EndpointTierHandler {
    fn name(&self) -> &str {
        "endpoint-tier"
    }

    fn accepts(&self, message: &DashboardMessage) -> bool {
        use MessageType::*;
        matches!(
            message.message_type(),
            PolicyUpdate | ConfigChange | StatusUpdate | Alert | CriticalAlert | PerformanceIssue | ActionRequest
        )
    }

    async fn handle(&self, message: &DashboardMessage) -> Option<DashboardMessage> {
        match message.message_type() {
            MessageType::PolicyUpdate => {
                self.state.apply_policy(message);
                None
            }
            MessageType::ConfigChange => {
                self.state.apply_config(message);
                None
            }
            MessageType::StatusUpdate => {
                self.state.record_status(message);
                None
            }
            MessageType::Alert | MessageType::CriticalAlert => {
                self.state.record_alert(message);
                self.policy.is_critical(message).then(|| self.ack(message))
            }
            MessageType::PerformanceIssue => {
                self.state.record_alert(message);
                Some(self.ack(message))
            }
            MessageType::ActionRequest => {
                self.state.record_action(message);
                Some(
                    message
                        .reply(MessageType::ActionResponse, &self.identity)
                        .subject(format!("response to {}", message.subject()))
                        .payload(MessagePayload::ActionResponse {
                            original_message_id: Some(message.id().to_string()),
                            status: Some("COMPLETED".to_string()),
                        })
                        .build(),
                )
            }
            _ => None,
        }
    }
}

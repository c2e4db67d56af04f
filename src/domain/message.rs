// Dashboard message envelope
use super::level::{DashboardLevel, NodeAddress};
use super::payload::MessagePayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Well-known metadata keys carried by the envelope.
pub mod keys {
    pub const DATA_TYPE: &str = "dataType";
    pub const REQUEST_ID: &str = "requestId";
    pub const SEVERITY: &str = "severity";
    pub const IMPACT: &str = "impact";
    pub const REQUIRES_GLOBAL_HANDLING: &str = "requiresGlobalHandling";
    pub const APPLY_TO_BRANCHES: &str = "applyToBranches";
    pub const POLICY_KEY: &str = "policyKey";
    pub const CONFIG_KEY: &str = "configKey";
    pub const ACTION: &str = "action";
    pub const STATUS: &str = "status";
    pub const FILTER_PREFIX: &str = "filter.";

    pub const ORIGINAL_MESSAGE_ID: &str = "originalMessageId";
    pub const ORIGINAL_SOURCE_LEVEL: &str = "originalSourceLevel";
    pub const ORIGINAL_SOURCE_ID: &str = "originalSourceId";
    pub const FORWARDED_BY: &str = "forwardedBy";
    pub const FORWARDED_TIMESTAMP: &str = "forwardedTimestamp";
    pub const FORWARDING_PATH: &str = "forwardingPath";

    pub const AGGREGATED_FROM: &str = "aggregatedFrom";
    pub const CONTRIBUTORS: &str = "contributors";
    pub const TIMESTAMP: &str = "timestamp";
    pub const TRANSFER_ID: &str = "transferId";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    PolicyUpdate,
    ConfigChange,
    StatusUpdate,
    Alert,
    CriticalAlert,
    MetricReport,
    PerformanceIssue,
    ActionRequest,
    ActionResponse,
    DataRequest,
    SyncRequest,
    MessageAck,
}

impl MessageType {
    /// Replies that answer an earlier message through `originalMessageId`.
    pub fn is_acknowledgement(&self) -> bool {
        matches!(self, MessageType::MessageAck | MessageType::ActionResponse)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::PolicyUpdate => "POLICY_UPDATE",
            MessageType::ConfigChange => "CONFIG_CHANGE",
            MessageType::StatusUpdate => "STATUS_UPDATE",
            MessageType::Alert => "ALERT",
            MessageType::CriticalAlert => "CRITICAL_ALERT",
            MessageType::MetricReport => "METRIC_REPORT",
            MessageType::PerformanceIssue => "PERFORMANCE_ISSUE",
            MessageType::ActionRequest => "ACTION_REQUEST",
            MessageType::ActionResponse => "ACTION_RESPONSE",
            MessageType::DataRequest => "DATA_REQUEST",
            MessageType::SyncRequest => "SYNC_REQUEST",
            MessageType::MessageAck => "MESSAGE_ACK",
        };
        f.write_str(name)
    }
}

/// Point-to-point or broadcast envelope exchanged between tiers.
///
/// Messages are immutable once built. A `None` target id means the message is
/// addressed to every reachable node at `target_level`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMessage {
    id: String,
    source_level: DashboardLevel,
    source_id: String,
    target_level: DashboardLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_id: Option<String>,
    message_type: MessageType,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    timestamp: DateTime<Utc>,
}

impl DashboardMessage {
    pub fn builder(
        message_type: MessageType,
        source: &NodeAddress,
        target_level: DashboardLevel,
    ) -> MessageBuilder {
        MessageBuilder {
            message_type,
            source: source.clone(),
            target_level,
            target_id: None,
            subject: String::new(),
            content: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Start a reply addressed back to this message's sender, correlated
    /// through `originalMessageId`.
    pub fn reply(&self, message_type: MessageType, responder: &NodeAddress) -> MessageBuilder {
        DashboardMessage::builder(message_type, responder, self.source_level)
            .target_id(self.source_id.clone())
            .meta(keys::ORIGINAL_MESSAGE_ID, self.id.clone())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> NodeAddress {
        NodeAddress::new(self.source_level, self.source_id.clone())
    }

    pub fn source_level(&self) -> DashboardLevel {
        self.source_level
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn target_level(&self) -> DashboardLevel {
        self.target_level
    }

    pub fn target_id(&self) -> Option<&str> {
        self.target_id.as_deref()
    }

    pub fn is_broadcast(&self) -> bool {
        self.target_id.is_none()
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Typed view over the metadata for this message's type.
    pub fn payload(&self) -> MessagePayload {
        MessagePayload::decode(self.message_type, &self.metadata)
    }
}

pub struct MessageBuilder {
    message_type: MessageType,
    source: NodeAddress,
    target_level: DashboardLevel,
    target_id: Option<String>,
    subject: String,
    content: String,
    metadata: BTreeMap<String, String>,
}

impl MessageBuilder {
    pub fn target_id(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn maybe_target_id(mut self, target_id: Option<String>) -> Self {
        self.target_id = target_id;
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn payload(mut self, payload: MessagePayload) -> Self {
        self.metadata.extend(payload.into_metadata());
        self
    }

    pub fn build(self) -> DashboardMessage {
        DashboardMessage {
            id: Uuid::new_v4().to_string(),
            source_level: self.source.level,
            source_id: self.source.id,
            target_level: self.target_level,
            target_id: self.target_id,
            message_type: self.message_type,
            subject: self.subject,
            content: self.content,
            metadata: self.metadata,
            timestamp: Utc::now(),
        }
    }
}

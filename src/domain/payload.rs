// Typed payload views over envelope metadata
use super::message::{keys, MessageType};
use super::transfer::DataType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Major,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Major => "major",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "info" | "minor" => Ok(Severity::Low),
            "medium" | "moderate" | "warning" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "major" | "severe" => Ok(Severity::Major),
            "critical" | "emergency" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Typed view of the fields each message type actually uses.
///
/// Handlers match on this instead of reading metadata strings; the flat map
/// only exists on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    PolicyUpdate {
        policy_key: Option<String>,
    },
    ConfigChange {
        config_key: Option<String>,
        apply_to_branches: bool,
    },
    StatusUpdate {
        severity: Option<Severity>,
        requires_global: bool,
    },
    /// Shared by ALERT and CRITICAL_ALERT.
    Alert {
        severity: Option<Severity>,
        requires_global: bool,
    },
    MetricReport {
        data_type: Option<DataType>,
        request_id: Option<String>,
    },
    PerformanceIssue {
        impact: Option<Severity>,
        requires_global: bool,
    },
    ActionRequest {
        action: Option<String>,
        requires_global: bool,
    },
    ActionResponse {
        original_message_id: Option<String>,
        status: Option<String>,
    },
    DataRequest {
        data_type: Option<DataType>,
        request_id: Option<String>,
        filter: BTreeMap<String, String>,
    },
    SyncRequest,
    Acknowledgement {
        original_message_id: Option<String>,
    },
}

fn flag(metadata: &BTreeMap<String, String>, key: &str) -> bool {
    metadata
        .get(key)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn parsed<T: FromStr>(metadata: &BTreeMap<String, String>, key: &str) -> Option<T> {
    metadata.get(key).and_then(|v| v.parse().ok())
}

impl MessagePayload {
    pub fn decode(message_type: MessageType, metadata: &BTreeMap<String, String>) -> Self {
        let text = |key: &str| metadata.get(key).cloned();
        match message_type {
            MessageType::PolicyUpdate => MessagePayload::PolicyUpdate {
                policy_key: text(keys::POLICY_KEY),
            },
            MessageType::ConfigChange => MessagePayload::ConfigChange {
                config_key: text(keys::CONFIG_KEY),
                apply_to_branches: flag(metadata, keys::APPLY_TO_BRANCHES),
            },
            MessageType::StatusUpdate => MessagePayload::StatusUpdate {
                severity: parsed(metadata, keys::SEVERITY),
                requires_global: flag(metadata, keys::REQUIRES_GLOBAL_HANDLING),
            },
            MessageType::Alert | MessageType::CriticalAlert => MessagePayload::Alert {
                severity: parsed(metadata, keys::SEVERITY),
                requires_global: flag(metadata, keys::REQUIRES_GLOBAL_HANDLING),
            },
            MessageType::MetricReport => MessagePayload::MetricReport {
                data_type: parsed(metadata, keys::DATA_TYPE),
                request_id: text(keys::REQUEST_ID),
            },
            MessageType::PerformanceIssue => MessagePayload::PerformanceIssue {
                impact: parsed(metadata, keys::IMPACT),
                requires_global: flag(metadata, keys::REQUIRES_GLOBAL_HANDLING),
            },
            MessageType::ActionRequest => MessagePayload::ActionRequest {
                action: text(keys::ACTION),
                requires_global: flag(metadata, keys::REQUIRES_GLOBAL_HANDLING),
            },
            MessageType::ActionResponse => MessagePayload::ActionResponse {
                original_message_id: text(keys::ORIGINAL_MESSAGE_ID),
                status: text(keys::STATUS),
            },
            MessageType::DataRequest => MessagePayload::DataRequest {
                data_type: parsed(metadata, keys::DATA_TYPE),
                request_id: text(keys::REQUEST_ID),
                filter: metadata
                    .iter()
                    .filter_map(|(k, v)| {
                        k.strip_prefix(keys::FILTER_PREFIX)
                            .map(|name| (name.to_string(), v.clone()))
                    })
                    .collect(),
            },
            MessageType::SyncRequest => MessagePayload::SyncRequest,
            MessageType::MessageAck => MessagePayload::Acknowledgement {
                original_message_id: text(keys::ORIGINAL_MESSAGE_ID),
            },
        }
    }

    /// Flatten back into envelope metadata. Absent optionals and false flags
    /// are omitted.
    pub fn into_metadata(self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                out.insert(key.to_string(), value);
            }
        };
        let set = |b: bool| b.then(|| "true".to_string());

        match self {
            MessagePayload::PolicyUpdate { policy_key } => put(keys::POLICY_KEY, policy_key),
            MessagePayload::ConfigChange {
                config_key,
                apply_to_branches,
            } => {
                put(keys::CONFIG_KEY, config_key);
                put(keys::APPLY_TO_BRANCHES, set(apply_to_branches));
            }
            MessagePayload::StatusUpdate {
                severity,
                requires_global,
            }
            | MessagePayload::Alert {
                severity,
                requires_global,
            } => {
                put(keys::SEVERITY, severity.map(|s| s.to_string()));
                put(keys::REQUIRES_GLOBAL_HANDLING, set(requires_global));
            }
            MessagePayload::MetricReport {
                data_type,
                request_id,
            } => {
                put(keys::DATA_TYPE, data_type.map(|t| t.to_string()));
                put(keys::REQUEST_ID, request_id);
            }
            MessagePayload::PerformanceIssue {
                impact,
                requires_global,
            } => {
                put(keys::IMPACT, impact.map(|s| s.to_string()));
                put(keys::REQUIRES_GLOBAL_HANDLING, set(requires_global));
            }
            MessagePayload::ActionRequest {
                action,
                requires_global,
            } => {
                put(keys::ACTION, action);
                put(keys::REQUIRES_GLOBAL_HANDLING, set(requires_global));
            }
            MessagePayload::ActionResponse {
                original_message_id,
                status,
            } => {
                put(keys::ORIGINAL_MESSAGE_ID, original_message_id);
                put(keys::STATUS, status);
            }
            MessagePayload::DataRequest {
                data_type,
                request_id,
                filter,
            } => {
                put(keys::DATA_TYPE, data_type.map(|t| t.to_string()));
                put(keys::REQUEST_ID, request_id);
                for (name, value) in filter {
                    put(&format!("{}{}", keys::FILTER_PREFIX, name), Some(value));
                }
            }
            MessagePayload::SyncRequest => {}
            MessagePayload::Acknowledgement {
                original_message_id,
            } => put(keys::ORIGINAL_MESSAGE_ID, original_message_id),
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_aliases() {
        assert_eq!("EMERGENCY".parse::<Severity>(), Ok(Severity::Critical));
        assert_eq!("severe".parse::<Severity>(), Ok(Severity::Major));
        assert!(Severity::Critical > Severity::High);
    }

    #[test]
    fn test_decode_alert_metadata() {
        let mut metadata = BTreeMap::new();
        metadata.insert("severity".to_string(), "Critical".to_string());
        metadata.insert("requiresGlobalHandling".to_string(), "TRUE".to_string());

        let payload = MessagePayload::decode(MessageType::CriticalAlert, &metadata);
        assert_eq!(
            payload,
            MessagePayload::Alert {
                severity: Some(Severity::Critical),
                requires_global: true
            }
        );
    }

    #[test]
    fn test_unknown_severity_is_absent_not_error() {
        let mut metadata = BTreeMap::new();
        metadata.insert("impact".to_string(), "catastrophic-ish".to_string());
        let payload = MessagePayload::decode(MessageType::PerformanceIssue, &metadata);
        assert_eq!(
            payload,
            MessagePayload::PerformanceIssue {
                impact: None,
                requires_global: false
            }
        );
    }

    #[test]
    fn test_data_request_filter_uses_prefix() {
        let mut filter = BTreeMap::new();
        filter.insert("depot".to_string(), "north".to_string());
        let metadata = MessagePayload::DataRequest {
            data_type: Some(DataType::DriverPerformance),
            request_id: Some("req-1".into()),
            filter,
        }
        .into_metadata();

        assert_eq!(metadata.get("filter.depot").unwrap(), "north");
        assert_eq!(metadata.get("dataType").unwrap(), "DRIVER_PERFORMANCE");

        match MessagePayload::decode(MessageType::DataRequest, &metadata) {
            MessagePayload::DataRequest { filter, request_id, .. } => {
                assert_eq!(filter.get("depot").unwrap(), "north");
                assert_eq!(request_id.as_deref(), Some("req-1"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }
}

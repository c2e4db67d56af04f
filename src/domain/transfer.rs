// Aggregated data transfer model
use super::level::{DashboardLevel, NodeAddress};
use super::message::{keys, DashboardMessage, MessageType};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    SystemHealth,
    DeliveryMetrics,
    DriverPerformance,
    FinancialMetrics,
    OperationalMetrics,
    CustomerSatisfaction,
}

impl DataType {
    pub const ALL: [DataType; 6] = [
        DataType::SystemHealth,
        DataType::DeliveryMetrics,
        DataType::DriverPerformance,
        DataType::FinancialMetrics,
        DataType::OperationalMetrics,
        DataType::CustomerSatisfaction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::SystemHealth => "SYSTEM_HEALTH",
            DataType::DeliveryMetrics => "DELIVERY_METRICS",
            DataType::DriverPerformance => "DRIVER_PERFORMANCE",
            DataType::FinancialMetrics => "FINANCIAL_METRICS",
            DataType::OperationalMetrics => "OPERATIONAL_METRICS",
            DataType::CustomerSatisfaction => "CUSTOMER_SATISFACTION",
        }
    }

    /// Message type used when this data travels upward on its own.
    pub fn report_message_type(&self) -> MessageType {
        match self {
            DataType::SystemHealth => MessageType::StatusUpdate,
            _ => MessageType::MetricReport,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        DataType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("unknown data type: {}", s))
    }
}

/// Aggregated payload for one data type.
///
/// The shape of `data` is specific to the data type and opaque to the
/// communication layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardDataTransfer {
    id: String,
    data_type: DataType,
    data: Map<String, Value>,
    metadata: BTreeMap<String, String>,
}

impl DashboardDataTransfer {
    pub fn new(
        data_type: DataType,
        data: Map<String, Value>,
        mut metadata: BTreeMap<String, String>,
    ) -> Self {
        metadata
            .entry(keys::DATA_TYPE.to_string())
            .or_insert_with(|| data_type.as_str().to_string());
        metadata
            .entry(keys::TIMESTAMP.to_string())
            .or_insert_with(|| Utc::now().to_rfc3339());
        Self {
            id: Uuid::new_v4().to_string(),
            data_type,
            data,
            metadata,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Number of contributing nodes, when recorded.
    pub fn aggregated_from(&self) -> Option<usize> {
        self.metadata
            .get(keys::AGGREGATED_FROM)
            .and_then(|v| v.parse().ok())
    }

    /// Wrap this transfer in an envelope for the tier above (or below).
    pub fn to_message(
        &self,
        source: &NodeAddress,
        target_level: DashboardLevel,
        target_id: Option<String>,
    ) -> DashboardMessage {
        DashboardMessage::builder(self.data_type.report_message_type(), source, target_level)
            .maybe_target_id(target_id)
            .subject(format!("{} aggregate from {}", self.data_type, source))
            .content(Value::Object(self.data.clone()).to_string())
            .metadata(self.metadata.clone())
            .meta(keys::DATA_TYPE, self.data_type.as_str())
            .meta(keys::TRANSFER_ID, self.id.clone())
            .build()
    }

    /// Recover a transfer from a report envelope. Returns `None` when the
    /// message carries no data type or its content is not a JSON object.
    pub fn from_message(message: &DashboardMessage) -> Option<Self> {
        let data_type = message.meta(keys::DATA_TYPE)?.parse::<DataType>().ok()?;
        let data = match serde_json::from_str::<Value>(message.content()).ok()? {
            Value::Object(map) => map,
            _ => return None,
        };
        Some(Self::new(data_type, data, message.metadata().clone()))
    }
}

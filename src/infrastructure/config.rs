use crate::domain::level::DashboardLevel;
use crate::domain::payload::Severity;
use crate::domain::transfer::DataType;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct NodeConfig {
    pub node: NodeSettings,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    #[serde(default)]
    pub aggregation: Vec<AggregationConfig>,
    #[serde(default)]
    pub forwarding: Vec<ForwardingConfig>,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

impl NodeConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NodeSettings {
    pub id: String,
    pub level: DashboardLevel,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PeerConfig {
    pub id: String,
    pub level: DashboardLevel,
    pub url: String,
}

/// Pull schedule: ask `source_level` for `data_type` every `interval_ms`.
#[derive(Debug, Deserialize, Clone)]
pub struct AggregationConfig {
    pub data_type: DataType,
    pub source_level: DashboardLevel,
    pub interval_ms: Option<u64>,
}

impl AggregationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.unwrap_or_else(|| default_interval_ms(self.data_type)))
    }
}

/// Push schedule: forward the stored aggregate for `data_type` upward.
#[derive(Debug, Deserialize, Clone)]
pub struct ForwardingConfig {
    pub data_type: DataType,
    pub target_level: DashboardLevel,
    pub target_id: Option<String>,
    pub interval_ms: Option<u64>,
}

impl ForwardingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.unwrap_or_else(|| default_interval_ms(self.data_type)))
    }
}

/// DATA_REQUEST intervals used by the branch data collector.
#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_collector_intervals")]
    pub intervals: Vec<CollectorInterval>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            intervals: default_collector_intervals(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectorInterval {
    pub data_type: DataType,
    pub interval_ms: u64,
}

/// Thresholds behind the escalation predicates. Defaults only escalate on
/// strong signals.
#[derive(Debug, Deserialize, Clone)]
pub struct EscalationConfig {
    #[serde(default = "default_global_keywords")]
    pub global_keywords: Vec<String>,
    #[serde(default = "default_branch_keywords")]
    pub branch_keywords: Vec<String>,
    #[serde(default = "default_threshold")]
    pub status_min_severity: Severity,
    #[serde(default = "default_threshold")]
    pub alert_min_severity: Severity,
    #[serde(default = "default_threshold")]
    pub performance_min_impact: Severity,
    #[serde(default = "default_global_only_actions")]
    pub global_only_actions: Vec<String>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            global_keywords: default_global_keywords(),
            branch_keywords: default_branch_keywords(),
            status_min_severity: default_threshold(),
            alert_min_severity: default_threshold(),
            performance_min_impact: default_threshold(),
            global_only_actions: default_global_only_actions(),
        }
    }
}

/// Default polling cadence per data type.
pub fn default_interval_ms(data_type: DataType) -> u64 {
    match data_type {
        DataType::SystemHealth => 60_000,
        DataType::DeliveryMetrics => 180_000,
        DataType::DriverPerformance => 300_000,
        DataType::OperationalMetrics => 300_000,
        DataType::CustomerSatisfaction => 900_000,
        DataType::FinancialMetrics => 1_800_000,
    }
}

fn default_collector_intervals() -> Vec<CollectorInterval> {
    DataType::ALL
        .into_iter()
        .map(|data_type| CollectorInterval {
            data_type,
            interval_ms: match data_type {
                DataType::SystemHealth => 120_000,
                DataType::FinancialMetrics => 900_000,
                other => default_interval_ms(other),
            },
        })
        .collect()
}

fn default_global_keywords() -> Vec<String> {
    ["critical", "major", "outage", "emergency"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_branch_keywords() -> Vec<String> {
    ["all branches", "branch-wide", "mandatory"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_global_only_actions() -> Vec<String> {
    ["budget_approval", "policy_exception", "cross_region_transfer"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_threshold() -> Severity {
    Severity::Major
}

fn default_true() -> bool {
    true
}

fn default_ack_timeout_ms() -> u64 {
    30_000
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

pub fn load_node_config() -> anyhow::Result<NodeConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/node").required(false))
        .add_source(config::Environment::with_prefix("DASHBOARD").separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}

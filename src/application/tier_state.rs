// Tier state - Where inbound policy, config, status and alerts are applied locally
use crate::domain::message::DashboardMessage;
use crate::domain::payload::MessagePayload;
use crate::domain::provenance;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

const RECENT_ALERTS: usize = 100;

#[derive(Debug, Default)]
struct Inner {
    policies: BTreeMap<String, DashboardMessage>,
    configs: BTreeMap<String, DashboardMessage>,
    statuses: BTreeMap<String, DashboardMessage>,
    metric_reports: BTreeMap<String, DashboardMessage>,
    alerts: VecDeque<DashboardMessage>,
    actions_handled: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSnapshot {
    pub policies: BTreeMap<String, DashboardMessage>,
    pub configs: BTreeMap<String, DashboardMessage>,
    pub statuses: BTreeMap<String, DashboardMessage>,
    pub metric_reports: BTreeMap<String, DashboardMessage>,
    pub recent_alerts: Vec<DashboardMessage>,
    pub actions_handled: u64,
}

#[derive(Debug, Default)]
pub struct TierState {
    inner: RwLock<Inner>,
}

impl TierState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_policy(&self, message: &DashboardMessage) {
        let key = match message.payload() {
            MessagePayload::PolicyUpdate { policy_key: Some(key) } => key,
            _ => fallback_key(message),
        };
        tracing::info!("Applied policy '{}' from {}", key, message.source());
        self.inner.write().policies.insert(key, message.clone());
    }

    pub fn apply_config(&self, message: &DashboardMessage) {
        let key = match message.payload() {
            MessagePayload::ConfigChange { config_key: Some(key), .. } => key,
            _ => fallback_key(message),
        };
        tracing::info!("Applied config '{}' from {}", key, message.source());
        self.inner.write().configs.insert(key, message.clone());
    }

    /// Latest status per originating node.
    pub fn record_status(&self, message: &DashboardMessage) {
        let origin = provenance::origin(message);
        self.inner.write().statuses.insert(origin.id, message.clone());
    }

    pub fn record_metric_report(&self, message: &DashboardMessage) {
        self.inner
            .write()
            .metric_reports
            .insert(message.source_id().to_string(), message.clone());
    }

    /// Alerts and performance issues, newest last, bounded.
    pub fn record_alert(&self, message: &DashboardMessage) {
        let mut inner = self.inner.write();
        if inner.alerts.len() == RECENT_ALERTS {
            inner.alerts.pop_front();
        }
        inner.alerts.push_back(message.clone());
    }

    pub fn record_action(&self, message: &DashboardMessage) {
        tracing::info!("Handled action request {} from {}", message.id(), message.source());
        self.inner.write().actions_handled += 1;
    }

    pub fn policy(&self, key: &str) -> Option<DashboardMessage> {
        self.inner.read().policies.get(key).cloned()
    }

    pub fn status_of(&self, node_id: &str) -> Option<DashboardMessage> {
        self.inner.read().statuses.get(node_id).cloned()
    }

    pub fn alert_count(&self) -> usize {
        self.inner.read().alerts.len()
    }

    pub fn snapshot(&self) -> TierSnapshot {
        let inner = self.inner.read();
        TierSnapshot {
            policies: inner.policies.clone(),
            configs: inner.configs.clone(),
            statuses: inner.statuses.clone(),
            metric_reports: inner.metric_reports.clone(),
            recent_alerts: inner.alerts.iter().cloned().collect(),
            actions_handled: inner.actions_handled,
        }
    }
}

fn fallback_key(message: &DashboardMessage) -> String {
    if message.subject().is_empty() {
        message.id().to_string()
    } else {
        message.subject().to_string()
    }
}

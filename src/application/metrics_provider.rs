// Metrics data provider - Serves this node's business metrics to aggregation requests
use crate::application::data_provider::DashboardDataProvider;
use crate::domain::transfer::DataType;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Where a node's current business metrics live.
#[async_trait]
pub trait MetricsRepository: Send + Sync {
    async fn system_health(&self) -> anyhow::Result<Option<Map<String, Value>>>;

    async fn delivery_metrics(&self) -> anyhow::Result<Option<Map<String, Value>>>;

    async fn driver_performance(&self) -> anyhow::Result<Option<Map<String, Value>>>;

    async fn customer_satisfaction(&self) -> anyhow::Result<Option<Map<String, Value>>>;

    async fn financial_metrics(&self) -> anyhow::Result<Option<Map<String, Value>>>;

    async fn operational_metrics(&self) -> anyhow::Result<Option<Map<String, Value>>>;
}

#[derive(Clone)]
pub struct MetricsDataProvider {
    repository: Arc<dyn MetricsRepository>,
}

impl MetricsDataProvider {
    pub fn new(repository: Arc<dyn MetricsRepository>) -> Self {
        Self { repository }
    }

    async fn load(&self, data_type: DataType) -> anyhow::Result<Option<Map<String, Value>>> {
        match data_type {
            DataType::SystemHealth => self.repository.system_health().await,
            DataType::DeliveryMetrics => self.repository.delivery_metrics().await,
            DataType::DriverPerformance => self.repository.driver_performance().await,
            DataType::CustomerSatisfaction => self.repository.customer_satisfaction().await,
            DataType::FinancialMetrics => self.repository.financial_metrics().await,
            DataType::OperationalMetrics => self.repository.operational_metrics().await,
        }
    }
}

/// A filter entry rules the node out only when the same top-level field
/// holds a different string. Fields the data does not carry are ignored.
fn matches_filter(data: &Map<String, Value>, filter: &BTreeMap<String, String>) -> bool {
    filter.iter().all(|(key, wanted)| match data.get(key) {
        Some(Value::String(actual)) => actual == wanted,
        _ => true,
    })
}

#[async_trait]
impl DashboardDataProvider for MetricsDataProvider {
    async fn provide(&self, data_type: DataType, filter: &BTreeMap<String, String>) -> Option<Map<String, Value>> {
        let data = match self.load(data_type).await {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Failed to load {} metrics: {}", data_type, e);
                return None;
            }
        };

        if !matches_filter(&data, filter) {
            tracing::debug!("{} metrics excluded by filter {:?}", data_type, filter);
            return None;
        }
        Some(data)
    }
}

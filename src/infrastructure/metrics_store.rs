// In-memory metrics repository fed by this node's business services
use crate::application::metrics_provider::MetricsRepository;
use crate::domain::transfer::DataType;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct LocalMetricsStore {
    metrics: RwLock<HashMap<DataType, Map<String, Value>>>,
}

impl LocalMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything held for `data_type`.
    pub fn replace(&self, data_type: DataType, data: Map<String, Value>) {
        tracing::debug!("Local {} metrics replaced ({} fields)", data_type, data.len());
        self.metrics.write().insert(data_type, data);
    }

    pub fn get(&self, data_type: DataType) -> Option<Map<String, Value>> {
        self.metrics.read().get(&data_type).cloned()
    }
}

#[async_trait]
impl MetricsRepository for LocalMetricsStore {
    async fn system_health(&self) -> anyhow::Result<Option<Map<String, Value>>> {
        Ok(self.get(DataType::SystemHealth))
    }

    async fn delivery_metrics(&self) -> anyhow::Result<Option<Map<String, Value>>> {
        Ok(self.get(DataType::DeliveryMetrics))
    }

    async fn driver_performance(&self) -> anyhow::Result<Option<Map<String, Value>>> {
        Ok(self.get(DataType::DriverPerformance))
    }

    async fn customer_satisfaction(&self) -> anyhow::Result<Option<Map<String, Value>>> {
        Ok(self.get(DataType::CustomerSatisfaction))
    }

    async fn financial_metrics(&self) -> anyhow::Result<Option<Map<String, Value>>> {
        Ok(self.get(DataType::FinancialMetrics))
    }

    async fn operational_metrics(&self) -> anyhow::Result<Option<Map<String, Value>>> {
        Ok(self.get(DataType::OperationalMetrics))
    }
}

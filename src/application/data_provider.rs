// Data provider contract consumed by the aggregation service
use crate::domain::transfer::DataType;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[async_trait]
pub trait DashboardDataProvider: Send + Sync {
    /// Current data for `data_type`, narrowed by `filter`.
    ///
    /// Returns `None` for unsupported types or when nothing is available; the
    /// caller treats that as a node that contributed nothing.
    async fn provide(&self, data_type: DataType, filter: &BTreeMap<String, String>) -> Option<Map<String, Value>>;
}

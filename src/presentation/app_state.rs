// Application state for HTTP handlers
use crate::application::aggregation_service::DataAggregationService;
use crate::application::branch_collector::BranchDataCollector;
use crate::application::communication_service::CommunicationService;
use crate::application::tier_state::TierState;
use crate::infrastructure::metrics_store::LocalMetricsStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub communication: Arc<CommunicationService>,
    pub aggregation: Arc<DataAggregationService>,
    pub tier_state: Arc<TierState>,
    pub metrics: Arc<LocalMetricsStore>,
    /// Only REGIONAL nodes drive branch collection.
    pub collector: Option<Arc<BranchDataCollector>>,
}

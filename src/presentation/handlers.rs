// HTTP request handlers
use crate::application::aggregation_service::AggregationSchedule;
use crate::application::communication_service::BroadcastResult;
use crate::application::error::DashboardError;
use crate::application::tier_state::TierSnapshot;
use crate::domain::message::DashboardMessage;
use crate::domain::transfer::{DashboardDataTransfer, DataType};
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Inbound end of the HTTP transport. Accepting a message only means it was
/// parsed; handlers run on their own task so slow downstream hops never hold
/// up the sender.
pub async fn receive_message(
    State(state): State<Arc<AppState>>,
    Json(message): Json<DashboardMessage>,
) -> StatusCode {
    tracing::debug!(
        "{} received {} {} from {}",
        state.communication.current_id(),
        message.message_type(),
        message.id(),
        message.source()
    );
    let communication = state.communication.clone();
    tokio::spawn(async move {
        communication.receive(message).await;
    });
    StatusCode::ACCEPTED
}

fn parse_data_type(raw: &str) -> Result<DataType, StatusCode> {
    raw.parse::<DataType>().map_err(|_| StatusCode::BAD_REQUEST)
}

/// Latest stored aggregate for a data type
pub async fn latest_aggregate(
    Path(data_type): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<DashboardDataTransfer>, StatusCode> {
    let data_type = parse_data_type(&data_type)?;
    state
        .aggregation
        .latest_aggregate(data_type)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn list_schedules(State(state): State<Arc<AppState>>) -> Json<Vec<AggregationSchedule>> {
    Json(state.aggregation.schedules())
}

pub async fn tier_snapshot(State(state): State<Arc<AppState>>) -> Json<TierSnapshot> {
    Json(state.tier_state.snapshot())
}

/// Ask every branch to resend all its data
pub async fn force_sync(State(state): State<Arc<AppState>>) -> Result<Json<BroadcastResult>, StatusCode> {
    let collector = state.collector.as_ref().ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(collector.force_sync_all_branch_data().await))
}

pub async fn branch_status(
    Path(branch_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> StatusCode {
    let Some(collector) = state.collector.as_ref() else {
        return StatusCode::NOT_FOUND;
    };
    match collector.check_branch_status(&branch_id).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(DashboardError::UnknownTarget(_)) => StatusCode::NOT_FOUND,
        Err(e) => {
            tracing::warn!("Status check for branch {} failed: {}", branch_id, e);
            StatusCode::BAD_GATEWAY
        }
    }
}

/// Replace this node's local metrics for a data type
pub async fn put_metrics(
    Path(data_type): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(data): Json<Map<String, Value>>,
) -> StatusCode {
    match parse_data_type(&data_type) {
        Ok(data_type) => {
            state.metrics.replace(data_type, data);
            StatusCode::NO_CONTENT
        }
        Err(status) => status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::aggregation_service::DataAggregationService;
    use crate::application::branch_collector::BranchDataCollector;
    use crate::application::communication_service::tests::RecordingTransport;
    use crate::application::communication_service::CommunicationService;
    use crate::application::metrics_provider::MetricsDataProvider;
    use crate::application::tier_state::TierState;
    use crate::domain::level::{DashboardLevel, NodeAddress};
    use crate::domain::message::MessageType;
    use crate::infrastructure::metrics_store::LocalMetricsStore;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn state(regional: bool) -> (Arc<RecordingTransport>, Arc<AppState>) {
        let transport = Arc::new(RecordingTransport::with_nodes(vec![
            NodeAddress::new(DashboardLevel::Branch, "b1"),
            NodeAddress::new(DashboardLevel::Regional, "emea"),
        ]));
        let level = if regional { DashboardLevel::Regional } else { DashboardLevel::Branch };
        let communication = Arc::new(CommunicationService::new(NodeAddress::new(level, "n1"), transport.clone()));
        let aggregation = Arc::new(DataAggregationService::new(communication.clone()));
        let metrics = Arc::new(LocalMetricsStore::new());
        aggregation.register_data_provider(DataType::SystemHealth, Arc::new(MetricsDataProvider::new(metrics.clone())));
        let collector =
            regional.then(|| Arc::new(BranchDataCollector::new(communication.clone(), aggregation.scheduler())));
        (
            transport,
            Arc::new(AppState {
                communication,
                aggregation,
                tier_state: Arc::new(TierState::new()),
                metrics,
                collector,
            }),
        )
    }

    #[tokio::test]
    async fn test_missing_aggregate_is_404_and_bad_type_is_400() {
        let (_, state) = state(true);
        let missing = latest_aggregate(Path("delivery-metrics".to_string()), State(state.clone())).await;
        assert_eq!(missing.unwrap_err(), StatusCode::NOT_FOUND);

        let bad = latest_aggregate(Path("weather".to_string()), State(state.clone())).await;
        assert_eq!(bad.unwrap_err(), StatusCode::BAD_REQUEST);

        let mut data = Map::new();
        data.insert("deliveries".into(), json!(3));
        state.aggregation.store_aggregated_data(DataType::DeliveryMetrics, data, BTreeMap::new());
        let Json(found) = latest_aggregate(Path("DELIVERY_METRICS".to_string()), State(state)).await.unwrap();
        assert_eq!(found.data()["deliveries"], json!(3));
    }

    #[tokio::test]
    async fn test_sync_only_on_regional_nodes() {
        let (_, branch) = state(false);
        assert_eq!(force_sync(State(branch)).await.unwrap_err(), StatusCode::NOT_FOUND);

        let (transport, regional) = state(true);
        let Json(result) = force_sync(State(regional)).await.unwrap();
        assert_eq!(result.get("b1"), Some(true));
        assert_eq!(transport.sent()[0].1.message_type(), MessageType::SyncRequest);
    }

    #[tokio::test]
    async fn test_branch_status_unknown_branch() {
        let (_, regional) = state(true);
        assert_eq!(branch_status(Path("b7".to_string()), State(regional.clone())).await, StatusCode::NOT_FOUND);
        assert_eq!(branch_status(Path("b1".to_string()), State(regional)).await, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_put_metrics_then_receive_dispatches() {
        let (transport, state) = state(false);
        let mut data = Map::new();
        data.insert("uptime".into(), json!(0.97));
        let status = put_metrics(Path("SYSTEM_HEALTH".to_string()), State(state.clone()), Json(data)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.metrics.get(DataType::SystemHealth).is_some());

        let sync = DashboardMessage::builder(
            MessageType::SyncRequest,
            &NodeAddress::new(DashboardLevel::Regional, "emea"),
            DashboardLevel::Branch,
        )
        .build();
        assert_eq!(receive_message(State(state), Json(sync)).await, StatusCode::ACCEPTED);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.id, "emea");
        assert_eq!(sent[0].1.message_type(), MessageType::MetricReport);
        assert_eq!(sent[0].1.meta(crate::domain::message::keys::DATA_TYPE), Some("SYSTEM_HEALTH"));
    }
}

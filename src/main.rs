// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing_subscriber::EnvFilter;

use crate::application::aggregation_service::DataAggregationService;
use crate::application::branch_collector::BranchDataCollector;
use crate::application::communication_service::CommunicationService;
use crate::application::endpoint_handler::EndpointTierHandler;
use crate::application::escalation::EscalationPolicy;
use crate::application::metrics_provider::MetricsDataProvider;
use crate::application::regional_handler::RegionalDashboardHandler;
use crate::application::tier_state::TierState;
use crate::domain::level::{DashboardLevel, NodeAddress};
use crate::domain::transfer::{DashboardDataTransfer, DataType};
use crate::infrastructure::config::load_node_config;
use crate::infrastructure::http_transport::HttpTransport;
use crate::infrastructure::metrics_store::LocalMetricsStore;
use crate::presentation::app_state::AppState;
use crate::presentation::routes::router;

const PEER_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = load_node_config()?;
    let identity = NodeAddress::new(config.node.level, config.node.id.clone());

    // Transport and messaging (infrastructure + application layer)
    let transport = Arc::new(HttpTransport::new(&config.peers, PEER_REQUEST_TIMEOUT)?);
    let communication = Arc::new(CommunicationService::new(identity.clone(), transport));
    let aggregation = Arc::new(DataAggregationService::new(communication.clone()));

    // Local metrics answer data requests for every data type
    let metrics = Arc::new(LocalMetricsStore::new());
    let provider = Arc::new(MetricsDataProvider::new(metrics.clone()));
    for data_type in DataType::ALL {
        aggregation.register_data_provider(data_type, provider.clone());
    }

    // Tier policy
    let tier_state = Arc::new(TierState::new());
    let policy = EscalationPolicy::new(config.escalation.clone());
    let collector = match identity.level {
        DashboardLevel::Regional => {
            RegionalDashboardHandler::register(&communication, policy, tier_state.clone(), config.ack_timeout());
            let collector = Arc::new(BranchDataCollector::new(communication.clone(), aggregation.scheduler()));
            if config.collector.enabled {
                collector.start(&config.collector.intervals);
            }
            Some(collector)
        }
        _ => {
            communication.register_handler(Arc::new(EndpointTierHandler::new(
                identity.clone(),
                policy,
                tier_state.clone(),
            )));
            None
        }
    };

    // Pull from below, push to above
    for pull in &config.aggregation {
        aggregation.schedule_periodic_aggregation(
            pull.data_type,
            pull.source_level,
            pull.interval(),
            Arc::new(|transfer: &DashboardDataTransfer| {
                tracing::info!(
                    "Stored {} aggregate {} from {} contributors",
                    transfer.data_type(),
                    transfer.id(),
                    transfer.aggregated_from().unwrap_or(0)
                );
            }),
        );
    }
    for push in &config.forwarding {
        aggregation.schedule_data_transfer_task(push.data_type, push.target_level, push.target_id.clone(), push.interval());
    }

    let state = Arc::new(AppState {
        communication,
        aggregation: aggregation.clone(),
        tier_state,
        metrics,
        collector: collector.clone(),
    });

    // Build router (presentation layer)
    let app = router(state);

    // Start server
    let addr: SocketAddr = config.node.listen_addr.parse()?;
    tracing::info!("Starting {} dashboard node {} on {}", identity.level, identity.id, addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(collector) = &collector {
        collector.stop();
    }
    aggregation.shutdown();
    tracing::info!("Dashboard node {} stopped", identity);

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

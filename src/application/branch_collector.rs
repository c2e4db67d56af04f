// Branch data collector - Regional-side pull driver for branch data
use crate::application::communication_service::{BroadcastResult, CommunicationService};
use crate::application::error::DashboardError;
use crate::application::scheduler::{ScheduleId, ScheduledJob, Scheduler};
use crate::domain::level::DashboardLevel;
use crate::domain::message::{DashboardMessage, MessageType};
use crate::domain::payload::MessagePayload;
use crate::domain::transfer::DataType;
use crate::infrastructure::config::CollectorInterval;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use uuid::Uuid;

/// Issues DATA_REQUEST and SYNC_REQUEST traffic to the branch tier.
///
/// Replies are METRIC_REPORTs picked up by the aggregation service's reply
/// collector; nothing here waits for them. A broadcast where at least one
/// branch accepted the request counts as a success. Collection jobs run on
/// the node's shared scheduler.
pub struct BranchDataCollector {
    communication: Arc<CommunicationService>,
    scheduler: Arc<Scheduler>,
    running: Mutex<Vec<ScheduleId>>,
}

impl BranchDataCollector {
    pub fn new(communication: Arc<CommunicationService>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            communication,
            scheduler,
            running: Mutex::new(Vec::new()),
        }
    }

    /// Start one periodic DATA_REQUEST broadcast per configured data type.
    pub fn start(&self, intervals: &[CollectorInterval]) {
        let mut running = self.running.lock();
        for interval in intervals {
            let job = CollectJob {
                communication: Arc::downgrade(&self.communication),
                data_type: interval.data_type,
            };
            let period = Duration::from_millis(interval.interval_ms);
            running.push(self.scheduler.schedule(Arc::new(job), period));
            tracing::info!("Collecting {} from branches every {:?}", interval.data_type, period);
        }
    }

    pub fn stop(&self) {
        let ids: Vec<ScheduleId> = self.running.lock().drain(..).collect();
        for id in ids {
            self.scheduler.cancel(id);
        }
        tracing::info!("Branch data collector stopped");
    }

    pub fn active_schedules(&self) -> usize {
        self.running.lock().len()
    }

    pub async fn request_data_from_branch(
        &self,
        branch_id: &str,
        data_type: DataType,
        filter: BTreeMap<String, String>,
    ) -> Result<(), DashboardError> {
        let request = data_request(&self.communication, data_type, filter)
            .target_id(branch_id)
            .build();
        self.communication.send(&request).await
    }

    pub async fn request_data_from_all_branches(&self, data_type: DataType) -> BroadcastResult {
        let request = data_request(&self.communication, data_type, BTreeMap::new()).build();
        let result = self
            .communication
            .broadcast(&request, &[DashboardLevel::Branch], None)
            .await;
        if !result.any_succeeded() {
            tracing::warn!("No branch accepted the {} request", data_type);
        }
        result
    }

    /// Ask a single branch for its SYSTEM_HEALTH report.
    pub async fn check_branch_status(&self, branch_id: &str) -> Result<(), DashboardError> {
        tracing::debug!("Checking status of branch {}", branch_id);
        self.request_data_from_branch(branch_id, DataType::SystemHealth, BTreeMap::new())
            .await
    }

    /// Ask every branch to report everything it has. Used after a cold start
    /// or when a regional node has lost its aggregates.
    pub async fn force_sync_all_branch_data(&self) -> BroadcastResult {
        let request = DashboardMessage::builder(
            MessageType::SyncRequest,
            self.communication.identity(),
            DashboardLevel::Branch,
        )
        .subject("full sync")
        .payload(MessagePayload::SyncRequest)
        .build();

        let result = self
            .communication
            .broadcast(&request, &[DashboardLevel::Branch], None)
            .await;
        tracing::info!(
            "Forced sync reached {}/{} branches",
            result.success_count(),
            result.len()
        );
        result
    }
}

fn data_request(
    communication: &CommunicationService,
    data_type: DataType,
    filter: BTreeMap<String, String>,
) -> crate::domain::message::MessageBuilder {
    DashboardMessage::builder(MessageType::DataRequest, communication.identity(), DashboardLevel::Branch)
        .subject(format!("{} request", data_type))
        .payload(MessagePayload::DataRequest {
            data_type: Some(data_type),
            request_id: Some(Uuid::new_v4().to_string()),
            filter,
        })
}

struct CollectJob {
    communication: Weak<CommunicationService>,
    data_type: DataType,
}

#[async_trait]
impl ScheduledJob for CollectJob {
    async fn run(&self) {
        let Some(communication) = self.communication.upgrade() else {
            return;
        };
        let request = data_request(&communication, self.data_type, BTreeMap::new()).build();
        let result = communication
            .broadcast(&request, &[DashboardLevel::Branch], None)
            .await;
        if !result.is_empty() && !result.any_succeeded() {
            tracing::warn!("Scheduled {} collection reached no branch", self.data_type);
        }
    }
}

// Data aggregation service - Periodic pull from below, push to above
use crate::application::communication_service::{CommunicationService, MessageHandler};
use crate::application::data_provider::DashboardDataProvider;
use crate::application::scheduler::{ScheduleId, ScheduledJob, Scheduler};
use crate::domain::level::{DashboardLevel, NodeAddress};
use crate::domain::message::{keys, DashboardMessage, MessageType};
use crate::domain::payload::MessagePayload;
use crate::domain::transfer::{DashboardDataTransfer, DataType};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use uuid::Uuid;

/// Invoked with every freshly merged aggregate.
pub type TransferHandler = Arc<dyn Fn(&DashboardDataTransfer) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleDirection {
    Pull,
    Push,
}

/// A live periodic job. Exists from start-up until cancelled or shutdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationSchedule {
    pub id: ScheduleId,
    pub data_type: DataType,
    /// Source tier for pulls, target tier for pushes.
    pub level: DashboardLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub interval_ms: u64,
    pub direction: ScheduleDirection,
}

/// A pull window: one data type gathered from one tier.
type WindowKey = (DataType, DashboardLevel);

struct AggregationState {
    communication: Weak<CommunicationService>,
    providers: RwLock<HashMap<DataType, Arc<dyn DashboardDataProvider>>>,
    store: RwLock<HashMap<DataType, DashboardDataTransfer>>,
    /// Live pull schedules per window.
    pulls: RwLock<HashMap<WindowKey, usize>>,
    /// Replies received since the last pull tick, latest per source node.
    window: Mutex<HashMap<WindowKey, BTreeMap<String, Map<String, Value>>>>,
}

impl AggregationState {
    fn provider(&self, data_type: DataType) -> Option<Arc<dyn DashboardDataProvider>> {
        self.providers.read().get(&data_type).cloned()
    }

    fn store(&self, transfer: DashboardDataTransfer) {
        self.store.write().insert(transfer.data_type(), transfer);
    }

    fn open_window(&self, key: WindowKey) {
        *self.pulls.write().entry(key).or_insert(0) += 1;
    }

    fn close_window(&self, key: WindowKey) {
        let mut pulls = self.pulls.write();
        if let Some(count) = pulls.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                pulls.remove(&key);
                self.window.lock().remove(&key);
            }
        }
    }

    /// Buffer a reply for the pull window of its source tier. Replies from a
    /// tier nothing pulls from are dropped.
    fn collect_reply(&self, data_type: DataType, source: &NodeAddress, data: Map<String, Value>) -> bool {
        let key = (data_type, source.level);
        if !self.pulls.read().contains_key(&key) {
            return false;
        }
        self.window
            .lock()
            .entry(key)
            .or_default()
            .insert(source.id.clone(), data);
        true
    }

    /// Close the current window for `data_type` from `level`: merge what
    /// arrived, store it and return it. Empty windows keep the previous
    /// aggregate.
    fn fold_window(&self, data_type: DataType, level: DashboardLevel) -> Option<DashboardDataTransfer> {
        let replies = self.window.lock().remove(&(data_type, level)).unwrap_or_default();
        if replies.is_empty() {
            tracing::debug!("No {} replies in this window; keeping previous aggregate", data_type);
            return None;
        }
        let transfer = merge_replies(data_type, replies);
        self.store(transfer.clone());
        Some(transfer)
    }
}

/// Merge per-node payloads into one transfer: each contributor's payload under
/// `byNode`, numeric top-level fields summed under `totals`.
fn merge_replies(data_type: DataType, replies: BTreeMap<String, Map<String, Value>>) -> DashboardDataTransfer {
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for data in replies.values() {
        for (key, value) in data {
            if let Some(n) = value.as_f64() {
                *totals.entry(key.clone()).or_insert(0.0) += n;
            }
        }
    }

    let contributors: Vec<String> = replies.keys().cloned().collect();
    let mut data = Map::new();
    data.insert(
        "byNode".to_string(),
        Value::Object(replies.into_iter().map(|(k, v)| (k, Value::Object(v))).collect()),
    );
    data.insert(
        "totals".to_string(),
        Value::Object(totals.into_iter().map(|(k, v)| (k, json!(v))).collect()),
    );

    let mut metadata = BTreeMap::new();
    metadata.insert(keys::AGGREGATED_FROM.to_string(), contributors.len().to_string());
    metadata.insert(keys::CONTRIBUTORS.to_string(), contributors.join(","));
    metadata.insert(keys::TIMESTAMP.to_string(), Utc::now().to_rfc3339());

    DashboardDataTransfer::new(data_type, data, metadata)
}

pub struct DataAggregationService {
    communication: Arc<CommunicationService>,
    state: Arc<AggregationState>,
    scheduler: Arc<Scheduler>,
    schedules: RwLock<BTreeMap<ScheduleId, AggregationSchedule>>,
}

impl DataAggregationService {
    /// Registers the data-request responder and the reply collector with
    /// `communication`. Must be called from within a tokio runtime.
    pub fn new(communication: Arc<CommunicationService>) -> Self {
        let state = Arc::new(AggregationState {
            communication: Arc::downgrade(&communication),
            providers: RwLock::new(HashMap::new()),
            store: RwLock::new(HashMap::new()),
            pulls: RwLock::new(HashMap::new()),
            window: Mutex::new(HashMap::new()),
        });

        communication.register_handler(Arc::new(DataRequestResponder { state: state.clone() }));
        communication.register_handler(Arc::new(ReplyCollector { state: state.clone() }));

        Self {
            communication,
            state,
            scheduler: Arc::new(Scheduler::new()),
            schedules: RwLock::new(BTreeMap::new()),
        }
    }

    /// The node's scheduler, shared with other periodic drivers.
    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    /// Last registration for a data type wins.
    pub fn register_data_provider(&self, data_type: DataType, provider: Arc<dyn DashboardDataProvider>) {
        if self.state.providers.write().insert(data_type, provider).is_some() {
            tracing::info!("Replaced data provider for {}", data_type);
        }
    }

    /// Every `interval`, fold the replies that arrived since the previous tick
    /// into one transfer, hand it to `handler`, then ask every node at
    /// `source_level` for fresh data. Replies are never awaited; late ones
    /// land in the next window. Only replies from `source_level` count.
    pub fn schedule_periodic_aggregation(
        &self,
        data_type: DataType,
        source_level: DashboardLevel,
        interval: Duration,
        handler: TransferHandler,
    ) -> ScheduleId {
        let job = PullJob {
            state: self.state.clone(),
            data_type,
            source_level,
            handler,
        };
        self.state.open_window((data_type, source_level));
        let id = self.scheduler.schedule(Arc::new(job), interval);
        self.track(AggregationSchedule {
            id,
            data_type,
            level: source_level,
            target_id: None,
            interval_ms: interval.as_millis() as u64,
            direction: ScheduleDirection::Pull,
        });
        tracing::info!("Pulling {} from {} every {:?} (schedule {})", data_type, source_level, interval, id);
        id
    }

    /// Every `interval`, forward the latest stored aggregate for `data_type`
    /// to `target_id` at `target_level`, or to every node there when no id is
    /// given.
    pub fn schedule_data_transfer_task(
        &self,
        data_type: DataType,
        target_level: DashboardLevel,
        target_id: Option<String>,
        interval: Duration,
    ) -> ScheduleId {
        let job = PushJob {
            state: self.state.clone(),
            data_type,
            target_level,
            target_id: target_id.clone(),
        };
        let id = self.scheduler.schedule(Arc::new(job), interval);
        self.track(AggregationSchedule {
            id,
            data_type,
            level: target_level,
            target_id,
            interval_ms: interval.as_millis() as u64,
            direction: ScheduleDirection::Push,
        });
        tracing::info!("Pushing {} to {} every {:?} (schedule {})", data_type, target_level, interval, id);
        id
    }

    /// Overwrite the stored aggregate for `data_type`.
    pub fn store_aggregated_data(
        &self,
        data_type: DataType,
        data: Map<String, Value>,
        metadata: BTreeMap<String, String>,
    ) -> DashboardDataTransfer {
        let transfer = DashboardDataTransfer::new(data_type, data, metadata);
        self.state.store(transfer.clone());
        transfer
    }

    pub fn latest_aggregate(&self, data_type: DataType) -> Option<DashboardDataTransfer> {
        self.state.store.read().get(&data_type).cloned()
    }

    /// Idempotent; a tick already running is left to finish.
    pub fn cancel_periodic_aggregation(&self, id: ScheduleId) -> bool {
        if let Some(schedule) = self.schedules.write().remove(&id) {
            if schedule.direction == ScheduleDirection::Pull {
                self.state.close_window((schedule.data_type, schedule.level));
            }
        }
        let cancelled = self.scheduler.cancel(id);
        if cancelled {
            tracing::info!("Cancelled aggregation schedule {}", id);
        }
        cancelled
    }

    pub fn schedules(&self) -> Vec<AggregationSchedule> {
        self.schedules.read().values().cloned().collect()
    }

    pub fn shutdown(&self) {
        self.schedules.write().clear();
        self.state.pulls.write().clear();
        self.state.window.lock().clear();
        self.scheduler.shutdown();
        tracing::info!("Aggregation schedules on {} shut down", self.communication.identity());
    }

    fn track(&self, schedule: AggregationSchedule) {
        self.schedules.write().insert(schedule.id, schedule);
    }
}

struct PullJob {
    state: Arc<AggregationState>,
    data_type: DataType,
    source_level: DashboardLevel,
    handler: TransferHandler,
}

#[async_trait]
impl ScheduledJob for PullJob {
    async fn run(&self) {
        if let Some(transfer) = self.state.fold_window(self.data_type, self.source_level) {
            tracing::info!(
                "Aggregated {} from {} nodes",
                self.data_type,
                transfer.aggregated_from().unwrap_or(0)
            );
            (self.handler)(&transfer);
        }

        let Some(communication) = self.state.communication.upgrade() else {
            return;
        };
        let request = DashboardMessage::builder(MessageType::DataRequest, communication.identity(), self.source_level)
            .subject(format!("{} request", self.data_type))
            .payload(MessagePayload::DataRequest {
                data_type: Some(self.data_type),
                request_id: Some(Uuid::new_v4().to_string()),
                filter: BTreeMap::new(),
            })
            .build();

        let result = communication.broadcast(&request, &[self.source_level], None).await;
        if !result.is_empty() && !result.any_succeeded() {
            tracing::warn!("{} request reached none of {} {} nodes", self.data_type, result.len(), self.source_level);
        }
    }
}

struct PushJob {
    state: Arc<AggregationState>,
    data_type: DataType,
    target_level: DashboardLevel,
    target_id: Option<String>,
}

#[async_trait]
impl ScheduledJob for PushJob {
    async fn run(&self) {
        let Some(transfer) = self.state.store.read().get(&self.data_type).cloned() else {
            tracing::debug!("Nothing aggregated for {} yet; skipping push", self.data_type);
            return;
        };
        let Some(communication) = self.state.communication.upgrade() else {
            return;
        };

        let message = transfer.to_message(communication.identity(), self.target_level, self.target_id.clone());
        if message.is_broadcast() {
            communication.broadcast(&message, &[self.target_level], None).await;
        } else if communication.send(&message).await.is_ok() {
            tracing::debug!("Pushed {} aggregate {} to {}", self.data_type, transfer.id(), self.target_level);
        }
    }
}

/// Answers DATA_REQUEST and SYNC_REQUEST from the registered providers.
struct DataRequestResponder {
    state: Arc<AggregationState>,
}

impl DataRequestResponder {
    async fn report(
        &self,
        request: &DashboardMessage,
        data_type: DataType,
        request_id: Option<String>,
        filter: &BTreeMap<String, String>,
    ) -> Option<DashboardMessage> {
        let Some(provider) = self.state.provider(data_type) else {
            tracing::debug!("No provider for {}; not contributing", data_type);
            return None;
        };
        let data = provider.provide(data_type, filter).await?;
        let communication = self.state.communication.upgrade()?;

        Some(
            request
                .reply(MessageType::MetricReport, communication.identity())
                .subject(format!("{} report", data_type))
                .content(Value::Object(data).to_string())
                .payload(MessagePayload::MetricReport {
                    data_type: Some(data_type),
                    request_id: request_id.or_else(|| Some(request.id().to_string())),
                })
                .build(),
        )
    }
}

#[async_trait]
impl MessageHandler for DataRequestResponder {
    fn name(&self) -> &str {
        "data-request-responder"
    }

    fn accepts(&self, message: &DashboardMessage) -> bool {
        matches!(message.message_type(), MessageType::DataRequest | MessageType::SyncRequest)
    }

    async fn handle(&self, message: &DashboardMessage) -> Option<DashboardMessage> {
        match message.payload() {
            MessagePayload::DataRequest {
                data_type: Some(data_type),
                request_id,
                filter,
            } => self.report(message, data_type, request_id, &filter).await,
            MessagePayload::DataRequest { data_type: None, .. } => {
                tracing::warn!("DATA_REQUEST {} from {} names no data type", message.id(), message.source());
                None
            }
            MessagePayload::SyncRequest => {
                let communication = self.state.communication.upgrade()?;
                let data_types: Vec<DataType> = self.state.providers.read().keys().copied().collect();
                let mut sent = 0;
                for data_type in data_types {
                    if let Some(report) = self.report(message, data_type, None, &BTreeMap::new()).await {
                        if communication.send(&report).await.is_ok() {
                            sent += 1;
                        }
                    }
                }
                tracing::info!("Answered sync request from {} with {} reports", message.source(), sent);
                None
            }
            _ => None,
        }
    }
}

/// Buffers data reports from other nodes until the next pull tick.
struct ReplyCollector {
    state: Arc<AggregationState>,
}

#[async_trait]
impl MessageHandler for ReplyCollector {
    fn name(&self) -> &str {
        "aggregation-reply-collector"
    }

    fn accepts(&self, message: &DashboardMessage) -> bool {
        matches!(message.message_type(), MessageType::MetricReport | MessageType::StatusUpdate)
            && message.meta(keys::DATA_TYPE).is_some()
    }

    async fn handle(&self, message: &DashboardMessage) -> Option<DashboardMessage> {
        let Some(transfer) = DashboardDataTransfer::from_message(message) else {
            tracing::warn!("Discarding unreadable data report {} from {}", message.id(), message.source());
            return None;
        };
        if !self
            .state
            .collect_reply(transfer.data_type(), &message.source(), transfer.data().clone())
        {
            tracing::debug!(
                "Ignoring {} report from {}: no pull from that tier",
                transfer.data_type(),
                message.source()
            );
        }
        None
    }
}

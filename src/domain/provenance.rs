// Provenance trail and loop prevention for forwarded messages
use super::level::{DashboardLevel, NodeAddress};
use super::message::{keys, DashboardMessage, MessageBuilder, MessageType};
use chrono::Utc;

/// Node that originally emitted the message, following provenance metadata
/// when the message has already been forwarded.
pub fn origin(message: &DashboardMessage) -> NodeAddress {
    let level = message
        .meta(keys::ORIGINAL_SOURCE_LEVEL)
        .and_then(|l| l.parse::<DashboardLevel>().ok());
    match (level, message.meta(keys::ORIGINAL_SOURCE_ID)) {
        (Some(level), Some(id)) => NodeAddress::new(level, id),
        _ => message.source(),
    }
}

/// Id of the first message in the forwarding chain.
pub fn original_message_id(message: &DashboardMessage) -> &str {
    message.meta(keys::ORIGINAL_MESSAGE_ID).unwrap_or(message.id())
}

/// Every node that has held this message: origin, each forwarder, and the
/// current sender.
pub fn chain(message: &DashboardMessage) -> Vec<NodeAddress> {
    let mut nodes = vec![origin(message)];
    if let Some(path) = message.meta(keys::FORWARDING_PATH) {
        for hop in path.split(',') {
            if let Some((level, id)) = hop.split_once(':') {
                if let Ok(level) = level.parse::<DashboardLevel>() {
                    nodes.push(NodeAddress::new(level, id));
                }
            }
        }
    }
    nodes.push(message.source());
    nodes.dedup();
    nodes
}

/// Start rebuilding `original` as a new message from `by`, carrying the
/// provenance keys. An existing origin is preserved so multi-hop forwards
/// still point at the first sender. Content and metadata are copied and may
/// be overridden on the returned builder.
pub fn forward_builder(
    original: &DashboardMessage,
    by: &NodeAddress,
    message_type: MessageType,
    target_level: DashboardLevel,
) -> MessageBuilder {
    let first = origin(original);
    let mut path: Vec<String> = original
        .meta(keys::FORWARDING_PATH)
        .map(|p| p.split(',').map(str::to_string).collect())
        .unwrap_or_default();
    path.push(by.to_string());

    DashboardMessage::builder(message_type, by, target_level)
        .subject(original.subject())
        .content(original.content())
        .metadata(original.metadata().clone())
        .meta(keys::ORIGINAL_MESSAGE_ID, original_message_id(original))
        .meta(keys::ORIGINAL_SOURCE_LEVEL, first.level.as_str())
        .meta(keys::ORIGINAL_SOURCE_ID, first.id)
        .meta(keys::FORWARDED_BY, by.id.clone())
        .meta(keys::FORWARDED_TIMESTAMP, Utc::now().to_rfc3339())
        .meta(keys::FORWARDING_PATH, path.join(","))
}

pub fn forward_message(
    original: &DashboardMessage,
    by: &NodeAddress,
    message_type: MessageType,
    target_level: DashboardLevel,
    target_id: Option<String>,
) -> DashboardMessage {
    forward_builder(original, by, message_type, target_level)
        .maybe_target_id(target_id)
        .build()
}

/// True when sending `message` to `target_level`/`target_id` could deliver it
/// back to a node already in its chain. A broadcast (`None` id) loops if any
/// chain node sits at the target level.
pub fn would_loop(message: &DashboardMessage, target_level: DashboardLevel, target_id: Option<&str>) -> bool {
    chain(message).iter().any(|node| {
        node.level == target_level && target_id.is_none_or(|id| id == node.id)
    })
}

/// How a broadcast of `message` to `levels` must be constrained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastRoute {
    Open,
    /// The one chain node at the target levels must be excluded.
    Exclude(String),
    /// More than one chain node sits at the target levels.
    Suppressed,
}

pub fn broadcast_route(message: &DashboardMessage, levels: &[DashboardLevel]) -> BroadcastRoute {
    let mut hits: Vec<String> = chain(message)
        .into_iter()
        .filter(|node| levels.contains(&node.level))
        .map(|node| node.id)
        .collect();
    hits.sort();
    hits.dedup();
    match hits.len() {
        0 => BroadcastRoute::Open,
        1 => BroadcastRoute::Exclude(hits.remove(0)),
        _ => BroadcastRoute::Suppressed,
    }
}

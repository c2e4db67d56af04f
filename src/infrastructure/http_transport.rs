// HTTP transport - POSTs message envelopes to configured peers
use crate::application::error::TransportError;
use crate::application::transport::DashboardTransport;
use crate::domain::level::{DashboardLevel, NodeAddress};
use crate::domain::message::DashboardMessage;
use crate::infrastructure::config::PeerConfig;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

pub const MESSAGES_PATH: &str = "/dashboard/messages";

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            TransportError::Unreachable(
                e.url().map(|u| u.to_string()).unwrap_or_else(|| e.to_string()),
            )
        } else {
            TransportError::Http(e.to_string())
        }
    }
}

#[derive(Debug, Clone)]
struct Peer {
    level: DashboardLevel,
    base_url: String,
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    peers: BTreeMap<String, Peer>,
}

impl HttpTransport {
    pub fn new(peers: &[PeerConfig], request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        let peers = peers
            .iter()
            .map(|p| {
                (
                    p.id.clone(),
                    Peer {
                        level: p.level,
                        base_url: p.url.trim_end_matches('/').to_string(),
                    },
                )
            })
            .collect();
        Ok(Self { client, peers })
    }

    fn endpoint(&self, node_id: &str) -> Option<String> {
        self.peers
            .get(node_id)
            .map(|p| format!("{}{}", p.base_url, MESSAGES_PATH))
    }
}

#[async_trait]
impl DashboardTransport for HttpTransport {
    async fn deliver(&self, target: &NodeAddress, message: &DashboardMessage) -> Result<(), TransportError> {
        let url = self
            .endpoint(&target.id)
            .ok_or_else(|| TransportError::UnknownNode(target.id.clone()))?;

        let response = self.client.post(&url).json(message).send().await?;

        if !response.status().is_success() {
            return Err(TransportError::Rejected {
                node: target.id.clone(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    fn reachable_nodes(&self, level: DashboardLevel) -> Vec<NodeAddress> {
        self.peers
            .iter()
            .filter(|(_, peer)| peer.level == level)
            .map(|(id, peer)| NodeAddress::new(peer.level, id.clone()))
            .collect()
    }
}

// Tier hierarchy model
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A tier in the deployment hierarchy.
///
/// The ordering (GLOBAL < REGIONAL < BRANCH < LOCAL) is only used for log
/// context. Routing decisions are always explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DashboardLevel {
    Global,
    Regional,
    Branch,
    Local,
}

impl DashboardLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DashboardLevel::Global => "GLOBAL",
            DashboardLevel::Regional => "REGIONAL",
            DashboardLevel::Branch => "BRANCH",
            DashboardLevel::Local => "LOCAL",
        }
    }
}

impl fmt::Display for DashboardLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DashboardLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GLOBAL" => Ok(DashboardLevel::Global),
            "REGIONAL" => Ok(DashboardLevel::Regional),
            "BRANCH" => Ok(DashboardLevel::Branch),
            "LOCAL" => Ok(DashboardLevel::Local),
            other => Err(format!("unknown dashboard level: {}", other)),
        }
    }
}

/// A concrete node in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub level: DashboardLevel,
    pub id: String,
}

impl NodeAddress {
    pub fn new(level: DashboardLevel, id: impl Into<String>) -> Self {
        Self {
            level,
            id: id.into(),
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.level, self.id)
    }
}

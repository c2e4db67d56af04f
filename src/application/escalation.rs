// Escalation policy - Content and metadata rules deciding what crosses tiers
use crate::domain::message::{DashboardMessage, MessageType};
use crate::domain::payload::{MessagePayload, Severity};
use crate::infrastructure::config::EscalationConfig;

#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    config: EscalationConfig,
}

impl EscalationPolicy {
    pub fn new(config: EscalationConfig) -> Self {
        Self { config }
    }

    /// CRITICAL_ALERT, or an ALERT whose severity is critical.
    pub fn is_critical(&self, message: &DashboardMessage) -> bool {
        match message.message_type() {
            MessageType::CriticalAlert => true,
            MessageType::Alert => matches!(
                message.payload(),
                MessagePayload::Alert {
                    severity: Some(Severity::Critical),
                    ..
                }
            ),
            _ => false,
        }
    }

    /// Config changes go down only when flagged or phrased as branch-wide.
    pub fn is_relevant_for_branches(&self, message: &DashboardMessage) -> bool {
        match message.payload() {
            MessagePayload::ConfigChange { apply_to_branches, .. } => {
                apply_to_branches || self.mentions(message, &self.config.branch_keywords)
            }
            _ => false,
        }
    }

    pub fn is_relevant_for_global(&self, message: &DashboardMessage) -> bool {
        match message.payload() {
            MessagePayload::StatusUpdate {
                severity,
                requires_global,
            } => {
                requires_global
                    || at_least(severity, self.config.status_min_severity)
                    || self.mentions(message, &self.config.global_keywords)
            }
            _ => false,
        }
    }

    pub fn is_alert_relevant_for_global(&self, message: &DashboardMessage) -> bool {
        match message.payload() {
            MessagePayload::Alert {
                severity,
                requires_global,
            } => {
                requires_global
                    || at_least(severity, self.config.alert_min_severity)
                    || self.mentions(message, &self.config.global_keywords)
            }
            _ => false,
        }
    }

    pub fn is_performance_issue_significant(&self, message: &DashboardMessage) -> bool {
        match message.payload() {
            MessagePayload::PerformanceIssue {
                impact,
                requires_global,
            } => {
                requires_global
                    || at_least(impact, self.config.performance_min_impact)
                    || self.mentions(message, &self.config.global_keywords)
            }
            _ => false,
        }
    }

    /// Action requests this tier can answer without GLOBAL.
    pub fn is_resolvable_locally(&self, message: &DashboardMessage) -> bool {
        match message.payload() {
            MessagePayload::ActionRequest {
                action,
                requires_global,
            } => {
                !requires_global
                    && !action.is_some_and(|a| {
                        self.config
                            .global_only_actions
                            .iter()
                            .any(|g| g.eq_ignore_ascii_case(&a))
                    })
            }
            _ => false,
        }
    }

    fn mentions(&self, message: &DashboardMessage, keywords: &[String]) -> bool {
        let text = format!("{} {}", message.subject(), message.content()).to_lowercase();
        keywords.iter().any(|k| text.contains(&k.to_lowercase()))
    }
}

fn at_least(value: Option<Severity>, threshold: Severity) -> bool {
    value.is_some_and(|v| v >= threshold)
}

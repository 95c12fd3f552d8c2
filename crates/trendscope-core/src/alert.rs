use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trend::TrendId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Spike,
    Crisis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Watch,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Watch => write!(f, "watch"),
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Engine-emitted event for the notification collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub trend_id: TrendId,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub triggered_at: DateTime<Utc>,
    /// Name of the metric that crossed its threshold.
    pub trigger_metric: String,
    pub trigger_value: f64,
}

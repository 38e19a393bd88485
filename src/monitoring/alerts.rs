//! Alert System
//!
//! Alerts raised by the drift monitor, queries over them, and the optional
//! sink they are delivered to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::Result;

/// Severity level for alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    /// Informational
    Info,
    /// Warning condition
    Warning,
    /// Critical condition requiring immediate attention
    Critical,
}

/// What kind of threshold breach produced an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    FeatureDrift,
    PredictionDrift,
    PerformanceDegradation,
    HighErrorRate,
    HighLatency,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertType::FeatureDrift => "FEATURE_DRIFT",
            AlertType::PredictionDrift => "PREDICTION_DRIFT",
            AlertType::PerformanceDegradation => "PERFORMANCE_DEGRADATION",
            AlertType::HighErrorRate => "HIGH_ERROR_RATE",
            AlertType::HighLatency => "HIGH_LATENCY",
        };
        f.write_str(s)
    }
}

/// A raised alert. Only `acknowledged` changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub details: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}

impl Alert {
    pub fn new(alert_type: AlertType, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            alert_type,
            severity,
            message: message.into(),
            details: HashMap::new(),
            timestamp: Utc::now(),
            acknowledged: false,
        }
    }

    /// Attach a detail entry
    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Emit the alert on the log at a level matching its severity
    pub(crate) fn log(&self) {
        match self.severity {
            AlertSeverity::Info => info!(
                alert_id = %self.id,
                alert_type = %self.alert_type,
                "{}",
                self.message
            ),
            AlertSeverity::Warning => warn!(
                alert_id = %self.id,
                alert_type = %self.alert_type,
                "{}",
                self.message
            ),
            AlertSeverity::Critical => error!(
                alert_id = %self.id,
                alert_type = %self.alert_type,
                "{}",
                self.message
            ),
        }
    }
}

/// Filter over stored alerts; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct AlertQuery {
    pub severity: Option<AlertSeverity>,
    pub alert_type: Option<AlertType>,
    pub acknowledged: Option<bool>,
    pub since: Option<DateTime<Utc>>,
}

impl AlertQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn alert_type(mut self, alert_type: AlertType) -> Self {
        self.alert_type = Some(alert_type);
        self
    }

    pub fn acknowledged(mut self, acknowledged: bool) -> Self {
        self.acknowledged = Some(acknowledged);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        self.severity.map_or(true, |s| alert.severity == s)
            && self.alert_type.map_or(true, |t| alert.alert_type == t)
            && self.acknowledged.map_or(true, |a| alert.acknowledged == a)
            && self.since.map_or(true, |t| alert.timestamp >= t)
    }
}

/// Receiver for raised alerts, e.g. a pager or chat integration
pub trait AlertSink: Send + Sync {
    fn notify(&self, alert: &Alert) -> Result<()>;
}

impl<F> AlertSink for F
where
    F: Fn(&Alert) -> Result<()> + Send + Sync,
{
    fn notify(&self, alert: &Alert) -> Result<()> {
        self(alert)
    }
}

/// Deliver an alert, logging instead of propagating any failure or panic
pub(crate) fn deliver(sink: &dyn AlertSink, alert: &Alert) {
    match panic::catch_unwind(AssertUnwindSafe(|| sink.notify(alert))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(alert_id = %alert.id, error = %e, "Alert sink failed"),
        Err(_) => warn!(alert_id = %alert.id, "Alert sink panicked"),
    }
}

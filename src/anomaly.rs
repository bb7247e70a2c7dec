//! Anomalies reported to operators.
//!
//! Every anomaly carries a stable [`AnomalyCode`] so alerts can be routed
//! without parsing the human-readable message.

use crate::command::CommandKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source tag attached to every anomaly raised by the engine.
pub const DISPATCHER_SOURCE: &str = "dispatcher";

/// How urgent an anomaly is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Worth a look, no action needed.
    Warning,
    /// Needs operator attention.
    Error,
    /// Data taking cannot recover on its own.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        })
    }
}

/// Stable alert-routing code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyCode {
    /// An arm did not complete in time.
    ArmTimeout,
    /// A start did not complete in time.
    StartTimeout,
    /// A stop that repeated stops could not resolve.
    StopTimeout,
    /// Anything without a more specific code.
    GeneralError,
}

impl AnomalyCode {
    /// Timeout code for an overdue command of `kind`.
    pub fn timeout(kind: CommandKind) -> Self {
        match kind {
            CommandKind::Arm => AnomalyCode::ArmTimeout,
            CommandKind::Start => AnomalyCode::StartTimeout,
            CommandKind::Stop => AnomalyCode::StopTimeout,
        }
    }

    /// Wire name of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyCode::ArmTimeout => "ARM_TIMEOUT",
            AnomalyCode::StartTimeout => "START_TIMEOUT",
            AnomalyCode::StopTimeout => "STOP_TIMEOUT",
            AnomalyCode::GeneralError => "GENERAL_ERROR",
        }
    }
}

impl fmt::Display for AnomalyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured alert entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Component that raised it.
    pub source: String,
    /// Human-readable description.
    pub message: String,
    /// How urgent it is.
    pub severity: Severity,
    /// Routing code.
    pub code: AnomalyCode,
}

impl Anomaly {
    /// Anomaly raised by the dispatcher itself.
    pub fn dispatcher(message: impl Into<String>, severity: Severity, code: AnomalyCode) -> Self {
        Self {
            source: DISPATCHER_SOURCE.to_string(),
            message: message.into(),
            severity,
            code,
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}: {}",
            self.source, self.severity, self.code, self.message
        )
    }
}

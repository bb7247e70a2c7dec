//! Observed detector status.
//!
//! Readout nodes publish one status code per node; the aggregator folds them
//! into one [`DetectorStatus`] per detector and the engine reads the resulting
//! [`StatusSnapshot`] once per cycle. The engine never mutates a status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Operating state of a detector (or of a single readout node).
///
/// Integer codes follow the values stored by the readout nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaqStatus {
    /// Quiescent, ready to arm.
    Idle,
    /// Arm in progress.
    Arming,
    /// Ready to start.
    Armed,
    /// Taking data.
    Running,
    /// Readout reported a fault.
    Error,
    /// A node stopped reporting.
    Timeout,
    /// No report, or nodes disagree.
    Unknown,
}

impl DaqStatus {
    /// Every status, in code order.
    pub const ALL: [DaqStatus; 7] = [
        DaqStatus::Idle,
        DaqStatus::Arming,
        DaqStatus::Armed,
        DaqStatus::Running,
        DaqStatus::Error,
        DaqStatus::Timeout,
        DaqStatus::Unknown,
    ];

    /// Anything except `Idle` must be actively stopped to reach quiescence,
    /// including `Error`, `Timeout` and `Unknown`.
    pub fn is_active(self) -> bool {
        self != DaqStatus::Idle
    }

    /// Integer code as published by the readout nodes.
    pub fn code(self) -> i32 {
        match self {
            DaqStatus::Idle => 0,
            DaqStatus::Arming => 1,
            DaqStatus::Armed => 2,
            DaqStatus::Running => 3,
            DaqStatus::Error => 4,
            DaqStatus::Timeout => 5,
            DaqStatus::Unknown => 6,
        }
    }
}

impl TryFrom<i32> for DaqStatus {
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, i32> {
        DaqStatus::ALL
            .iter()
            .copied()
            .find(|status| status.code() == code)
            .ok_or(code)
    }
}

impl fmt::Display for DaqStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DaqStatus::Idle => "Idle",
            DaqStatus::Arming => "Arming",
            DaqStatus::Armed => "Armed",
            DaqStatus::Running => "Running",
            DaqStatus::Error => "Error",
            DaqStatus::Timeout => "Timeout",
            DaqStatus::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Latest aggregated status of one detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorStatus {
    /// Aggregated state.
    pub status: DaqStatus,
    /// Current or most recent run number, when the nodes report one.
    #[serde(default)]
    pub number: Option<u64>,
}

impl DetectorStatus {
    /// Status without a run number.
    pub fn new(status: DaqStatus) -> Self {
        Self {
            status,
            number: None,
        }
    }

    /// Attach the reported run number.
    pub fn with_number(mut self, number: u64) -> Self {
        self.number = Some(number);
        self
    }
}

/// Status of every detector for one cycle, keyed by detector name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    detectors: HashMap<String, DetectorStatus>,
}

impl StatusSnapshot {
    /// Snapshot with no detectors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, detector: &str, status: DetectorStatus) -> Self {
        self.insert(detector, status);
        self
    }

    /// Set the status of `detector`.
    pub fn insert(&mut self, detector: &str, status: DetectorStatus) {
        self.detectors.insert(detector.to_string(), status);
    }

    /// Entry of `detector`, if reported.
    pub fn get(&self, detector: &str) -> Option<&DetectorStatus> {
        self.detectors.get(detector)
    }

    /// Status of `detector`, `Unknown` when it is missing from the snapshot.
    pub fn status_of(&self, detector: &str) -> DaqStatus {
        self.get(detector)
            .map_or(DaqStatus::Unknown, |entry| entry.status)
    }

    /// Run number reported for `detector`.
    pub fn run_number(&self, detector: &str) -> Option<u64> {
        self.get(detector).and_then(|entry| entry.number)
    }

    /// Fill in a run number the nodes did not report.
    pub fn set_run_number(&mut self, detector: &str, number: u64) {
        self.detectors
            .entry(detector.to_string())
            .or_insert_with(|| DetectorStatus::new(DaqStatus::Unknown))
            .number = Some(number);
    }

    /// Entries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DetectorStatus)> {
        self.detectors.iter().map(|(name, entry)| (name.as_str(), entry))
    }
}

/// Status report from a single readout or controller node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    /// Reporting node.
    pub host: String,
    /// State of this node alone.
    pub status: DaqStatus,
    /// Run the node is taking, if any.
    #[serde(default)]
    pub run_number: Option<u64>,
    /// When the node last reported.
    pub time: DateTime<Utc>,
}

/// Fold the node reports of one detector into a detector status.
///
/// No reports reads as `Unknown`, any node silent for longer than
/// `client_timeout` makes the detector `Timeout`, any node in `Error` makes it
/// `Error`. Nodes that agree give their common status; disagreement is
/// `Unknown`.
pub fn aggregate_status(
    reports: &[NodeReport],
    now: DateTime<Utc>,
    client_timeout: Duration,
) -> DetectorStatus {
    let number = reports.iter().filter_map(|r| r.run_number).max();
    let status = match reports.first() {
        None => DaqStatus::Unknown,
        Some(first) => {
            let stale = reports.iter().any(|r| {
                now.signed_duration_since(r.time)
                    .to_std()
                    .is_ok_and(|age| age > client_timeout)
            });
            if stale {
                DaqStatus::Timeout
            } else if reports.iter().any(|r| r.status == DaqStatus::Error) {
                DaqStatus::Error
            } else if reports.iter().all(|r| r.status == first.status) {
                first.status
            } else {
                DaqStatus::Unknown
            }
        }
    };
    DetectorStatus { status, number }
}

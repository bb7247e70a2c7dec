//! State × linkage transition table.
//!
//! | status               | linked aux agree | action            |
//! |----------------------|------------------|-------------------|
//! | Running              | yes              | check turnover    |
//! | Armed                | yes              | start             |
//! | Idle                 | yes              | arm               |
//! | Arming               | yes              | await arm         |
//! | Error                | yes              | forced stop       |
//! | Timeout, Unknown     | -                | check timeouts    |
//! | any                  | no               | check timeouts    |
//!
//! Independent (unlinked) detectors use the same table without the agreement
//! column, except that `Arming` falls through to a generic timeout check.

use crate::status::DaqStatus;

/// What the controller does for one active detector in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Running: cycle the run if it outlived its configured length.
    CheckTurnover,
    /// Armed: start the run.
    Start,
    /// Idle: arm for the goal's mode.
    Arm,
    /// Arming: wait for the arm, within its timeout.
    AwaitArm,
    /// Error: stop regardless of debounce.
    ForceStop,
    /// Anything else: evaluate whatever command is outstanding.
    CheckTimeouts,
}

impl Action {
    /// Action for the primary given the statuses of its linked auxiliaries.
    pub fn plan_linked(primary: DaqStatus, linked: &[DaqStatus]) -> Self {
        if !linked.iter().all(|status| *status == primary) {
            return Action::CheckTimeouts;
        }
        match primary {
            DaqStatus::Running => Action::CheckTurnover,
            DaqStatus::Armed => Action::Start,
            DaqStatus::Idle => Action::Arm,
            DaqStatus::Arming => Action::AwaitArm,
            DaqStatus::Error => Action::ForceStop,
            DaqStatus::Timeout | DaqStatus::Unknown => Action::CheckTimeouts,
        }
    }

    /// Action for a detector that is not linked to anything.
    pub fn plan_independent(status: DaqStatus) -> Self {
        match status {
            DaqStatus::Running => Action::CheckTurnover,
            DaqStatus::Armed => Action::Start,
            DaqStatus::Idle => Action::Arm,
            DaqStatus::Error => Action::ForceStop,
            DaqStatus::Arming | DaqStatus::Timeout | DaqStatus::Unknown => Action::CheckTimeouts,
        }
    }
}

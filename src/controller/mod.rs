//! The reconciliation engine.
//!
//! [`DaqController`] is called once per control cycle with the latest status
//! snapshot and the operator's goal, and decides which commands (if any)
//! bring the detectors closer to that goal. It never waits for hardware: it
//! issues a command and looks again on the next cycle.
//!
//! # Cycle
//!
//! 1. Escalation counters of idle detectors are reset.
//! 2. Detectors whose goal is inactive are stopped. A linked auxiliary is
//!    stopped through the primary; its own `active` flag is ignored.
//! 3. Detectors whose goal is active are driven along
//!    idle → arm → armed → start → running, see [`Action`].
//!
//! All mutable state (command ledger, escalation counters, skip flags) lives
//! in the controller's [`CommandLedger`]; nothing else touches it.

mod dispatch;
pub mod ledger;
pub mod plan;
mod timeouts;
mod turnover;

pub use ledger::CommandLedger;
pub use plan::Action;

use crate::anomaly::{Anomaly, AnomalyCode, Severity};
use crate::clock::Clock;
use crate::command::{CommandKind, CommandTimeouts};
use crate::config::{DetectorsConfig, DispatcherConfig};
use crate::error::AppResult;
use crate::goal::{AuxLink, GoalSnapshot};
use crate::status::{DaqStatus, StatusSnapshot};
use crate::store::ControlStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Reconciles observed detector status with the operator goal.
pub struct DaqController<S: ControlStore> {
    store: S,
    clock: Arc<dyn Clock>,
    topology: DetectorsConfig,
    timeouts: CommandTimeouts,
    stop_retries: u32,
    stop_delay: Duration,
    ledger: CommandLedger,
    // Inputs of the current cycle, read by the helpers it triggers.
    status: StatusSnapshot,
    goal: GoalSnapshot,
}

impl<S: ControlStore> DaqController<S> {
    /// Build a controller for every detector in `config`.
    ///
    /// # Errors
    ///
    /// Fails if `config` does not validate.
    pub fn new(config: &DispatcherConfig, store: S, clock: Arc<dyn Clock>) -> AppResult<Self> {
        config.validate()?;
        let ledger = CommandLedger::new(config.detector_names(), clock.now());
        info!(
            detectors = ?config.detector_names(),
            stop_retries = config.dispatcher.stop_retries,
            "DaqController initialised"
        );
        Ok(Self {
            store,
            clock,
            topology: config.detectors.clone(),
            timeouts: config.command_timeouts(),
            stop_retries: config.dispatcher.stop_retries,
            stop_delay: config.stop_propagation_delay(),
            ledger,
            status: StatusSnapshot::new(),
            goal: GoalSnapshot::new(),
        })
    }

    /// Run one reconciliation cycle.
    pub fn reconcile(&mut self, status: &StatusSnapshot, goal: &GoalSnapshot) {
        self.status = status.clone();
        self.goal = goal.clone();

        let idle: Vec<String> = self
            .ledger
            .detectors()
            .filter(|name| self.status.status_of(name) == DaqStatus::Idle)
            .map(str::to_string)
            .collect();
        for detector in &idle {
            self.ledger.reset_escalation(detector);
        }

        let primary = self.topology.primary.clone();
        let Some(primary_goal) = self.goal.get(&primary).cloned() else {
            warn!("No goal for primary detector '{}', skipping cycle", primary);
            return;
        };

        // (slot, name, linked) for every configured auxiliary
        let aux: Vec<(AuxLink, String, bool)> = self
            .topology
            .auxiliaries()
            .into_iter()
            .map(|(link, name)| (link, name.to_string(), primary_goal.is_linked(link)))
            .collect();

        // Inactive goals: stop whatever is still doing something.
        if !primary_goal.active {
            let primary_active = self.status.status_of(&primary).is_active();
            let linked_active = aux
                .iter()
                .any(|(_, name, linked)| *linked && self.status.status_of(name).is_active());
            if primary_active || linked_active {
                self.control_detector(CommandKind::Stop, &primary, false);
            }
        }
        for (_, name, _) in aux.iter().filter(|(_, _, linked)| !linked) {
            let inactive = self.goal.get(name).is_some_and(|goal| !goal.active);
            if inactive && self.status.status_of(name).is_active() {
                self.control_detector(CommandKind::Stop, name, false);
            }
        }

        // Active goals: drive towards running.
        if primary_goal.active {
            let linked: Vec<DaqStatus> = aux
                .iter()
                .filter(|(_, _, linked)| *linked)
                .map(|(_, name, _)| self.status.status_of(name))
                .collect();
            let action = Action::plan_linked(self.status.status_of(&primary), &linked);
            self.execute(&primary, action);
        }
        for (_, name, _) in aux.iter().filter(|(_, _, linked)| !linked) {
            if self.goal.get(name).is_some_and(|goal| goal.active) {
                let action = Action::plan_independent(self.status.status_of(name));
                self.execute(name, action);
            }
        }
    }

    fn execute(&mut self, detector: &str, action: Action) {
        match action {
            Action::CheckTurnover => {
                debug!("Checking run turnover {}", detector);
                self.check_run_turnover(detector);
            }
            Action::Start => {
                info!("Starting {}", detector);
                self.control_detector(CommandKind::Start, detector, false);
            }
            Action::Arm => {
                info!("Arming {}", detector);
                self.control_detector(CommandKind::Arm, detector, false);
            }
            Action::AwaitArm => self.check_timeouts(detector, Some(CommandKind::Arm)),
            Action::ForceStop => {
                info!("{} has error!", detector);
                self.control_detector(CommandKind::Stop, detector, true);
            }
            Action::CheckTimeouts => {
                debug!("Checking {} timeouts", detector);
                self.check_timeouts(detector, None);
            }
        }
    }

    /// Raise the general "stuck" alert for the whole DAQ.
    pub fn report_stuck(&self) {
        self.report(Anomaly::dispatcher(
            "Dispatcher control loop can't get DAQ out of stuck state",
            Severity::Error,
            AnomalyCode::GeneralError,
        ));
    }

    fn report(&self, anomaly: Anomaly) {
        error!(code = %anomaly.code, severity = %anomaly.severity, "{}", anomaly.message);
        if let Err(e) = self.store.report_anomaly(&anomaly) {
            warn!("Failed to publish anomaly {}: {}", anomaly.code, e);
        }
    }

    /// Link flags of the primary's goal, restricted to configured auxiliaries.
    fn link_flags(&self) -> (bool, bool) {
        let linked = |link: AuxLink| {
            self.topology.aux_name(link).is_some()
                && self
                    .goal
                    .get(&self.topology.primary)
                    .is_some_and(|goal| goal.is_linked(link))
        };
        (linked(AuxLink::MuonVeto), linked(AuxLink::NeutronVeto))
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Control store the controller submits to.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Per-detector bookkeeping.
    pub fn ledger(&self) -> &CommandLedger {
        &self.ledger
    }

    /// Consecutive overdue stops counted for `detector`.
    pub fn escalation_count(&self, detector: &str) -> u32 {
        self.ledger.escalation(detector)
    }

    /// Whether the next arm of `detector` will be dropped.
    pub fn skip_pending(&self, detector: &str) -> bool {
        self.ledger.skip_pending(detector)
    }

    /// When `kind` last went out to `detector`.
    pub fn last_issued(&self, kind: CommandKind, detector: &str) -> Option<DateTime<Utc>> {
        self.ledger.last_issued(kind, detector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::command::NodeTargets;
    use crate::goal::GoalState;
    use crate::status::DetectorStatus;
    use crate::store::MemoryControlStore;
    use chrono::TimeZone;
    use tracing_test::traced_test;

    fn controller() -> (DaqController<MemoryControlStore>, MemoryControlStore, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap());
        let nodes = NodeTargets {
            readers: vec!["reader0".into()],
            controller: vec!["cc0".into()],
        };
        let mut config =
            DispatcherConfig::new(DetectorsConfig::primary("tpc").with_nodes("tpc", nodes.clone()));
        config.modes.insert("background".into(), nodes);
        let store = MemoryControlStore::from_config(&config, Arc::new(clock.clone()));
        let controller = DaqController::new(&config, store.clone(), Arc::new(clock.clone())).unwrap();
        (controller, store, clock)
    }

    #[test]
    #[traced_test]
    fn test_stop_without_run_number_warns() {
        let (mut controller, store, clock) = controller();
        clock.advance_secs(61);

        let status = StatusSnapshot::new().with("tpc", DetectorStatus::new(DaqStatus::Running));
        let goal = GoalSnapshot::new().with("tpc", GoalState::inactive("background", "shifter"));
        controller.reconcile(&status, &goal);

        assert_eq!(store.sent_commands().len(), 2);
        assert!(logs_contain("no associated number"));
    }

    #[test]
    #[traced_test]
    fn test_missing_primary_goal_warns() {
        let (mut controller, store, clock) = controller();
        clock.advance_secs(61);

        let status = StatusSnapshot::new().with("tpc", DetectorStatus::new(DaqStatus::Error));
        controller.reconcile(&status, &GoalSnapshot::new());

        assert!(store.sent_commands().is_empty());
        assert!(logs_contain("No goal for primary detector"));
    }

    #[test]
    fn test_report_stuck() {
        let (controller, store, _) = controller();
        controller.report_stuck();

        let anomalies = store.anomalies();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].code, AnomalyCode::GeneralError);
        assert_eq!(anomalies[0].source, crate::anomaly::DISPATCHER_SOURCE);
    }
}

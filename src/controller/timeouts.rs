//! Timeout evaluation and stop escalation.

use super::DaqController;
use crate::anomaly::{Anomaly, AnomalyCode, Severity};
use crate::command::CommandKind;
use crate::store::ControlStore;
use std::time::Duration;
use tracing::{debug, warn};

impl<S: ControlStore> DaqController<S> {
    /// Decide whether the command outstanding for `detector` is still within
    /// its grace period, needs a corrective stop, or has exhausted its
    /// retries. Without `kind`, the most recently issued command is assumed.
    pub(super) fn check_timeouts(&mut self, detector: &str, kind: Option<CommandKind>) {
        let kind = match kind {
            Some(kind) => {
                debug!("Checking {} timeout for {}", kind, detector);
                kind
            }
            None => {
                let kind = self.ledger.most_recent(detector);
                debug!("Most recent command for {} is {}", detector, kind);
                kind
            }
        };

        let elapsed = self.ledger.elapsed(kind, detector, self.now());
        let retries = self.ledger.escalation(detector);
        let timeout = self.effective_timeout(kind, retries);
        if elapsed < timeout {
            debug!(
                "{}s is within the {}s timeout for a {} command",
                elapsed.as_secs(),
                timeout.as_secs(),
                kind
            );
            return;
        }

        match kind {
            CommandKind::Stop if retries >= self.stop_retries => {
                self.report(Anomaly::dispatcher(
                    "Dispatcher control loop detects a timeout that is not solved with a STOP command",
                    Severity::Fatal,
                    AnomalyCode::StopTimeout,
                ));
                self.ledger.reset_escalation(detector);
            }
            CommandKind::Stop => {
                warn!(
                    "Stop of {} overdue after {}s, retry {} of {}",
                    detector,
                    elapsed.as_secs(),
                    retries + 1,
                    self.stop_retries
                );
                self.control_detector(CommandKind::Stop, detector, true);
                self.ledger.escalate(detector);
            }
            CommandKind::Arm | CommandKind::Start => {
                self.report(Anomaly::dispatcher(
                    format!(
                        "{} took more than {} seconds to {}, indicating a possible timeout or error",
                        detector,
                        self.timeouts.get(kind).as_secs(),
                        kind
                    ),
                    Severity::Error,
                    AnomalyCode::timeout(kind),
                ));
                self.control_detector(CommandKind::Stop, detector, false);
            }
        }
    }

    /// Each unresolved stop earns the next one a longer grace period.
    fn effective_timeout(&self, kind: CommandKind, stop_escalation: u32) -> Duration {
        let base = self.timeouts.get(kind);
        match kind {
            CommandKind::Stop => base
                .checked_mul(stop_escalation.saturating_add(1))
                .unwrap_or(Duration::MAX),
            CommandKind::Arm | CommandKind::Start => base,
        }
    }
}

//! Command issuance with debounce.

use super::DaqController;
use crate::command::{CommandKind, CommandRequest, NodeTargets};
use crate::goal::GoalState;
use crate::store::ControlStore;
use std::time::Duration;
use tracing::{debug, error, info, warn};

impl<S: ControlStore> DaqController<S> {
    /// Issue `kind` to `detector` unless the same command went out less than
    /// its timeout ago; in that case evaluate the outstanding command instead.
    /// `force` skips the debounce.
    ///
    /// Controller nodes are commanded first, readout nodes after, so readers
    /// never run without a controller. Bookkeeping (run records, skip flag,
    /// ledger) only changes once the hosts it describes were actually
    /// commanded.
    pub(super) fn control_detector(&mut self, kind: CommandKind, detector: &str, force: bool) {
        let now = self.now();
        let elapsed = self.ledger.elapsed(kind, detector, now);
        if !force && elapsed <= self.timeouts.get(kind) {
            self.check_timeouts(detector, Some(kind));
            return;
        }

        let Some(goal) = self.goal.get(detector).cloned() else {
            warn!("No goal for '{}', not sending {}", detector, kind);
            return;
        };

        let (targets, reader_delay) = match kind {
            CommandKind::Arm | CommandKind::Start => {
                if kind == CommandKind::Arm && self.ledger.take_skip(detector) {
                    info!("Giving {} one more cycle to settle before arming", detector);
                    return;
                }
                match self.store.resolve_nodes_for_mode(&goal.mode) {
                    Ok(targets) => (targets, Duration::ZERO),
                    Err(e) => {
                        error!("Cannot resolve nodes for mode '{}': {}", goal.mode, e);
                        return;
                    }
                }
            }
            CommandKind::Stop => {
                let (link_mv, link_nv) = self.link_flags();
                match self
                    .store
                    .resolve_configured_nodes(detector, link_mv, link_nv)
                {
                    Ok(targets) => (targets, self.stop_delay),
                    Err(e) => {
                        error!("Cannot resolve nodes of {}: {}", detector, e);
                        return;
                    }
                }
            }
        };

        debug!("Sending {} to {}", kind.as_str().to_uppercase(), detector);
        let NodeTargets {
            readers,
            controller,
        } = targets;
        if !self.submit(kind, detector, &goal, controller, Duration::ZERO) {
            return;
        }

        let run = match kind {
            CommandKind::Start => match self.store.create_run(detector, &self.goal) {
                Ok(number) => {
                    info!(run = number, "Opened run for {}", detector);
                    Some(number)
                }
                Err(e) => {
                    error!("Cannot open a run for {}: {}", detector, e);
                    return;
                }
            },
            CommandKind::Arm | CommandKind::Stop => None,
        };

        if !self.submit(kind, detector, &goal, readers, reader_delay) {
            // The start will be retried with a fresh run.
            if let Some(number) = run {
                if let Err(e) = self.store.record_stop_time(number) {
                    warn!("Could not close abandoned run {}: {}", number, e);
                }
            }
            return;
        }

        if kind == CommandKind::Stop {
            self.ledger.set_skip(detector);
            self.close_current_run(detector);
        }
        self.ledger.record(kind, detector, now);
    }

    fn close_current_run(&self, detector: &str) {
        match self.status.run_number(detector) {
            Some(number) => {
                if let Err(e) = self.store.record_stop_time(number) {
                    warn!("Wanted to stop run {} but could not close it: {}", number, e);
                }
            }
            None => warn!("Wanted to stop run of {} but no associated number", detector),
        }
    }

    /// Submit one request; an empty host list trivially succeeds.
    fn submit(
        &self,
        kind: CommandKind,
        detector: &str,
        goal: &GoalState,
        hosts: Vec<String>,
        delay: Duration,
    ) -> bool {
        if hosts.is_empty() {
            return true;
        }
        let request = CommandRequest {
            kind,
            hosts,
            user: goal.user.clone(),
            detector: detector.to_string(),
            mode: goal.mode.clone(),
            delay,
        };
        match self.store.send_command(request) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send {} to {}: {}", kind, detector, e);
                false
            }
        }
    }
}

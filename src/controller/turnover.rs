//! Periodic run turnover.

use super::DaqController;
use crate::command::CommandKind;
use crate::store::ControlStore;
use std::time::Duration;
use tracing::{info, warn};

impl<S: ControlStore> DaqController<S> {
    /// Stop a run that outlived the goal's `stop_after`; the normal
    /// arm/start path restarts it on later cycles.
    pub(super) fn check_run_turnover(&mut self, detector: &str) {
        let Some(minutes) = self.goal.get(detector).and_then(|goal| goal.stop_after) else {
            return;
        };

        let number = match self.status.run_number(detector) {
            Some(number) => number,
            // Restarted mid-run: the open run is the newest one.
            None => match self.store.next_run_number() {
                Ok(next) if next > 0 => {
                    self.status.set_run_number(detector, next - 1);
                    next - 1
                }
                Ok(_) => {
                    warn!("No run recorded yet for {}", detector);
                    return;
                }
                Err(e) => {
                    warn!("Cannot look up the current run of {}: {}", detector, e);
                    return;
                }
            },
        };

        let start = match self.store.run_start_time(number) {
            Ok(start) => start,
            Err(e) => {
                warn!("Cannot read start of run {}: {}", number, e);
                return;
            }
        };

        let now = self.now();
        let run_age = now
            .signed_duration_since(start)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let run_length = Duration::from_secs(u64::from(minutes) * 60);
        let since_stop = self.ledger.elapsed(CommandKind::Stop, detector, now);

        if run_age > run_length && since_stop > self.timeouts.stop {
            info!(
                run = number,
                "Stopping run for {} after {} minutes", detector, minutes
            );
            // Stamp before sending so the next cycle cannot re-trigger
            // while the stop is in flight.
            self.ledger.record(CommandKind::Stop, detector, now);
            self.control_detector(CommandKind::Stop, detector, true);
        }
    }
}

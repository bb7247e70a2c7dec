//! The polling shell around the controller.
//!
//! Each cycle fetches the latest status snapshot and goal, then hands both to
//! the [`DaqController`]. A failed fetch skips the cycle; the loop retries
//! forever, raising the general stuck alert once per streak of
//! [`STUCK_AFTER_FAILED_POLLS`] consecutive failures.

use crate::controller::DaqController;
use crate::error::AppResult;
use crate::goal::GoalSnapshot;
use crate::status::StatusSnapshot;
use crate::store::ControlStore;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Consecutive failed polls after which the DAQ is reported as stuck.
pub const STUCK_AFTER_FAILED_POLLS: u32 = 10;

/// Produces the aggregated status of every detector.
pub trait StatusSource: Send {
    /// Poll the current status.
    fn latest_status(&mut self) -> AppResult<StatusSnapshot>;
}

/// Produces the operator goal.
pub trait GoalSource: Send {
    /// Poll the current goal.
    fn current_goal(&mut self) -> AppResult<GoalSnapshot>;
}

/// A goal that never changes.
#[derive(Debug, Clone)]
pub struct StaticGoal(GoalSnapshot);

impl StaticGoal {
    /// Always yield `goal`.
    pub fn new(goal: GoalSnapshot) -> Self {
        Self(goal)
    }
}

impl GoalSource for StaticGoal {
    fn current_goal(&mut self) -> AppResult<GoalSnapshot> {
        Ok(self.0.clone())
    }
}

/// A JSON goal document, re-read on every poll.
///
/// ```json
/// { "tpc": { "active": "true", "mode": "background", "user": "shifter" } }
/// ```
#[derive(Debug, Clone)]
pub struct GoalFile {
    path: PathBuf,
}

impl GoalFile {
    /// Goal read from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl GoalSource for GoalFile {
    fn current_goal(&mut self) -> AppResult<GoalSnapshot> {
        let text = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Controller plus its two input feeds.
pub struct Dispatcher<S, A, G>
where
    S: ControlStore,
    A: StatusSource,
    G: GoalSource,
{
    controller: DaqController<S>,
    status_source: A,
    goal_source: G,
    failed_polls: u32,
    cycles: u64,
}

impl<S, A, G> Dispatcher<S, A, G>
where
    S: ControlStore,
    A: StatusSource,
    G: GoalSource,
{
    /// Wire a controller to its feeds.
    pub fn new(controller: DaqController<S>, status_source: A, goal_source: G) -> Self {
        Self {
            controller,
            status_source,
            goal_source,
            failed_polls: 0,
            cycles: 0,
        }
    }

    /// Run one cycle. Returns whether the controller was invoked.
    pub fn tick(&mut self) -> bool {
        let status = match self.status_source.latest_status() {
            Ok(status) => status,
            Err(e) => {
                warn!("Status poll failed: {}", e);
                self.poll_failed();
                return false;
            }
        };
        let goal = match self.goal_source.current_goal() {
            Ok(goal) => goal,
            Err(e) => {
                warn!("Goal poll failed: {}", e);
                self.poll_failed();
                return false;
            }
        };

        self.failed_polls = 0;
        self.controller.reconcile(&status, &goal);
        self.cycles += 1;
        true
    }

    fn poll_failed(&mut self) {
        self.failed_polls = self.failed_polls.saturating_add(1);
        if self.failed_polls == STUCK_AFTER_FAILED_POLLS {
            self.controller.report_stuck();
        }
    }

    /// Tick every `poll_interval` until `shutdown` turns true (or its sender
    /// is dropped), or until `max_cycles` cycles have reconciled.
    pub async fn run(
        mut self,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        max_cycles: Option<u64>,
    ) -> Self {
        info!("Dispatcher started, polling every {:?}", poll_interval);
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                    if max_cycles.is_some_and(|max| self.cycles >= max) {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Dispatcher stopped after {} cycles", self.cycles);
        self
    }

    /// The wrapped controller.
    pub fn controller(&self) -> &DaqController<S> {
        &self.controller
    }

    /// Cycles that reached the controller.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatcherError;
    use std::io::Write;

    #[test]
    fn test_goal_file_is_reread() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"tpc": {"active": "false", "mode": "background", "user": "shifter"}}"#)
            .unwrap();
        let mut source = GoalFile::new(file.path());
        assert!(!source.current_goal().unwrap().get("tpc").unwrap().active);

        std::fs::write(
            file.path(),
            r#"{"tpc": {"active": true, "mode": "background", "user": "shifter", "stop_after": 60}}"#,
        )
        .unwrap();
        let goal = source.current_goal().unwrap();
        let tpc = goal.get("tpc").unwrap();
        assert!(tpc.active);
        assert_eq!(tpc.stop_after, Some(60));
    }

    #[test]
    fn test_goal_file_errors() {
        let mut missing = GoalFile::new("/nonexistent/goal.json");
        assert!(matches!(missing.current_goal(), Err(DispatcherError::Io(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{not json").unwrap();
        let mut broken = GoalFile::new(file.path());
        assert!(matches!(broken.current_goal(), Err(DispatcherError::Json(_))));
    }
}

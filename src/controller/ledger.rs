//! Per-detector bookkeeping owned by the controller.

use crate::command::CommandKind;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// What the controller remembers about one detector between cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorState {
    last_issued: BTreeMap<CommandKind, DateTime<Utc>>,
    /// Consecutive overdue stops since the detector was last seen idle.
    stop_escalation: u32,
    /// Drop the next arm once, so hardware settles after a stop.
    skip_next_arm: bool,
}

impl DetectorState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_issued: CommandKind::ALL.iter().map(|kind| (*kind, now)).collect(),
            stop_escalation: 0,
            skip_next_arm: false,
        }
    }
}

/// Command-issuance ledger, escalation counters and skip flags, keyed by
/// detector name. Every configured detector gets an entry at construction.
#[derive(Debug, Clone, Default)]
pub struct CommandLedger {
    detectors: HashMap<String, DetectorState>,
}

impl CommandLedger {
    /// Ledger with every command of every detector stamped at `now`, so a
    /// cold start assumes nothing is outstanding.
    pub fn new<I, S>(detectors: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            detectors: detectors
                .into_iter()
                .map(|name| (name.into(), DetectorState::new(now)))
                .collect(),
        }
    }

    /// Whether `detector` is tracked.
    pub fn contains(&self, detector: &str) -> bool {
        self.detectors.contains_key(detector)
    }

    /// Tracked detector names.
    pub fn detectors(&self) -> impl Iterator<Item = &str> {
        self.detectors.keys().map(String::as_str)
    }

    /// When `kind` last went out to `detector`.
    pub fn last_issued(&self, kind: CommandKind, detector: &str) -> Option<DateTime<Utc>> {
        self.detectors
            .get(detector)
            .and_then(|state| state.last_issued.get(&kind).copied())
    }

    /// Stamp `kind` as issued at `at`. Timestamps never move backwards.
    pub fn record(&mut self, kind: CommandKind, detector: &str, at: DateTime<Utc>) {
        if let Some(state) = self.detectors.get_mut(detector) {
            let stamp = state.last_issued.entry(kind).or_insert(at);
            if at > *stamp {
                *stamp = at;
            }
        }
    }

    /// Time since `kind` was last issued. Unknown detectors read as forever.
    pub fn elapsed(&self, kind: CommandKind, detector: &str, now: DateTime<Utc>) -> Duration {
        self.last_issued(kind, detector).map_or(Duration::MAX, |last| {
            now.signed_duration_since(last)
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }

    /// The command issued most recently, i.e. the one we are waiting on.
    /// Ties go to the later kind in arm, start, stop order.
    pub fn most_recent(&self, detector: &str) -> CommandKind {
        CommandKind::ALL
            .iter()
            .copied()
            .max_by_key(|kind| self.last_issued(*kind, detector))
            .unwrap_or(CommandKind::Stop)
    }

    /// Overdue stops counted so far.
    pub fn escalation(&self, detector: &str) -> u32 {
        self.detectors
            .get(detector)
            .map_or(0, |state| state.stop_escalation)
    }

    /// Count one more overdue stop; returns the new count.
    pub fn escalate(&mut self, detector: &str) -> u32 {
        self.detectors.get_mut(detector).map_or(0, |state| {
            state.stop_escalation = state.stop_escalation.saturating_add(1);
            state.stop_escalation
        })
    }

    /// Forget overdue stops, e.g. once the detector is idle.
    pub fn reset_escalation(&mut self, detector: &str) {
        if let Some(state) = self.detectors.get_mut(detector) {
            state.stop_escalation = 0;
        }
    }

    /// Whether the next arm will be dropped.
    pub fn skip_pending(&self, detector: &str) -> bool {
        self.detectors
            .get(detector)
            .is_some_and(|state| state.skip_next_arm)
    }

    /// Drop the next arm of `detector`.
    pub fn set_skip(&mut self, detector: &str) {
        if let Some(state) = self.detectors.get_mut(detector) {
            state.skip_next_arm = true;
        }
    }

    /// Clear the skip flag, returning whether it was set.
    pub fn take_skip(&mut self, detector: &str) -> bool {
        self.detectors
            .get_mut(detector)
            .is_some_and(|state| std::mem::take(&mut state.skip_next_arm))
    }
}

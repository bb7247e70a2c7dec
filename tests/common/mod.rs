//! Common fixtures for dispatcher integration tests
//!
//! - A three-detector configuration with node tables and run modes
//! - A controller wired to an in-memory store and a manual clock
//! - Helpers to build snapshots and to read back issued commands

#![allow(dead_code)] // Not every test file uses every helper

use chrono::{DateTime, TimeZone, Utc};
use daq_dispatcher::command::{CommandKind, CommandRequest, NodeTargets};
use daq_dispatcher::config::{DetectorsConfig, DispatcherConfig};
use daq_dispatcher::goal::{AuxLink, GoalSnapshot, GoalState};
use daq_dispatcher::status::{DaqStatus, DetectorStatus, StatusSnapshot};
use daq_dispatcher::{DaqController, ManualClock, MemoryControlStore};
use std::sync::Arc;

pub const TPC: &str = "tpc";
pub const MV: &str = "muon_veto";
pub const NV: &str = "neutron_veto";

/// Every command timeout in the fixture config, in seconds.
pub const TIMEOUT_SECS: i64 = 60;
pub const STOP_RETRIES: u32 = 3;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn nodes(readers: &[&str], controller: &[&str]) -> NodeTargets {
    NodeTargets {
        readers: readers.iter().map(|h| h.to_string()).collect(),
        controller: controller.iter().map(|h| h.to_string()).collect(),
    }
}

pub fn config() -> DispatcherConfig {
    let detectors = DetectorsConfig::primary(TPC)
        .with_aux(AuxLink::MuonVeto, MV)
        .with_aux(AuxLink::NeutronVeto, NV)
        .with_nodes(TPC, nodes(&["reader0", "reader1"], &["cc0"]))
        .with_nodes(MV, nodes(&["reader5"], &["cc5"]))
        .with_nodes(NV, nodes(&["reader6"], &["cc6"]));
    let mut config = DispatcherConfig::new(detectors);
    config.timeouts.arm_secs = TIMEOUT_SECS as u64;
    config.timeouts.start_secs = TIMEOUT_SECS as u64;
    config.timeouts.stop_secs = TIMEOUT_SECS as u64;
    config.dispatcher.stop_retries = STOP_RETRIES;
    config.dispatcher.stop_propagation_delay_secs = 5;
    config
        .modes
        .insert("background".into(), nodes(&["reader0", "reader1"], &["cc0"]));
    config.modes.insert(
        "combined".into(),
        nodes(&["reader0", "reader1", "reader5", "reader6"], &["cc0", "cc5", "cc6"]),
    );
    config.modes.insert("mv_only".into(), nodes(&["reader5"], &["cc5"]));
    config.modes.insert("nv_only".into(), nodes(&["reader6"], &["cc6"]));
    config
}

/// Controller plus handles to its store and clock.
pub struct Harness {
    pub controller: DaqController<MemoryControlStore>,
    pub store: MemoryControlStore,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        let clock = ManualClock::new(t0());
        let store = MemoryControlStore::from_config(&config, Arc::new(clock.clone()));
        let controller = DaqController::new(&config, store.clone(), Arc::new(clock.clone()))
            .expect("fixture config is valid");
        Self {
            controller,
            store,
            clock,
        }
    }

    /// Advance past every command timeout, leaving the cold-start window.
    pub fn settle(&self) {
        self.clock.advance_secs(TIMEOUT_SECS + 1);
    }

    /// Reconcile once and return the (kind, detector) pairs issued.
    pub fn cycle(&mut self, status: &StatusSnapshot, goal: &GoalSnapshot) -> Vec<(CommandKind, String)> {
        self.store.clear_log();
        self.controller.reconcile(status, goal);
        issued(&self.store.sent_commands())
    }
}

/// Collapse the controller/reader request pair of each command into one entry.
pub fn issued(requests: &[CommandRequest]) -> Vec<(CommandKind, String)> {
    let mut out: Vec<(CommandKind, String)> = Vec::new();
    for request in requests {
        let entry = (request.kind, request.detector.clone());
        if out.last() != Some(&entry) {
            out.push(entry);
        }
    }
    out
}

pub fn status(entries: &[(&str, DaqStatus)]) -> StatusSnapshot {
    entries
        .iter()
        .fold(StatusSnapshot::new(), |snapshot, (name, status)| {
            snapshot.with(name, DetectorStatus::new(*status))
        })
}

/// All three detectors in the given states.
pub fn all(tpc: DaqStatus, mv: DaqStatus, nv: DaqStatus) -> StatusSnapshot {
    status(&[(TPC, tpc), (MV, mv), (NV, nv)])
}

/// Goal with the primary as given and both vetoes inactive.
pub fn goal_with(primary: GoalState) -> GoalSnapshot {
    GoalSnapshot::new()
        .with(TPC, primary)
        .with(MV, GoalState::inactive("mv_only", "shifter"))
        .with(NV, GoalState::inactive("nv_only", "shifter"))
}

pub fn active(mode: &str) -> GoalState {
    GoalState::active(mode, "shifter")
}

pub fn inactive(mode: &str) -> GoalState {
    GoalState::inactive(mode, "shifter")
}

pub fn cmd(kind: CommandKind, detector: &str) -> (CommandKind, String) {
    (kind, detector.to_string())
}

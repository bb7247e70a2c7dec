//! Boundary to the command-transport and persistence layer.
//!
//! The dispatcher shares one external datastore with the readout nodes: it
//! doubles as the run database and as the message bus commands travel on.
//! [`ControlStore`] is everything the engine needs from it. Calls are
//! synchronous from the engine's point of view; a command counts as issued
//! once `send_command` returns, and its effect only shows up in a later
//! status snapshot.

pub mod memory;

use crate::anomaly::Anomaly;
use crate::command::{CommandRequest, NodeTargets};
use crate::error::AppResult;
use crate::goal::GoalSnapshot;
use chrono::{DateTime, Utc};

pub use memory::{MemoryControlStore, RunRecord};

/// Capabilities the engine requires from its environment.
pub trait ControlStore: Send + Sync {
    /// Nodes that take part in data taking for run `mode`.
    fn resolve_nodes_for_mode(&self, mode: &str) -> AppResult<NodeTargets>;

    /// Nodes currently owned by `detector`. When `detector` is the primary,
    /// the nodes of every linked auxiliary are included.
    fn resolve_configured_nodes(
        &self,
        detector: &str,
        link_mv: bool,
        link_nv: bool,
    ) -> AppResult<NodeTargets>;

    /// Open a new run record for `detector`; returns the run number.
    fn create_run(&self, detector: &str, goal: &GoalSnapshot) -> AppResult<u64>;

    /// Close run `number` at the current time.
    fn record_stop_time(&self, number: u64) -> AppResult<()>;

    /// Submit a command on the bus.
    fn send_command(&self, request: CommandRequest) -> AppResult<()>;

    /// Publish an anomaly for operators.
    fn report_anomaly(&self, anomaly: &Anomaly) -> AppResult<()>;

    /// Number the next run will get.
    fn next_run_number(&self) -> AppResult<u64>;

    /// Start time of run `number`.
    fn run_start_time(&self, number: u64) -> AppResult<DateTime<Utc>>;
}

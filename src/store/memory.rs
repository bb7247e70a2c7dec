//! In-process control store.
//!
//! Keeps node tables, run records, and a log of every submitted command and
//! anomaly in memory. Clones share state, so a test (or the simulation) can
//! hold a handle while the engine owns another.

use super::ControlStore;
use crate::anomaly::Anomaly;
use crate::clock::Clock;
use crate::command::{CommandRequest, NodeTargets};
use crate::config::{DetectorsConfig, DispatcherConfig};
use crate::error::{AppResult, DispatcherError};
use crate::goal::{AuxLink, GoalSnapshot};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A persisted data-taking run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run number, unique and increasing.
    pub number: u64,
    /// Detector that opened the run.
    pub detector: String,
    /// Every detector taking part, the owning one first.
    pub detectors: Vec<String>,
    /// Operating mode the run was started in.
    pub mode: String,
    /// Who requested the run.
    pub user: String,
    /// When the start went out.
    pub start: DateTime<Utc>,
    /// Unset while the run is open.
    pub end: Option<DateTime<Utc>>,
}

struct Inner {
    detectors: DetectorsConfig,
    modes: HashMap<String, NodeTargets>,
    runs: BTreeMap<u64, RunRecord>,
    next_run: u64,
    commands: Vec<CommandRequest>,
    anomalies: Vec<Anomaly>,
    fail_sends: bool,
    unreachable: HashSet<String>,
}

/// Shared in-memory [`ControlStore`].
#[derive(Clone)]
pub struct MemoryControlStore {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
}

impl MemoryControlStore {
    /// Empty store over the given node tables.
    pub fn new(
        detectors: DetectorsConfig,
        modes: HashMap<String, NodeTargets>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                detectors,
                modes,
                runs: BTreeMap::new(),
                next_run: 1,
                commands: Vec::new(),
                anomalies: Vec::new(),
                fail_sends: false,
                unreachable: HashSet::new(),
            })),
            clock,
        }
    }

    /// Store seeded with the node tables of `config`.
    pub fn from_config(config: &DispatcherConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.detectors.clone(), config.modes.clone(), clock)
    }

    /// Record an already open run, e.g. one started before the dispatcher.
    pub fn insert_run(&self, number: u64, detector: &str, start: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        inner.runs.insert(
            number,
            RunRecord {
                number,
                detector: detector.to_string(),
                detectors: vec![detector.to_string()],
                mode: String::new(),
                user: String::new(),
                start,
                end: None,
            },
        );
        inner.next_run = inner.next_run.max(number + 1);
    }

    /// Run record by number.
    pub fn run(&self, number: u64) -> Option<RunRecord> {
        self.inner.lock().runs.get(&number).cloned()
    }

    /// Newest run owned by `detector`.
    pub fn latest_run(&self, detector: &str) -> Option<RunRecord> {
        self.inner
            .lock()
            .runs
            .values()
            .rev()
            .find(|run| run.detector == detector)
            .cloned()
    }

    /// Every command submitted so far, in order.
    pub fn sent_commands(&self) -> Vec<CommandRequest> {
        self.inner.lock().commands.clone()
    }

    /// Commands submitted after the first `offset`.
    pub fn commands_since(&self, offset: usize) -> Vec<CommandRequest> {
        let inner = self.inner.lock();
        inner.commands.get(offset..).map(<[_]>::to_vec).unwrap_or_default()
    }

    /// Every anomaly reported so far.
    pub fn anomalies(&self) -> Vec<Anomaly> {
        self.inner.lock().anomalies.clone()
    }

    /// Forget logged commands and anomalies; runs are kept.
    pub fn clear_log(&self) {
        let mut inner = self.inner.lock();
        inner.commands.clear();
        inner.anomalies.clear();
    }

    /// Make `send_command` fail, simulating a transport outage.
    pub fn set_send_failure(&self, fail: bool) {
        self.inner.lock().fail_sends = fail;
    }

    /// Make every submission naming `host` fail; other hosts are unaffected.
    pub fn set_unreachable(&self, host: &str) {
        self.inner.lock().unreachable.insert(host.to_string());
    }
}

impl ControlStore for MemoryControlStore {
    fn resolve_nodes_for_mode(&self, mode: &str) -> AppResult<NodeTargets> {
        self.inner
            .lock()
            .modes
            .get(mode)
            .cloned()
            .ok_or_else(|| DispatcherError::UnknownMode(mode.to_string()))
    }

    fn resolve_configured_nodes(
        &self,
        detector: &str,
        link_mv: bool,
        link_nv: bool,
    ) -> AppResult<NodeTargets> {
        let inner = self.inner.lock();
        let topology = &inner.detectors;
        let mut nodes = topology
            .nodes
            .get(detector)
            .cloned()
            .ok_or_else(|| DispatcherError::UnknownDetector(detector.to_string()))?;

        if detector == topology.primary {
            for (link, aux) in topology.auxiliaries() {
                let linked = match link {
                    AuxLink::MuonVeto => link_mv,
                    AuxLink::NeutronVeto => link_nv,
                };
                if let (true, Some(aux_nodes)) = (linked, topology.nodes.get(aux)) {
                    nodes.extend(aux_nodes);
                }
            }
        }
        Ok(nodes)
    }

    fn create_run(&self, detector: &str, goal: &GoalSnapshot) -> AppResult<u64> {
        let own = goal
            .get(detector)
            .ok_or_else(|| DispatcherError::UnknownDetector(detector.to_string()))?;
        let start = self.clock.now();

        let mut inner = self.inner.lock();
        let mut detectors = vec![detector.to_string()];
        if detector == inner.detectors.primary {
            for (link, aux) in inner.detectors.auxiliaries() {
                if own.is_linked(link) {
                    detectors.push(aux.to_string());
                }
            }
        }

        let number = inner.next_run;
        inner.next_run += 1;
        inner.runs.insert(
            number,
            RunRecord {
                number,
                detector: detector.to_string(),
                detectors,
                mode: own.mode.clone(),
                user: own.user.clone(),
                start,
                end: None,
            },
        );
        debug!(run = number, detector, "Inserted run record");
        Ok(number)
    }

    fn record_stop_time(&self, number: u64) -> AppResult<()> {
        let end = self.clock.now();
        let mut inner = self.inner.lock();
        let run = inner
            .runs
            .get_mut(&number)
            .ok_or(DispatcherError::RunNotFound(number))?;
        run.end = Some(end);
        Ok(())
    }

    fn send_command(&self, request: CommandRequest) -> AppResult<()> {
        let mut inner = self.inner.lock();
        if inner.fail_sends {
            return Err(DispatcherError::Store(format!(
                "command bus unavailable, dropped {} for {}",
                request.kind, request.detector
            )));
        }
        if let Some(host) = request.hosts.iter().find(|h| inner.unreachable.contains(*h)) {
            return Err(DispatcherError::Store(format!(
                "host {} unreachable, dropped {} for {}",
                host, request.kind, request.detector
            )));
        }
        inner.commands.push(request);
        Ok(())
    }

    fn report_anomaly(&self, anomaly: &Anomaly) -> AppResult<()> {
        self.inner.lock().anomalies.push(anomaly.clone());
        Ok(())
    }

    fn next_run_number(&self) -> AppResult<u64> {
        Ok(self.inner.lock().next_run)
    }

    fn run_start_time(&self, number: u64) -> AppResult<DateTime<Utc>> {
        self.inner
            .lock()
            .runs
            .get(&number)
            .map(|run| run.start)
            .ok_or(DispatcherError::RunNotFound(number))
    }
}

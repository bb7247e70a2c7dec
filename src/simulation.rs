//! Simulated detectors for running the dispatcher without hardware.
//!
//! `SimulatedDaq` keeps one [`NodeReport`] per configured host and moves it
//! the way a real readout node would when a command recorded by the
//! [`MemoryControlStore`] names it: an arm shows up as `Arming` and completes
//! to `Armed` on the following poll, a start runs the newest run of the
//! commanded detector, and a stop returns the node to `Idle`. Detector status
//! is folded from the node reports with [`aggregate_status`], so a partially
//! commanded or silent detector looks exactly as it would in production.

use crate::clock::Clock;
use crate::command::{CommandKind, CommandRequest};
use crate::config::DispatcherConfig;
use crate::dispatcher::StatusSource;
use crate::error::AppResult;
use crate::status::{aggregate_status, DaqStatus, NodeReport, StatusSnapshot};
use crate::store::MemoryControlStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Detector readout simulated on top of a [`MemoryControlStore`].
pub struct SimulatedDaq {
    store: MemoryControlStore,
    clock: Arc<dyn Clock>,
    client_timeout: Duration,
    /// (detector, hosts it owns), primary first
    detectors: Vec<(String, Vec<String>)>,
    nodes: HashMap<String, NodeReport>,
    silent: HashSet<String>,
    seen: usize,
}

impl SimulatedDaq {
    /// Every node of every configured detector starts idle.
    pub fn new(config: &DispatcherConfig, store: MemoryControlStore, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let mut detectors = Vec::new();
        let mut nodes = HashMap::new();
        for name in config.detectors.names() {
            let hosts: Vec<String> = config
                .detectors
                .nodes
                .get(name)
                .map(|targets| targets.readers.iter().chain(&targets.controller).cloned().collect())
                .unwrap_or_default();
            for host in &hosts {
                nodes.insert(
                    host.clone(),
                    NodeReport {
                        host: host.clone(),
                        status: DaqStatus::Idle,
                        run_number: None,
                        time: now,
                    },
                );
            }
            detectors.push((name.to_string(), hosts));
        }

        Self {
            store,
            clock,
            client_timeout: config.client_timeout(),
            detectors,
            nodes,
            silent: HashSet::new(),
            seen: 0,
        }
    }

    /// Force every node of `detector` into `status`, e.g. to inject a fault.
    pub fn set_status(&mut self, detector: &str, status: DaqStatus) {
        let Some((_, hosts)) = self.detectors.iter().find(|(name, _)| name == detector) else {
            return;
        };
        for host in hosts {
            if let Some(node) = self.nodes.get_mut(host) {
                node.status = status;
            }
        }
    }

    /// Stop `host` from reporting; its last report goes stale.
    pub fn silence(&mut self, host: &str) {
        self.silent.insert(host.to_string());
    }

    fn apply(&mut self, command: &CommandRequest) {
        let run = match command.kind {
            CommandKind::Start => self.store.latest_run(&command.detector).map(|run| run.number),
            CommandKind::Arm | CommandKind::Stop => None,
        };

        for host in &command.hosts {
            let Some(node) = self.nodes.get_mut(host) else {
                continue;
            };
            match command.kind {
                CommandKind::Arm => node.status = DaqStatus::Arming,
                CommandKind::Start => {
                    node.status = DaqStatus::Running;
                    node.run_number = run.or(node.run_number);
                }
                CommandKind::Stop => node.status = DaqStatus::Idle,
            }
            debug!("Simulated node {} is now {}", host, node.status);
        }
    }
}

impl StatusSource for SimulatedDaq {
    fn latest_status(&mut self) -> AppResult<StatusSnapshot> {
        let now = self.clock.now();
        for node in self.nodes.values_mut() {
            if node.status == DaqStatus::Arming {
                node.status = DaqStatus::Armed;
            }
        }

        let commands = self.store.commands_since(self.seen);
        self.seen += commands.len();
        for command in &commands {
            self.apply(command);
        }

        for node in self.nodes.values_mut() {
            if !self.silent.contains(&node.host) {
                node.time = now;
            }
        }

        let mut snapshot = StatusSnapshot::new();
        for (name, hosts) in &self.detectors {
            let reports: Vec<NodeReport> = hosts
                .iter()
                .filter_map(|host| self.nodes.get(host).cloned())
                .collect();
            snapshot.insert(name, aggregate_status(&reports, now, self.client_timeout));
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::command::NodeTargets;
    use crate::config::DetectorsConfig;
    use crate::goal::AuxLink;
    use crate::store::ControlStore;
    use chrono::{TimeZone, Utc};

    fn request(kind: CommandKind, hosts: &[&str], detector: &str) -> CommandRequest {
        CommandRequest {
            kind,
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            user: "shifter".to_string(),
            detector: detector.to_string(),
            mode: "background".to_string(),
            delay: Duration::ZERO,
        }
    }

    fn simulation() -> (SimulatedDaq, MemoryControlStore, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        let detectors = DetectorsConfig::primary("tpc")
            .with_aux(AuxLink::MuonVeto, "muon_veto")
            .with_nodes(
                "tpc",
                NodeTargets {
                    readers: vec!["reader0".into(), "reader1".into()],
                    controller: vec!["cc0".into()],
                },
            )
            .with_nodes(
                "muon_veto",
                NodeTargets {
                    readers: vec!["reader5".into()],
                    controller: vec![],
                },
            );
        let config = DispatcherConfig::new(detectors);
        let store = MemoryControlStore::from_config(&config, Arc::new(clock.clone()));
        let sim = SimulatedDaq::new(&config, store.clone(), Arc::new(clock.clone()));
        (sim, store, clock)
    }

    #[test]
    fn test_arm_completes_on_next_poll() {
        let (mut sim, store, _) = simulation();

        store
            .send_command(request(CommandKind::Arm, &["cc0", "reader0", "reader1", "reader5"], "tpc"))
            .unwrap();
        let first = sim.latest_status().unwrap();
        assert_eq!(first.status_of("tpc"), DaqStatus::Arming);
        assert_eq!(first.status_of("muon_veto"), DaqStatus::Arming);

        let second = sim.latest_status().unwrap();
        assert_eq!(second.status_of("tpc"), DaqStatus::Armed);

        store
            .send_command(request(CommandKind::Stop, &["reader5"], "muon_veto"))
            .unwrap();
        let third = sim.latest_status().unwrap();
        assert_eq!(third.status_of("tpc"), DaqStatus::Armed);
        assert_eq!(third.status_of("muon_veto"), DaqStatus::Idle);
    }

    #[test]
    fn test_partial_command_reads_unknown() {
        let (mut sim, store, _) = simulation();

        // The controller node never got the arm.
        store
            .send_command(request(CommandKind::Arm, &["reader0", "reader1"], "tpc"))
            .unwrap();
        assert_eq!(sim.latest_status().unwrap().status_of("tpc"), DaqStatus::Unknown);
    }

    #[test]
    fn test_silent_node_times_out() {
        let (mut sim, _, clock) = simulation();
        sim.silence("reader1");

        clock.advance_secs(30);
        assert_eq!(sim.latest_status().unwrap().status_of("tpc"), DaqStatus::Idle);

        clock.advance_secs(1);
        let status = sim.latest_status().unwrap();
        assert_eq!(status.status_of("tpc"), DaqStatus::Timeout);
        assert_eq!(status.status_of("muon_veto"), DaqStatus::Idle);
    }

    #[test]
    fn test_start_reports_run_number() {
        let (mut sim, store, _) = simulation();
        store.insert_run(5, "tpc", Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        sim.set_status("tpc", DaqStatus::Armed);

        store
            .send_command(request(CommandKind::Start, &["cc0", "reader0", "reader1"], "tpc"))
            .unwrap();
        let status = sim.latest_status().unwrap();
        assert_eq!(status.status_of("tpc"), DaqStatus::Running);
        assert_eq!(status.run_number("tpc"), Some(5));
    }
}

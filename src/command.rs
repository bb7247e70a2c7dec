//! Command vocabulary shared by the engine and the control store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Kind of command the dispatcher can issue to a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// Prepare the readout for a run.
    Arm,
    /// Begin data taking.
    Start,
    /// End data taking and return to idle.
    Stop,
}

impl CommandKind {
    /// All kinds in issue order.
    pub const ALL: [CommandKind; 3] = [CommandKind::Arm, CommandKind::Start, CommandKind::Stop];

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Arm => "arm",
            CommandKind::Start => "start",
            CommandKind::Stop => "stop",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-kind command timeouts.
///
/// The same duration is both the debounce window (no repeat before it
/// elapses) and the grace period (not overdue before it elapses).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTimeouts {
    /// Grace period for an arm.
    pub arm: Duration,
    /// Grace period for a start.
    pub start: Duration,
    /// Base grace period for a stop, before escalation.
    pub stop: Duration,
}

impl CommandTimeouts {
    /// Timeout for `kind`.
    pub fn get(&self, kind: CommandKind) -> Duration {
        match kind {
            CommandKind::Arm => self.arm,
            CommandKind::Start => self.start,
            CommandKind::Stop => self.stop,
        }
    }
}

/// Hosts a command is delivered to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTargets {
    /// Readout nodes.
    #[serde(default)]
    pub readers: Vec<String>,
    /// Crate controller (cc) nodes.
    #[serde(default)]
    pub controller: Vec<String>,
}

impl NodeTargets {
    /// Append another node set, skipping hosts already present.
    pub fn extend(&mut self, other: &NodeTargets) {
        for host in &other.readers {
            if !self.readers.contains(host) {
                self.readers.push(host.clone());
            }
        }
        for host in &other.controller {
            if !self.controller.contains(host) {
                self.controller.push(host.clone());
            }
        }
    }
}

/// One command submission to the command transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// What to do.
    pub kind: CommandKind,
    /// Nodes that act on the command.
    pub hosts: Vec<String>,
    /// Operator the command is issued for.
    pub user: String,
    /// Detector the command belongs to.
    pub detector: String,
    /// Operating mode from the goal.
    pub mode: String,
    /// Delay the receiving nodes apply before acting.
    pub delay: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_deduplicates_hosts() {
        let mut tpc = NodeTargets {
            readers: vec!["reader0".into(), "reader1".into()],
            controller: vec!["cc0".into()],
        };
        tpc.extend(&NodeTargets {
            readers: vec!["reader1".into(), "reader5".into()],
            controller: vec!["cc0".into()],
        });
        assert_eq!(tpc.readers, vec!["reader0", "reader1", "reader5"]);
        assert_eq!(tpc.controller, vec!["cc0"]);
    }
}

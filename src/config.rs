//! Dispatcher configuration using Figment.
//!
//! Configuration is loaded from (in order of precedence):
//! 1. Environment variables prefixed with `DISPATCHER_` (nested keys separated
//!    by a double underscore)
//! 2. TOML configuration file (default: `config/dispatcher.toml`)
//!
//! # Example
//!
//! ```no_run
//! use daq_dispatcher::config::DispatcherConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DispatcherConfig::load()?;
//!     println!("Primary detector: {}", config.detectors.primary);
//!     println!("Stop retries: {}", config.dispatcher.stop_retries);
//!     Ok(())
//! }
//! ```
//!
//! # Environment Variables
//!
//! ```text
//! DISPATCHER_DISPATCHER__LOG_LEVEL=debug
//! DISPATCHER_TIMEOUTS__STOP_SECS=120
//! ```

use crate::command::{CommandTimeouts, NodeTargets};
use crate::error::{AppResult, DispatcherError};
use crate::goal::{AuxLink, GoalSnapshot, GoalState};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/dispatcher.toml";

/// Top-level dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Control loop settings
    #[serde(default)]
    pub dispatcher: DispatcherSettings,
    /// Per-command timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Detector topology and node tables
    pub detectors: DetectorsConfig,
    /// Node tables per run mode
    #[serde(default)]
    pub modes: HashMap<String, NodeTargets>,
    /// Static goal, used when no operator goal feed is attached
    #[serde(default)]
    pub goal: HashMap<String, GoalState>,
}

/// Control loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSettings {
    /// Seconds between reconciliation cycles
    #[serde(default = "default_poll_frequency")]
    pub poll_frequency_secs: u64,
    /// Seconds after which a silent node counts as timed out
    #[serde(default = "default_client_timeout")]
    pub client_timeout_secs: u64,
    /// Stop retries before an unresolved stop is reported as fatal
    #[serde(default = "default_stop_retries")]
    pub stop_retries: u32,
    /// Delay readout nodes apply to a stop so the controller stops first
    #[serde(default = "default_stop_propagation_delay")]
    pub stop_propagation_delay_secs: u64,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Command timeouts in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Arm timeout
    #[serde(default = "default_command_timeout")]
    pub arm_secs: u64,
    /// Start timeout
    #[serde(default = "default_command_timeout")]
    pub start_secs: u64,
    /// Base stop timeout, scaled up on each retry
    #[serde(default = "default_command_timeout")]
    pub stop_secs: u64,
}

/// Detector topology: one primary and up to two auxiliaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorsConfig {
    /// Primary detector name
    pub primary: String,
    /// Muon veto detector name
    #[serde(default)]
    pub muon_veto: Option<String>,
    /// Neutron veto detector name
    #[serde(default)]
    pub neutron_veto: Option<String>,
    /// Nodes owned by each detector
    #[serde(default)]
    pub nodes: HashMap<String, NodeTargets>,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_poll_frequency() -> u64 {
    10
}

fn default_client_timeout() -> u64 {
    30
}

fn default_stop_retries() -> u32 {
    3
}

fn default_stop_propagation_delay() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_command_timeout() -> u64 {
    60
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            poll_frequency_secs: default_poll_frequency(),
            client_timeout_secs: default_client_timeout(),
            stop_retries: default_stop_retries(),
            stop_propagation_delay_secs: default_stop_propagation_delay(),
            log_level: default_log_level(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            arm_secs: default_command_timeout(),
            start_secs: default_command_timeout(),
            stop_secs: default_command_timeout(),
        }
    }
}

impl DetectorsConfig {
    /// Topology with a primary only.
    pub fn primary(name: &str) -> Self {
        Self {
            primary: name.to_string(),
            muon_veto: None,
            neutron_veto: None,
            nodes: HashMap::new(),
        }
    }

    /// Name the auxiliary detector in the `link` slot.
    pub fn with_aux(mut self, link: AuxLink, name: &str) -> Self {
        match link {
            AuxLink::MuonVeto => self.muon_veto = Some(name.to_string()),
            AuxLink::NeutronVeto => self.neutron_veto = Some(name.to_string()),
        }
        self
    }

    /// Set the nodes owned by `detector`.
    pub fn with_nodes(mut self, detector: &str, nodes: NodeTargets) -> Self {
        self.nodes.insert(detector.to_string(), nodes);
        self
    }

    /// Configured auxiliaries with their link slot.
    pub fn auxiliaries(&self) -> Vec<(AuxLink, &str)> {
        let mut aux = Vec::with_capacity(2);
        if let Some(name) = &self.muon_veto {
            aux.push((AuxLink::MuonVeto, name.as_str()));
        }
        if let Some(name) = &self.neutron_veto {
            aux.push((AuxLink::NeutronVeto, name.as_str()));
        }
        aux
    }

    /// Detector configured in `link`'s slot.
    pub fn aux_name(&self, link: AuxLink) -> Option<&str> {
        match link {
            AuxLink::MuonVeto => self.muon_veto.as_deref(),
            AuxLink::NeutronVeto => self.neutron_veto.as_deref(),
        }
    }

    /// All detector names, primary first.
    pub fn names(&self) -> Vec<&str> {
        let mut names = vec![self.primary.as_str()];
        names.extend(self.auxiliaries().into_iter().map(|(_, name)| name));
        names
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl DispatcherConfig {
    /// Configuration with default settings for the given topology.
    pub fn new(detectors: DetectorsConfig) -> Self {
        Self {
            dispatcher: DispatcherSettings::default(),
            timeouts: TimeoutConfig::default(),
            detectors,
            modes: HashMap::new(),
            goal: HashMap::new(),
        }
    }

    /// Load configuration from the default location and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path, then validate it.
    ///
    /// # Errors
    ///
    /// Returns a `DispatcherError` if the file cannot be parsed into the
    /// configuration structs or if validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DISPATCHER_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Poll frequency and every command timeout are non-zero
    /// - Detector names are non-empty and unique
    /// - Every detector has a node table
    /// - Node tables and goals only name configured detectors
    /// - Goals only name configured modes (when modes are configured)
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.dispatcher.log_level.as_str()) {
            return Err(DispatcherError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.dispatcher.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.dispatcher.poll_frequency_secs == 0 {
            return Err(DispatcherError::Configuration(
                "poll_frequency_secs must be > 0".to_string(),
            ));
        }

        for (kind, secs) in [
            ("arm", self.timeouts.arm_secs),
            ("start", self.timeouts.start_secs),
            ("stop", self.timeouts.stop_secs),
        ] {
            if secs == 0 {
                return Err(DispatcherError::Configuration(format!(
                    "Invalid {kind} timeout: must be > 0 seconds"
                )));
            }
        }

        let names = self.detectors.names();
        let mut seen = HashSet::new();
        for name in &names {
            if name.trim().is_empty() {
                return Err(DispatcherError::Configuration(
                    "Detector names cannot be empty".to_string(),
                ));
            }
            if !seen.insert(*name) {
                return Err(DispatcherError::Configuration(format!(
                    "Duplicate detector name: '{name}'"
                )));
            }
        }

        for name in &names {
            if !self.detectors.nodes.contains_key(*name) {
                return Err(DispatcherError::Configuration(format!(
                    "Detector '{name}' has no node table"
                )));
            }
        }

        for detector in self.detectors.nodes.keys() {
            if !seen.contains(detector.as_str()) {
                return Err(DispatcherError::Configuration(format!(
                    "Node table for unknown detector '{detector}'"
                )));
            }
        }

        for (detector, goal) in &self.goal {
            if !seen.contains(detector.as_str()) {
                return Err(DispatcherError::Configuration(format!(
                    "Goal for unknown detector '{detector}'"
                )));
            }
            if !self.modes.is_empty() && !self.modes.contains_key(&goal.mode) {
                return Err(DispatcherError::Configuration(format!(
                    "Goal for '{detector}' uses unknown mode '{}'",
                    goal.mode
                )));
            }
        }

        Ok(())
    }

    /// Every configured detector name, primary first.
    pub fn detector_names(&self) -> Vec<String> {
        self.detectors.names().into_iter().map(str::to_string).collect()
    }

    /// Timeouts as durations.
    pub fn command_timeouts(&self) -> CommandTimeouts {
        CommandTimeouts {
            arm: Duration::from_secs(self.timeouts.arm_secs),
            start: Duration::from_secs(self.timeouts.start_secs),
            stop: Duration::from_secs(self.timeouts.stop_secs),
        }
    }

    /// Time between reconciliation cycles.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.dispatcher.poll_frequency_secs)
    }

    /// Silence after which a node counts as timed out.
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatcher.client_timeout_secs)
    }

    /// Delay readout nodes apply to a stop.
    pub fn stop_propagation_delay(&self) -> Duration {
        Duration::from_secs(self.dispatcher.stop_propagation_delay_secs)
    }

    /// The configured static goal as a snapshot.
    pub fn static_goal(&self) -> GoalSnapshot {
        GoalSnapshot::from(self.goal.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn three_detectors() -> DispatcherConfig {
        DispatcherConfig::new(
            DetectorsConfig::primary("tpc")
                .with_aux(AuxLink::MuonVeto, "muon_veto")
                .with_aux(AuxLink::NeutronVeto, "neutron_veto")
                .with_nodes("tpc", NodeTargets::default())
                .with_nodes("muon_veto", NodeTargets::default())
                .with_nodes("neutron_veto", NodeTargets::default()),
        )
    }

    const SAMPLE: &str = r#"
[dispatcher]
poll_frequency_secs = 5
stop_retries = 2

[timeouts]
arm_secs = 45
start_secs = 30
stop_secs = 20

[detectors]
primary = "tpc"
muon_veto = "muon_veto"

[detectors.nodes.tpc]
readers = ["reader0", "reader1"]
controller = ["cc0"]

[detectors.nodes.muon_veto]
readers = ["reader5"]

[modes.background]
readers = ["reader0", "reader1"]
controller = ["cc0"]

[goal.tpc]
active = "true"
mode = "background"
user = "shifter"
stop_after = 60
link_mv = false
"#;

    #[test]
    fn test_config_validation_valid() {
        assert!(three_detectors().validate().is_ok());
        assert_eq!(
            three_detectors().detector_names(),
            vec!["tpc", "muon_veto", "neutron_veto"]
        );
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = three_detectors();
        config.dispatcher.log_level = "loud".to_string();
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("Invalid log_level"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = three_detectors();
        config.timeouts.stop_secs = 0;
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("stop timeout"));
    }

    #[test]
    fn test_duplicate_detector_names() {
        let config = DispatcherConfig::new(
            DetectorsConfig::primary("tpc").with_aux(AuxLink::MuonVeto, "tpc"),
        );
        let result = config.validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Duplicate detector name"));
    }

    #[test]
    fn test_detector_without_nodes() {
        let mut config = three_detectors();
        config.detectors.nodes.remove("muon_veto");
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("no node table"));
    }

    #[test]
    fn test_goal_with_unknown_mode() {
        let mut config = three_detectors();
        config
            .modes
            .insert("background".to_string(), NodeTargets::default());
        config
            .goal
            .insert("tpc".to_string(), GoalState::active("led", "shifter"));
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("unknown mode"));
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = DispatcherConfig::load_from(file.path()).unwrap();
        assert_eq!(config.dispatcher.poll_frequency_secs, 5);
        assert_eq!(config.dispatcher.stop_retries, 2);
        assert_eq!(config.dispatcher.client_timeout_secs, 30);
        assert_eq!(config.command_timeouts().arm, Duration::from_secs(45));
        assert_eq!(config.detector_names(), vec!["tpc", "muon_veto"]);
        assert_eq!(config.detectors.nodes["tpc"].controller, vec!["cc0"]);

        let goal = config.static_goal();
        let tpc = goal.get("tpc").unwrap();
        assert!(tpc.active);
        assert_eq!(tpc.stop_after, Some(60));
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        std::env::set_var("DISPATCHER_TIMEOUTS__STOP_SECS", "120");
        let config = DispatcherConfig::load_from(file.path());
        std::env::remove_var("DISPATCHER_TIMEOUTS__STOP_SECS");

        assert_eq!(config.unwrap().timeouts.stop_secs, 120);
    }
}

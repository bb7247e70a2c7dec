//! Reconciliation engine for a multi-detector DAQ dispatcher.
//!
//! The dispatcher compares the latest observed status of each detector with
//! the operator-declared goal and, once per control cycle, issues the arm,
//! start and stop commands that move reality towards that goal. One primary
//! detector and up to two auxiliary vetoes are supported; an auxiliary can be
//! linked to the primary to move in lock-step with it.
//!
//! - [`controller`]: the reconciliation engine itself
//! - [`store`]: the boundary to the command bus and run database
//! - [`dispatcher`]: the fixed-interval polling loop
//! - [`simulation`]: simulated detectors for running without hardware

pub mod anomaly;
pub mod clock;
pub mod command;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod goal;
pub mod simulation;
pub mod status;
pub mod store;

pub use anomaly::{Anomaly, AnomalyCode, Severity};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{CommandKind, CommandRequest, CommandTimeouts, NodeTargets};
pub use config::DispatcherConfig;
pub use controller::DaqController;
pub use error::{AppResult, DispatcherError};
pub use goal::{AuxLink, GoalSnapshot, GoalState};
pub use status::{DaqStatus, DetectorStatus, StatusSnapshot};
pub use store::{ControlStore, MemoryControlStore};

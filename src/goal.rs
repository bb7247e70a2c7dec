//! Operator-declared goal state.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Auxiliary detector slot that can be slaved to the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuxLink {
    /// Muon veto, linked through `link_mv`.
    MuonVeto,
    /// Neutron veto, linked through `link_nv`.
    NeutronVeto,
}

/// Goal for one detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalState {
    /// Should this detector be taking data.
    #[serde(deserialize_with = "deserialize_flag")]
    pub active: bool,
    /// Named run configuration.
    pub mode: String,
    /// Attribution for issued commands.
    pub user: String,
    /// Run length in minutes before the run is cycled. `None` runs indefinitely.
    #[serde(default)]
    pub stop_after: Option<u32>,
    /// Muon veto slaved to this detector (primary only).
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub link_mv: bool,
    /// Neutron veto slaved to this detector (primary only).
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub link_nv: bool,
}

impl GoalState {
    /// Active goal in `mode`, no turnover, nothing linked.
    pub fn active(mode: &str, user: &str) -> Self {
        Self {
            active: true,
            mode: mode.to_string(),
            user: user.to_string(),
            stop_after: None,
            link_mv: false,
            link_nv: false,
        }
    }

    /// Inactive goal in `mode`.
    pub fn inactive(mode: &str, user: &str) -> Self {
        Self {
            active: false,
            ..Self::active(mode, user)
        }
    }

    /// Cycle the run every `minutes`.
    pub fn with_stop_after(mut self, minutes: u32) -> Self {
        self.stop_after = Some(minutes);
        self
    }

    /// Slave `link` to this detector.
    pub fn with_link(mut self, link: AuxLink) -> Self {
        match link {
            AuxLink::MuonVeto => self.link_mv = true,
            AuxLink::NeutronVeto => self.link_nv = true,
        }
        self
    }

    /// Whether `link` is slaved to this detector.
    pub fn is_linked(&self, link: AuxLink) -> bool {
        match link {
            AuxLink::MuonVeto => self.link_mv,
            AuxLink::NeutronVeto => self.link_nv,
        }
    }
}

/// Goals of every detector for one cycle, keyed by detector name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GoalSnapshot {
    detectors: HashMap<String, GoalState>,
}

impl GoalSnapshot {
    /// Snapshot with no goals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`GoalSnapshot::insert`].
    pub fn with(mut self, detector: &str, goal: GoalState) -> Self {
        self.insert(detector, goal);
        self
    }

    /// Set the goal of `detector`, replacing any previous one.
    pub fn insert(&mut self, detector: &str, goal: GoalState) {
        self.detectors.insert(detector.to_string(), goal);
    }

    /// Goal of `detector`, if declared.
    pub fn get(&self, detector: &str) -> Option<&GoalState> {
        self.detectors.get(detector)
    }

    /// Goals in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &GoalState)> {
        self.detectors.iter().map(|(name, goal)| (name.as_str(), goal))
    }
}

impl From<HashMap<String, GoalState>> for GoalSnapshot {
    fn from(detectors: HashMap<String, GoalState>) -> Self {
        Self { detectors }
    }
}

/// Accept both real booleans and the `"true"`/`"false"` strings written by
/// textual goal feeds.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected 'true' or 'false', got '{other}'"
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_textual_flags_are_accepted() {
        let goal: GoalState = serde_json::from_str(
            r#"{"active": "true", "mode": "background", "user": "shifter",
                "link_mv": "false", "link_nv": true, "stop_after": 60}"#,
        )
        .unwrap();
        assert!(goal.active);
        assert!(!goal.link_mv);
        assert!(goal.link_nv);
        assert_eq!(goal.stop_after, Some(60));
    }

    #[test]
    fn test_invalid_flag_is_rejected() {
        let result: Result<GoalState, _> =
            serde_json::from_str(r#"{"active": "yes", "mode": "m", "user": "u"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_link_builder() {
        let goal = GoalState::active("combined", "shifter").with_link(AuxLink::NeutronVeto);
        assert!(goal.is_linked(AuxLink::NeutronVeto));
        assert!(!goal.is_linked(AuxLink::MuonVeto));
    }
}

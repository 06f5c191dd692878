//! Feature gating via named field trials.
//!
//! A field trial maps a name to a group string; a trial is enabled when its
//! group is exactly `"Enabled"`. The adapter consults the trial surface once
//! at construction time.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Trial gating zero-hertz screenshare cadence.
pub const ZERO_HERTZ_SCREENSHARE_TRIAL: &str = "WebRTC-ZeroHertzScreenshare";

/// Read-only view over the configured field trials.
pub trait FieldTrials: Send + Sync {
    /// True if `name` resolves to the `"Enabled"` group.
    fn is_enabled(&self, name: &str) -> bool;
}

/// Map-backed [`FieldTrials`] implementation.
///
/// Hosts typically deserialize this from their configuration file alongside
/// the rest of their settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldTrialMap {
    groups: HashMap<String, String>,
}

impl FieldTrialMap {
    /// An empty trial set; every lookup reports disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `name` to a group.
    pub fn set(&mut self, name: impl Into<String>, group: impl Into<String>) {
        self.groups.insert(name.into(), group.into());
    }

    /// Assign `name` to the `"Enabled"` group.
    pub fn enable(&mut self, name: impl Into<String>) {
        self.set(name, "Enabled");
    }

    /// The group `name` resolves to, if any.
    pub fn group(&self, name: &str) -> Option<&str> {
        self.groups.get(name).map(String::as_str)
    }
}

impl FieldTrials for FieldTrialMap {
    fn is_enabled(&self, name: &str) -> bool {
        self.group(name) == Some("Enabled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_trial_is_disabled() {
        let trials = FieldTrialMap::new();
        assert!(!trials.is_enabled(ZERO_HERTZ_SCREENSHARE_TRIAL));
    }

    #[test]
    fn test_enabled_trial() {
        let mut trials = FieldTrialMap::new();
        trials.enable(ZERO_HERTZ_SCREENSHARE_TRIAL);
        assert!(trials.is_enabled(ZERO_HERTZ_SCREENSHARE_TRIAL));
    }

    #[test]
    fn test_other_group_is_disabled() {
        let mut trials = FieldTrialMap::new();
        trials.set(ZERO_HERTZ_SCREENSHARE_TRIAL, "Disabled");
        assert!(!trials.is_enabled(ZERO_HERTZ_SCREENSHARE_TRIAL));
        trials.set(ZERO_HERTZ_SCREENSHARE_TRIAL, "Control");
        assert!(!trials.is_enabled(ZERO_HERTZ_SCREENSHARE_TRIAL));
    }
}

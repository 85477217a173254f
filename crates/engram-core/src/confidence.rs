use crate::config::StateConfig;
use crate::constants::{ACTIVE_MULTIPLIER, READY_MULTIPLIER, SILENT_MULTIPLIER};
use crate::entry::{ConfidenceState, Entry};
use crate::error::ConfigError;

/// Maps a score (and the critical flag) to a [`ConfidenceState`].
#[derive(Clone, Debug)]
pub struct ConfidenceClassifier {
    active_threshold: f64,
    ready_threshold: f64,
}

impl Default for ConfidenceClassifier {
    fn default() -> Self {
        let defaults = StateConfig::default();
        Self {
            active_threshold: defaults.active_threshold,
            ready_threshold: defaults.ready_threshold,
        }
    }
}

impl ConfidenceClassifier {
    pub fn new(config: &StateConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            active_threshold: config.active_threshold,
            ready_threshold: config.ready_threshold,
        })
    }

    pub fn classify(&self, score: f64, critical: bool) -> ConfidenceState {
        if critical || score >= self.active_threshold {
            ConfidenceState::Active
        } else if score >= self.ready_threshold {
            ConfidenceState::Ready
        } else {
            ConfidenceState::Silent
        }
    }

    /// Copy of `entry` with its state recomputed from its current score.
    pub fn classify_entry(&self, entry: &Entry) -> Entry {
        entry
            .clone()
            .with_state(self.classify(entry.score, entry.critical))
    }
}

/// Priority multiplier used by the budget pruner.
pub fn state_multiplier(state: ConfidenceState, critical: bool) -> f64 {
    if critical {
        return ACTIVE_MULTIPLIER;
    }
    match state {
        ConfidenceState::Active => ACTIVE_MULTIPLIER,
        ConfidenceState::Ready => READY_MULTIPLIER,
        ConfidenceState::Silent => SILENT_MULTIPLIER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let c = ConfidenceClassifier::default();
        assert_eq!(c.classify(0.7, false), ConfidenceState::Active);
        assert_eq!(c.classify(0.69, false), ConfidenceState::Ready);
        assert_eq!(c.classify(0.3, false), ConfidenceState::Ready);
        assert_eq!(c.classify(0.29, false), ConfidenceState::Silent);
        assert_eq!(c.classify(0.0, false), ConfidenceState::Silent);
    }

    #[test]
    fn test_critical_always_active() {
        let c = ConfidenceClassifier::default();
        for score in [0.0, 0.1, 0.5, 1.0] {
            assert_eq!(c.classify(score, true), ConfidenceState::Active);
        }
    }

    #[test]
    fn test_custom_thresholds() {
        let c = ConfidenceClassifier::new(&StateConfig {
            active_threshold: 0.9,
            ready_threshold: 0.5,
        })
        .unwrap();
        assert_eq!(c.classify(0.8, false), ConfidenceState::Ready);
        assert_eq!(c.classify(0.4, false), ConfidenceState::Silent);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let bad = StateConfig {
            active_threshold: 0.2,
            ready_threshold: 0.5,
        };
        assert!(ConfidenceClassifier::new(&bad).is_err());
    }

    #[test]
    fn test_classify_entry() {
        let c = ConfidenceClassifier::default();
        let e = Entry::new("x", 0).with_score(0.4);
        assert_eq!(c.classify_entry(&e).state, ConfidenceState::Ready);
    }

    #[test]
    fn test_multipliers() {
        assert_eq!(state_multiplier(ConfidenceState::Active, false), 2.0);
        assert_eq!(state_multiplier(ConfidenceState::Ready, false), 1.0);
        assert_eq!(state_multiplier(ConfidenceState::Silent, false), 0.5);
        assert_eq!(state_multiplier(ConfidenceState::Silent, true), 2.0);
    }
}

//! Context budget monitor: classify usage into an action tier.
//!
//! The monitor is a pure function of `(current_tokens, max_tokens)` — it
//! never mutates [`ContextState`] and holds no state of its own. The
//! coordinator evaluates it after every token-consuming event and executes
//! whatever tier comes back.

use serde::{Deserialize, Serialize};

/// Per-workflow token accounting.
///
/// `current_tokens` may transiently exceed `max_tokens` (an oversized
/// handoff landed before compaction could run); values above 100% always
/// classify as [`BudgetAction::EmergencyCompact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextState {
    pub current_tokens: u64,
    pub max_tokens: u64,
}

impl ContextState {
    /// Create a fresh state with zero usage. `max_tokens` must be positive.
    pub fn new(max_tokens: u64) -> Self {
        debug_assert!(max_tokens > 0, "max_tokens must be positive");
        Self {
            current_tokens: 0,
            max_tokens,
        }
    }

    /// Usage as a percentage of the ceiling (may exceed 100.0).
    pub fn usage_pct(&self) -> f64 {
        if self.max_tokens == 0 {
            return 100.0;
        }
        (self.current_tokens as f64 / self.max_tokens as f64) * 100.0
    }

    /// Account for newly consumed tokens.
    pub fn add_tokens(&mut self, tokens: u64) {
        self.current_tokens = self.current_tokens.saturating_add(tokens);
    }

    /// Reset usage to a post-compaction value.
    pub fn set_tokens(&mut self, tokens: u64) {
        self.current_tokens = tokens;
    }

    /// Short log-friendly rendering.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: {} / {} tokens ({:.1}%)",
            self.current_tokens,
            self.max_tokens,
            self.usage_pct()
        )
    }
}

/// Tier thresholds, in percent of the ceiling. Configuration, not constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetThresholds {
    /// Advisory tier: recorded as an event, non-blocking.
    pub warn_pct: f64,
    /// Synchronous compaction tier.
    pub compact_pct: f64,
    /// Emergency tier: compaction that skips optional preservation work.
    pub emergency_pct: f64,
}

impl Default for BudgetThresholds {
    fn default() -> Self {
        Self {
            warn_pct: 70.0,
            compact_pct: 80.0,
            emergency_pct: 95.0,
        }
    }
}

/// Action tier the coordinator must take for the current usage level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetAction {
    None,
    Warn,
    Compact,
    EmergencyCompact,
}

impl BudgetAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetAction::None => "none",
            BudgetAction::Warn => "warn",
            BudgetAction::Compact => "compact",
            BudgetAction::EmergencyCompact => "emergency_compact",
        }
    }
}

impl std::fmt::Display for BudgetAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a context state into its action tier.
pub fn classify(state: &ContextState, thresholds: &BudgetThresholds) -> BudgetAction {
    let pct = state.usage_pct();
    if pct >= thresholds.emergency_pct {
        BudgetAction::EmergencyCompact
    } else if pct >= thresholds.compact_pct {
        BudgetAction::Compact
    } else if pct >= thresholds.warn_pct {
        BudgetAction::Warn
    } else {
        BudgetAction::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(current: u64, max: u64) -> ContextState {
        ContextState {
            current_tokens: current,
            max_tokens: max,
        }
    }

    #[test]
    fn half_usage_classifies_none() {
        let s = state(100_000, 200_000);
        assert_eq!(s.usage_pct(), 50.0);
        assert_eq!(classify(&s, &BudgetThresholds::default()), BudgetAction::None);
    }

    #[test]
    fn warning_zone() {
        let s = state(150_000, 200_000);
        assert_eq!(s.usage_pct(), 75.0);
        assert_eq!(classify(&s, &BudgetThresholds::default()), BudgetAction::Warn);
    }

    #[test]
    fn compaction_zone() {
        let s = state(170_000, 200_000);
        assert_eq!(s.usage_pct(), 85.0);
        assert_eq!(
            classify(&s, &BudgetThresholds::default()),
            BudgetAction::Compact
        );
    }

    #[test]
    fn emergency_zone() {
        let s = state(192_000, 200_000);
        assert_eq!(s.usage_pct(), 96.0);
        assert_eq!(
            classify(&s, &BudgetThresholds::default()),
            BudgetAction::EmergencyCompact
        );

        // 99% is still emergency, not a distinct tier.
        let s = state(198_000, 200_000);
        assert_eq!(
            classify(&s, &BudgetThresholds::default()),
            BudgetAction::EmergencyCompact
        );
    }

    #[test]
    fn over_ceiling_is_emergency() {
        let s = state(210_000, 200_000);
        assert!(s.usage_pct() > 100.0);
        assert_eq!(
            classify(&s, &BudgetThresholds::default()),
            BudgetAction::EmergencyCompact
        );
    }

    #[test]
    fn boundaries_are_inclusive_lower() {
        let thresholds = BudgetThresholds::default();
        assert_eq!(classify(&state(140_000, 200_000), &thresholds), BudgetAction::Warn);
        assert_eq!(
            classify(&state(160_000, 200_000), &thresholds),
            BudgetAction::Compact
        );
        assert_eq!(
            classify(&state(190_000, 200_000), &thresholds),
            BudgetAction::EmergencyCompact
        );
        // Just under each boundary stays in the lower tier.
        assert_eq!(
            classify(&state(139_999, 200_000), &thresholds),
            BudgetAction::None
        );
        assert_eq!(
            classify(&state(159_999, 200_000), &thresholds),
            BudgetAction::Warn
        );
    }

    #[test]
    fn custom_thresholds_respected() {
        let thresholds = BudgetThresholds {
            warn_pct: 50.0,
            compact_pct: 60.0,
            emergency_pct: 70.0,
        };
        assert_eq!(
            classify(&state(110_000, 200_000), &thresholds),
            BudgetAction::Warn
        );
        assert_eq!(
            classify(&state(130_000, 200_000), &thresholds),
            BudgetAction::Compact
        );
        assert_eq!(
            classify(&state(150_000, 200_000), &thresholds),
            BudgetAction::EmergencyCompact
        );
    }

    #[test]
    fn add_and_set_tokens() {
        let mut s = ContextState::new(200_000);
        s.add_tokens(50_000);
        s.add_tokens(25_000);
        assert_eq!(s.current_tokens, 75_000);
        s.set_tokens(10_000);
        assert_eq!(s.current_tokens, 10_000);
    }

    #[test]
    fn log_string_format() {
        let s = state(170_000, 200_000);
        let log = s.to_log_string();
        assert!(log.contains("170000"));
        assert!(log.contains("85.0%"));
    }
}

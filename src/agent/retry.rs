//! Retry policy: how many consecutive failures a task tolerates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ceiling used by the `relentless` strategy; effectively unbounded.
pub const RELENTLESS_CEILING: u32 = 999;

/// User-selectable retry strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
    Relentless,
}

impl RetryStrategy {
    /// Maximum consecutive failures before giving up.
    pub fn ceiling(self) -> u32 {
        match self {
            RetryStrategy::Conservative => 3,
            RetryStrategy::Balanced => 5,
            RetryStrategy::Aggressive => 10,
            RetryStrategy::Relentless => RELENTLESS_CEILING,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RetryStrategy::Conservative => "conservative",
            RetryStrategy::Balanced => "balanced",
            RetryStrategy::Aggressive => "aggressive",
            RetryStrategy::Relentless => "relentless",
        }
    }
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "conservative" => Ok(RetryStrategy::Conservative),
            "balanced" => Ok(RetryStrategy::Balanced),
            "aggressive" => Ok(RetryStrategy::Aggressive),
            "relentless" => Ok(RetryStrategy::Relentless),
            other => Err(format!("Unknown retry strategy: {}", other)),
        }
    }
}

/// Outcome of consulting the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    GiveUp,
}

/// Pure retry decision: retry while `attempts < ceiling(strategy)`.
pub fn decide(strategy: RetryStrategy, attempts: u32) -> RetryDecision {
    if attempts < strategy.ceiling() {
        RetryDecision::Retry
    } else {
        RetryDecision::GiveUp
    }
}

/// Retry policy bound to one task's settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub strategy: RetryStrategy,
    /// When off, the first failure ends the task.
    pub smart_recovery: bool,
}

impl RetryPolicy {
    pub fn new(strategy: RetryStrategy, smart_recovery: bool) -> Self {
        Self {
            strategy,
            smart_recovery,
        }
    }

    pub fn ceiling(&self) -> u32 {
        if self.smart_recovery {
            self.strategy.ceiling()
        } else {
            0
        }
    }

    pub fn decide(&self, attempts: u32) -> RetryDecision {
        if self.smart_recovery {
            decide(self.strategy, attempts)
        } else {
            RetryDecision::GiveUp
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryStrategy::default(), true)
    }
}

/// Consecutive failure counter for the running task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    attempts: u32,
    ceiling: u32,
}

impl RetryState {
    pub fn new(ceiling: u32) -> Self {
        Self {
            attempts: 0,
            ceiling,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Count one more failure and return the new attempt count.
    pub fn register_failure(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceilings_are_strictly_ordered() {
        assert!(RetryStrategy::Conservative.ceiling() < RetryStrategy::Balanced.ceiling());
        assert!(RetryStrategy::Balanced.ceiling() < RetryStrategy::Aggressive.ceiling());
        assert!(RetryStrategy::Aggressive.ceiling() < RetryStrategy::Relentless.ceiling());
        assert_eq!(RetryStrategy::Relentless.ceiling(), RELENTLESS_CEILING);
    }

    #[test]
    fn test_decide_boundaries() {
        assert_eq!(decide(RetryStrategy::Balanced, 1), RetryDecision::Retry);
        assert_eq!(decide(RetryStrategy::Balanced, 4), RetryDecision::Retry);
        assert_eq!(decide(RetryStrategy::Balanced, 5), RetryDecision::GiveUp);
        assert_eq!(decide(RetryStrategy::Conservative, 3), RetryDecision::GiveUp);
        assert_eq!(decide(RetryStrategy::Relentless, 500), RetryDecision::Retry);
    }

    #[test]
    fn test_policy_without_smart_recovery_gives_up() {
        let policy = RetryPolicy::new(RetryStrategy::Aggressive, false);
        assert_eq!(policy.decide(1), RetryDecision::GiveUp);
        assert_eq!(policy.ceiling(), 0);
    }

    #[test]
    fn test_retry_state_counts_and_resets() {
        let mut state = RetryState::new(5);
        assert_eq!(state.register_failure(), 1);
        assert_eq!(state.register_failure(), 2);
        state.reset();
        assert_eq!(state.attempts(), 0);
        assert_eq!(state.ceiling(), 5);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "Relentless".parse::<RetryStrategy>(),
            Ok(RetryStrategy::Relentless)
        );
        assert!("reckless".parse::<RetryStrategy>().is_err());
        assert_eq!(
            serde_json::to_string(&RetryStrategy::Aggressive).unwrap(),
            "\"aggressive\""
        );
    }
}

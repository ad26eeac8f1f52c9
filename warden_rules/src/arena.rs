//! The counter arena.
//!
//! Rate-limit windows and budget totals are shared state keyed by
//! `(session, feature, rule)`. The arena holds them behind a per-feature
//! lock so an entire evaluation pass over one feature's rules is atomic:
//! two concurrent calls cannot both pass a budget check that only one of
//! them fits under.
//!
//! The in-memory arena provided here does not survive a restart; a
//! persistent adapter can implement [`CounterArena`] with the same
//! locking discipline to get durable counters.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use warden_core::error::RuleError;
use warden_core::id::SessionId;

/// A fixed rate-limit window for one counter. Read and write limits keep
/// separate windows since their lengths may differ; the enforcer keys
/// them as `<rule>:read` and `<rule>:write`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateWindow {
    /// Unix timestamp of the window start.
    pub window_start: i64,

    /// Calls made within the window.
    pub count: u32,
}

impl RateWindow {
    /// Reset the window if `now` has passed the window boundary. Fixed
    /// windows reset entirely at the boundary rather than sliding.
    pub fn roll(&mut self, now: i64, window_secs: i64) {
        if now >= self.window_start + window_secs {
            self.window_start = now;
            self.count = 0;
        }
    }
}

/// Running spend totals for one budget rule. Budgets never replenish.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BudgetState {
    /// Cumulative amount spent.
    pub amt_spent: u64,

    /// Cumulative fees spent.
    pub fees_spent: u64,
}

/// All counters of one `(session, feature)` pair, keyed by rule name.
#[derive(Clone, Debug, Default)]
pub struct FeatureCounters {
    rate_windows: BTreeMap<String, RateWindow>,
    budgets: BTreeMap<String, BudgetState>,
}

impl FeatureCounters {
    /// The rate window for the named rule, created zeroed on first use.
    pub fn rate_window(&mut self, rule: &str) -> &mut RateWindow {
        self.rate_windows.entry(rule.to_string()).or_default()
    }

    /// The budget totals for the named rule, created zeroed on first use.
    pub fn budget(&mut self, rule: &str) -> &mut BudgetState {
        self.budgets.entry(rule.to_string()).or_default()
    }

    /// Read-only view of a budget, if the rule has ever spent.
    pub fn budget_snapshot(&self, rule: &str) -> Option<BudgetState> {
        self.budgets.get(rule).copied()
    }
}

/// Shared counter storage.
pub trait CounterArena: Send + Sync {
    /// Run the closure with exclusive access to the counters of one
    /// `(session, feature)` pair. Counter mutations made by the closure
    /// are only kept if it returns `Ok`; implementations must guarantee
    /// no concurrent closure runs for the same pair.
    fn with_feature(
        &self,
        session: &SessionId,
        feature: &str,
        check: &mut dyn FnMut(&mut FeatureCounters) -> Result<(), RuleError>,
    ) -> Result<(), RuleError>;

    /// A snapshot of the counters for one pair, for inspection.
    fn snapshot(&self, session: &SessionId, feature: &str) -> Option<FeatureCounters>;
}

/// An in-memory counter arena.
#[derive(Clone, Default)]
pub struct InMemoryCounterArena {
    counters: Arc<DashMap<(SessionId, String), FeatureCounters>>,
}

impl InMemoryCounterArena {
    /// Create a new in-memory arena.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterArena for InMemoryCounterArena {
    fn with_feature(
        &self,
        session: &SessionId,
        feature: &str,
        check: &mut dyn FnMut(&mut FeatureCounters) -> Result<(), RuleError>,
    ) -> Result<(), RuleError> {
        let key = (*session, feature.to_string());
        // The entry guard holds the shard write lock for the duration of
        // the closure, serializing evaluation per (session, feature).
        let mut entry = self.counters.entry(key).or_default();
        let mut scratch = entry.value().clone();
        check(&mut scratch)?;
        *entry.value_mut() = scratch;
        Ok(())
    }

    fn snapshot(&self, session: &SessionId, feature: &str) -> Option<FeatureCounters> {
        self.counters
            .get(&(*session, feature.to_string()))
            .map(|entry| entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionId {
        SessionId::derive(b"arena test key")
    }

    #[test]
    fn test_rate_window_roll() {
        let mut window = RateWindow {
            window_start: 1_000,
            count: 5,
        };

        // Still inside a one-hour window.
        window.roll(4_599, 3_600);
        assert_eq!(window.count, 5);

        // Boundary passed: the counter resets and the window restarts.
        window.roll(4_600, 3_600);
        assert_eq!(window.count, 0);
        assert_eq!(window.window_start, 4_600);
    }

    #[test]
    fn test_failed_check_keeps_counters() {
        let arena = InMemoryCounterArena::new();
        let id = session();

        arena
            .with_feature(&id, "rebalance", &mut |counters| {
                counters.budget("budget").amt_spent += 100;
                Ok(())
            })
            .unwrap();

        // A denied check must not leak its mutations.
        let result = arena.with_feature(&id, "rebalance", &mut |counters| {
            counters.budget("budget").amt_spent += 900;
            Err(RuleError::BudgetExceeded {
                name: "budget".to_string(),
                spent: 100,
                requested: 900,
                max: 500,
            })
        });
        assert!(result.is_err());

        let snapshot = arena.snapshot(&id, "rebalance").unwrap();
        assert_eq!(snapshot.budget_snapshot("budget").unwrap().amt_spent, 100);
    }

    #[test]
    fn test_features_are_independent() {
        let arena = InMemoryCounterArena::new();
        let id = session();

        arena
            .with_feature(&id, "rebalance", &mut |counters| {
                counters.budget("budget").amt_spent += 100;
                Ok(())
            })
            .unwrap();

        assert!(arena.snapshot(&id, "autofees").is_none());
    }
}

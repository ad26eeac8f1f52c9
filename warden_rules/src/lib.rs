//! Quantitative policy rules for warden autopilot sessions.
//!
//! Each feature on an autopilot session owns an ordered set of named
//! rules: rate limits, spend budgets, channel and peer restrictions.
//! Every rule attached to the invoked feature must independently approve
//! a call; the enforcer denies on the first rule that rejects.
//!
//! Rate and budget counters live in a [`CounterArena`] keyed by
//! `(session, feature, rule)`, with the same atomicity discipline as
//! account balances: the insufficient-budget check and the increment
//! cannot interleave with a concurrent caller.

pub mod arena;
pub mod context;
pub mod enforcer;
pub mod rule;

pub use arena::{BudgetState, CounterArena, FeatureCounters, InMemoryCounterArena, RateWindow};
pub use context::{ChannelOpen, PolicyUpdate, RuleContext};
pub use enforcer::RuleEnforcer;
pub use rule::{validate_feature_rules, validate_rules, FeatureRules, Rate, RuleValue, RulesMap};

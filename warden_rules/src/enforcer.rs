//! Rule evaluation.
//!
//! [`RuleEnforcer`] evaluates every rule attached to the invoked feature
//! against one [`RuleContext`]. Evaluation is fail-closed: the first rule
//! that rejects denies the call, and a denied call never mutates any
//! counter. Counter mutations of an approved call are committed atomically
//! per `(session, feature)` through the arena.

use tracing::warn;

use warden_core::error::RuleError;
use warden_core::id::SessionId;
use warden_core::types::CallKind;

use crate::arena::{CounterArena, FeatureCounters};
use crate::context::RuleContext;
use crate::rule::{Rate, RuleValue, RulesMap};

/// The rule evaluation engine.
pub struct RuleEnforcer<A> {
    /// Shared counter storage.
    arena: A,
}

impl<A: CounterArena> RuleEnforcer<A> {
    /// Create a new enforcer over the given arena.
    pub fn new(arena: A) -> Self {
        Self { arena }
    }

    /// The arena, for snapshot inspection.
    pub fn arena(&self) -> &A {
        &self.arena
    }

    /// Evaluate all rules of one feature against a proposed call.
    ///
    /// Returns `Ok(())` if every rule approves; the counters affected by
    /// the call are then committed. Returns the first denial otherwise,
    /// with no counter mutated.
    pub fn check(
        &self,
        session: &SessionId,
        feature: &str,
        rules: &RulesMap,
        ctx: &RuleContext,
    ) -> Result<(), RuleError> {
        if rules.is_empty() {
            return Ok(());
        }

        // A send_to_self marker exempts self-payments from the spend
        // restrictions of the remaining rules.
        let exempt_spend = ctx.self_payment
            && rules
                .values()
                .any(|rule| matches!(rule, RuleValue::SendToSelf));

        let result = self.arena.with_feature(session, feature, &mut |counters| {
            for (name, rule) in rules {
                evaluate_one(name, rule, ctx, counters, exempt_spend)?;
            }
            Ok(())
        });

        if let Err(err) = &result {
            warn!(%session, feature, %err, "rule evaluation denied call");
        }
        result
    }
}

/// Evaluate a single rule, consuming counters from the feature's record
/// where the rule is stateful.
fn evaluate_one(
    name: &str,
    rule: &RuleValue,
    ctx: &RuleContext,
    counters: &mut FeatureCounters,
    exempt_spend: bool,
) -> Result<(), RuleError> {
    match rule {
        RuleValue::RateLimit {
            read_limit,
            write_limit,
        } => {
            let limit = match ctx.call {
                CallKind::Read => read_limit,
                CallKind::Write => write_limit,
            };
            check_rate(name, limit, ctx, counters)
        }

        RuleValue::HistoryLimit {
            start_time,
            duration,
        } => {
            let Some(query_start) = ctx.query_start_time else {
                return Ok(());
            };
            // Validation guarantees exactly one field is set.
            let oldest_allowed = match (start_time, duration) {
                (Some(start), _) => *start,
                (None, Some(duration)) => ctx.timestamp - duration,
                (None, None) => return Ok(()),
            };
            if query_start < oldest_allowed {
                return Err(RuleError::HistoryLimitExceeded {
                    name: name.to_string(),
                });
            }
            Ok(())
        }

        RuleValue::OffChainBudget { max_amt, max_fees } => {
            if exempt_spend || ctx.on_chain {
                return Ok(());
            }
            check_budget(name, ctx.amount_msat, ctx.fee_msat, *max_amt, *max_fees, counters)
        }

        RuleValue::OnChainBudget {
            absolute_amt,
            max_fee_rate,
        } => {
            if exempt_spend || !ctx.on_chain {
                return Ok(());
            }
            if *max_fee_rate > 0 && ctx.fee_rate > *max_fee_rate {
                return Err(RuleError::PolicyViolation {
                    name: name.to_string(),
                    reason: format!(
                        "fee rate {} above ceiling {max_fee_rate}",
                        ctx.fee_rate
                    ),
                });
            }
            check_budget(name, ctx.amount_msat, 0, *absolute_amt, 0, counters)
        }

        RuleValue::ChannelPolicyBounds {
            min_base_msat,
            max_base_msat,
            min_rate_ppm,
            max_rate_ppm,
            min_cltv_delta,
            max_cltv_delta,
            min_htlc_msat,
            max_htlc_msat,
        } => {
            let Some(update) = &ctx.policy_update else {
                return Ok(());
            };
            let within = |value: u64, min: u64, max: u64| value >= min && value <= max;
            if !within(update.base_fee_msat, *min_base_msat, *max_base_msat) {
                return Err(policy_violation(name, "base fee outside bounds"));
            }
            if update.fee_rate_ppm < *min_rate_ppm || update.fee_rate_ppm > *max_rate_ppm {
                return Err(policy_violation(name, "fee rate ppm outside bounds"));
            }
            if update.cltv_delta < *min_cltv_delta || update.cltv_delta > *max_cltv_delta {
                return Err(policy_violation(name, "cltv delta outside bounds"));
            }
            if !within(update.htlc_amt_msat, *min_htlc_msat, *max_htlc_msat) {
                return Err(policy_violation(name, "htlc amount outside bounds"));
            }
            Ok(())
        }

        RuleValue::SendToSelf => Ok(()),

        RuleValue::ChannelRestrict { channel_ids } => {
            if let Some(channel) = ctx.channel_id {
                if channel_ids.contains(&channel) {
                    return Err(policy_violation(name, "target channel is excluded"));
                }
            }
            Ok(())
        }

        RuleValue::PeerRestrict { peer_ids } => {
            if let Some(peer) = &ctx.peer_id {
                if peer_ids.iter().any(|excluded| excluded == peer) {
                    return Err(policy_violation(name, "target peer is excluded"));
                }
            }
            Ok(())
        }

        RuleValue::ChannelConstraint {
            min_capacity_sat,
            max_capacity_sat,
            max_push_sat,
            private_allowed,
            public_allowed,
        } => {
            let Some(open) = &ctx.channel_open else {
                return Ok(());
            };
            if open.capacity_sat < *min_capacity_sat
                || (*max_capacity_sat > 0 && open.capacity_sat > *max_capacity_sat)
            {
                return Err(policy_violation(name, "capacity outside bounds"));
            }
            if open.push_sat > *max_push_sat {
                return Err(policy_violation(name, "push amount above maximum"));
            }
            if open.private && !private_allowed {
                return Err(policy_violation(name, "private channels not allowed"));
            }
            if !open.private && !public_allowed {
                return Err(policy_violation(name, "public channels not allowed"));
            }
            Ok(())
        }
    }
}

fn policy_violation(name: &str, reason: &str) -> RuleError {
    RuleError::PolicyViolation {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Check-and-increment one rate counter. The counter is keyed per call
/// class so read and write limits keep independent windows.
fn check_rate(
    name: &str,
    limit: &Rate,
    ctx: &RuleContext,
    counters: &mut FeatureCounters,
) -> Result<(), RuleError> {
    if limit.is_unlimited() {
        return Ok(());
    }
    let class = match ctx.call {
        CallKind::Read => "read",
        CallKind::Write => "write",
    };
    let window = counters.rate_window(&format!("{name}:{class}"));
    window.roll(ctx.timestamp, limit.window_secs());
    if window.count >= limit.iterations {
        return Err(RuleError::RateLimitExceeded {
            name: name.to_string(),
            limit: limit.iterations,
            window_hours: limit.num_hours,
        });
    }
    window.count += 1;
    Ok(())
}

/// Check-and-increment one budget. A zero maximum means that component is
/// unlimited; validation rejects budgets where every component is zero.
fn check_budget(
    name: &str,
    amount: u64,
    fees: u64,
    max_amt: u64,
    max_fees: u64,
    counters: &mut FeatureCounters,
) -> Result<(), RuleError> {
    if amount == 0 && fees == 0 {
        return Ok(());
    }
    let budget = counters.budget(name);
    let post_amt = budget.amt_spent.saturating_add(amount);
    if max_amt > 0 && post_amt > max_amt {
        return Err(RuleError::BudgetExceeded {
            name: name.to_string(),
            spent: budget.amt_spent,
            requested: amount,
            max: max_amt,
        });
    }
    let post_fees = budget.fees_spent.saturating_add(fees);
    if max_fees > 0 && post_fees > max_fees {
        return Err(RuleError::BudgetExceeded {
            name: name.to_string(),
            spent: budget.fees_spent,
            requested: fees,
            max: max_fees,
        });
    }
    budget.amt_spent = post_amt;
    budget.fees_spent = post_fees;
    Ok(())
}

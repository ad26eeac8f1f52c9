//! Rule definitions.
//!
//! A [`RuleValue`] is a single typed policy constraint. The set is closed:
//! adding a new kind means adding a variant here and teaching the enforcer
//! to evaluate it, never ad hoc type inspection elsewhere.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use warden_core::error::RuleError;

/// An ordered collection of named rules attached to one feature.
pub type RulesMap = BTreeMap<String, RuleValue>;

/// The per-feature rule sets carried by an autopilot session.
pub type FeatureRules = BTreeMap<String, RulesMap>;

/// A call rate: at most `iterations` calls per `num_hours` hours.
///
/// A rate with zero iterations or a zero-hour window is treated as
/// unlimited for its call class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    /// Maximum number of calls within the window.
    pub iterations: u32,

    /// Window length in hours.
    pub num_hours: u32,
}

impl Rate {
    /// Returns true if this rate imposes no limit.
    pub fn is_unlimited(&self) -> bool {
        self.iterations == 0 || self.num_hours == 0
    }

    /// Window length in seconds.
    pub fn window_secs(&self) -> i64 {
        i64::from(self.num_hours) * 3_600
    }
}

/// A single typed policy constraint. Exactly one payload per value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleValue {
    /// Caps read and write call rates over fixed windows.
    RateLimit {
        /// Limit for read calls.
        read_limit: Rate,

        /// Limit for write calls.
        write_limit: Rate,
    },

    /// Denies queries for information older than a cutoff. Exactly one of
    /// the two fields must be set.
    HistoryLimit {
        /// Absolute oldest timestamp queries may ask for.
        start_time: Option<i64>,

        /// Alternatively, a lookback window in seconds from now.
        duration: Option<i64>,
    },

    /// Caps total off-chain spend (amount and fees) for the session
    /// feature. Budgets never replenish.
    OffChainBudget {
        /// Maximum cumulative amount in millisatoshi.
        max_amt: u64,

        /// Maximum cumulative fees in millisatoshi.
        max_fees: u64,
    },

    /// Caps total on-chain spend, plus a per-call fee rate ceiling.
    OnChainBudget {
        /// Maximum cumulative on-chain amount in satoshi.
        absolute_amt: u64,

        /// Maximum fee rate any single call may use.
        max_fee_rate: u64,
    },

    /// Inclusive bounds on fee-policy updates.
    ChannelPolicyBounds {
        /// Minimum base fee in millisatoshi.
        min_base_msat: u64,

        /// Maximum base fee in millisatoshi.
        max_base_msat: u64,

        /// Minimum proportional fee in parts per million.
        min_rate_ppm: u32,

        /// Maximum proportional fee in parts per million.
        max_rate_ppm: u32,

        /// Minimum CLTV delta.
        min_cltv_delta: u32,

        /// Maximum CLTV delta.
        max_cltv_delta: u32,

        /// Minimum HTLC amount in millisatoshi.
        min_htlc_msat: u64,

        /// Maximum HTLC amount in millisatoshi.
        max_htlc_msat: u64,
    },

    /// Marker rule: self-payments are exempt from spend restrictions.
    SendToSelf,

    /// Denies actions that target any of the listed channels.
    ChannelRestrict {
        /// Excluded channel ids.
        channel_ids: Vec<u64>,
    },

    /// Denies actions that target any of the listed peers.
    PeerRestrict {
        /// Excluded peer ids.
        peer_ids: Vec<String>,
    },

    /// Bounds on channel opens.
    ChannelConstraint {
        /// Minimum channel capacity in satoshi.
        min_capacity_sat: u64,

        /// Maximum channel capacity in satoshi.
        max_capacity_sat: u64,

        /// Maximum push amount in satoshi.
        max_push_sat: u64,

        /// Whether private channels may be opened.
        private_allowed: bool,

        /// Whether public channels may be opened.
        public_allowed: bool,
    },
}

impl RuleValue {
    /// The canonical name of this rule kind.
    pub fn kind(&self) -> &'static str {
        match self {
            RuleValue::RateLimit { .. } => "rate_limit",
            RuleValue::HistoryLimit { .. } => "history_limit",
            RuleValue::OffChainBudget { .. } => "off_chain_budget",
            RuleValue::OnChainBudget { .. } => "on_chain_budget",
            RuleValue::ChannelPolicyBounds { .. } => "channel_policy_bounds",
            RuleValue::SendToSelf => "send_to_self",
            RuleValue::ChannelRestrict { .. } => "channel_restrict",
            RuleValue::PeerRestrict { .. } => "peer_restrict",
            RuleValue::ChannelConstraint { .. } => "channel_constraint",
        }
    }

    /// Validate the rule's configuration. Called at session creation so
    /// misconfigured rules are rejected before a session ever evaluates
    /// them.
    pub fn validate(&self, name: &str) -> Result<(), RuleError> {
        match self {
            RuleValue::HistoryLimit {
                start_time,
                duration,
            } => match (start_time, duration) {
                (Some(_), Some(_)) => Err(RuleError::InvalidConfiguration {
                    name: name.to_string(),
                    reason: "start_time and duration are mutually exclusive".to_string(),
                }),
                (None, None) => Err(RuleError::InvalidConfiguration {
                    name: name.to_string(),
                    reason: "one of start_time or duration must be set".to_string(),
                }),
                _ => Ok(()),
            },
            RuleValue::OffChainBudget { max_amt, max_fees } => {
                if *max_amt == 0 && *max_fees == 0 {
                    return Err(RuleError::InvalidConfiguration {
                        name: name.to_string(),
                        reason: "budget with no maximums permits nothing".to_string(),
                    });
                }
                Ok(())
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
                let ordered = min_base_msat <= max_base_msat
                    && min_rate_ppm <= max_rate_ppm
                    && min_cltv_delta <= max_cltv_delta
                    && min_htlc_msat <= max_htlc_msat;
                if !ordered {
                    return Err(RuleError::InvalidConfiguration {
                        name: name.to_string(),
                        reason: "minimum bound above maximum bound".to_string(),
                    });
                }
                Ok(())
            }
            RuleValue::ChannelConstraint {
                min_capacity_sat,
                max_capacity_sat,
                private_allowed,
                public_allowed,
                ..
            } => {
                // A zero maximum leaves the capacity unbounded above.
                if *max_capacity_sat > 0 && min_capacity_sat > max_capacity_sat {
                    return Err(RuleError::InvalidConfiguration {
                        name: name.to_string(),
                        reason: "minimum capacity above maximum capacity".to_string(),
                    });
                }
                if !private_allowed && !public_allowed {
                    return Err(RuleError::InvalidConfiguration {
                        name: name.to_string(),
                        reason: "neither private nor public channels allowed".to_string(),
                    });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Validate every rule in a feature's rule map.
pub fn validate_rules(rules: &RulesMap) -> Result<(), RuleError> {
    for (name, rule) in rules {
        rule.validate(name)?;
    }
    Ok(())
}

/// Validate every rule map of every feature.
pub fn validate_feature_rules(features: &FeatureRules) -> Result<(), RuleError> {
    for rules in features.values() {
        validate_rules(rules)?;
    }
    Ok(())
}

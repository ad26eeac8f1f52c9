//! The rule evaluation context.
//!
//! One [`RuleContext`] describes one proposed call: its classification,
//! the amounts it would move, and the channel or peer it targets. Every
//! rule attached to the invoked feature is evaluated against the same
//! context.

use serde::{Deserialize, Serialize};

use warden_core::types::CallKind;

/// A proposed fee-policy update, checked against `ChannelPolicyBounds`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    /// Proposed base fee in millisatoshi.
    pub base_fee_msat: u64,

    /// Proposed proportional fee in parts per million.
    pub fee_rate_ppm: u32,

    /// Proposed CLTV delta.
    pub cltv_delta: u32,

    /// Proposed HTLC amount in millisatoshi.
    pub htlc_amt_msat: u64,
}

/// A proposed channel open, checked against `ChannelConstraint`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOpen {
    /// Channel capacity in satoshi.
    pub capacity_sat: u64,

    /// Push amount in satoshi.
    pub push_sat: u64,

    /// Whether the channel would be private.
    pub private: bool,
}

/// Everything the rule set needs to know about one proposed call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleContext {
    /// Read or write classification, for rate limiting.
    pub call: CallKind,

    /// Unix timestamp of the call.
    pub timestamp: i64,

    /// Amount the call would spend, in millisatoshi. Zero for calls that
    /// move no funds.
    pub amount_msat: u64,

    /// Fees the call would spend, in millisatoshi.
    pub fee_msat: u64,

    /// On-chain fee rate of the call, where applicable.
    pub fee_rate: u64,

    /// Whether the spend settles on-chain rather than off-chain.
    pub on_chain: bool,

    /// Target channel, where applicable.
    pub channel_id: Option<u64>,

    /// Target peer, where applicable.
    pub peer_id: Option<String>,

    /// For history queries: the oldest timestamp the call asks for.
    pub query_start_time: Option<i64>,

    /// For fee-policy calls: the proposed policy.
    pub policy_update: Option<PolicyUpdate>,

    /// For channel-open calls: the proposed channel.
    pub channel_open: Option<ChannelOpen>,

    /// Whether the payment goes back to the local node.
    pub self_payment: bool,
}

impl RuleContext {
    /// A context with no amounts and no targets, for plain calls.
    pub fn new(call: CallKind, timestamp: i64) -> Self {
        Self {
            call,
            timestamp,
            amount_msat: 0,
            fee_msat: 0,
            fee_rate: 0,
            on_chain: false,
            channel_id: None,
            peer_id: None,
            query_start_time: None,
            policy_update: None,
            channel_open: None,
            self_payment: false,
        }
    }

    /// A write context that spends the given amount off-chain.
    pub fn spend(timestamp: i64, amount_msat: u64, fee_msat: u64) -> Self {
        Self {
            amount_msat,
            fee_msat,
            ..Self::new(CallKind::Write, timestamp)
        }
    }
}

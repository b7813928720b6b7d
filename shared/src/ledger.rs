//! Bonus-point ledger types
//!
//! The ledger is the source of truth for customer bonus balances. Entries
//! are append-only: never updated, never deleted. The cached
//! [`BonusBalance`] is a materialized projection that must always equal the
//! fold of the entry deltas; any divergence is a data-integrity bug.

use serde::{Deserialize, Serialize};

/// Kind of balance-affecting event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryKind {
    /// Points awarded by an order, waiting out the returns grace window
    AwardPending,
    /// Pending points converted to spendable points by the activation sweep
    AwardActivated,
    /// Points redeemed against an order at checkout
    Spend,
    /// Credit or claw-back from a cancellation or return
    Reversal,
}

/// Immutable record of one balance-affecting event
///
/// `active_delta` and `pending_delta` carry the signed effect on each
/// balance so that replaying a customer's entries is a plain sum. `amount`
/// is the headline magnitude for display and audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Opaque entry ID
    pub id: String,
    /// Owning customer
    pub customer_id: String,
    /// Originating order, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    /// Per-customer append sequence (monotonic, total order for replay)
    pub seq: u64,
    /// Kind of event
    pub kind: LedgerEntryKind,
    /// Headline magnitude in points (always >= 0)
    pub amount: i64,
    /// Signed effect on the active balance
    pub active_delta: i64,
    /// Signed effect on the pending balance
    pub pending_delta: i64,
    /// Active balance after applying this entry
    pub balance_active_after: i64,
    /// Pending balance after applying this entry
    pub balance_pending_after: i64,
    /// Creation timestamp (unix millis)
    pub created_at: i64,
    /// When a pending award becomes spendable (AwardPending only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_due_at: Option<i64>,
    /// Human-readable context for audit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Materialized per-customer balances
///
/// A cache over the ledger fold, kept in step with every append inside the
/// same storage transaction. `seq` is the sequence of the last applied
/// entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BonusBalance {
    /// Points immediately spendable
    pub active: i64,
    /// Points awarded but still inside the grace window
    pub pending: i64,
    /// Last applied ledger sequence
    pub seq: u64,
}

impl BonusBalance {
    /// Apply one entry's deltas, returning the new balance.
    ///
    /// Fails if either balance would go negative - callers reject the
    /// operation that produced the entry rather than persisting it.
    pub fn apply(&self, active_delta: i64, pending_delta: i64) -> Option<BonusBalance> {
        let active = self.active + active_delta;
        let pending = self.pending + pending_delta;
        if active < 0 || pending < 0 {
            return None;
        }
        Some(BonusBalance {
            active,
            pending,
            seq: self.seq + 1,
        })
    }
}

/// Replay a customer's entries from scratch.
///
/// The conservation law: the result must equal the cached balance exactly.
/// Used by the reconcile worker and by tests; `None` if the sequence itself
/// drives a balance negative (corrupt history).
pub fn fold_entries<'a, I>(entries: I) -> Option<BonusBalance>
where
    I: IntoIterator<Item = &'a LedgerEntry>,
{
    let mut balance = BonusBalance::default();
    for entry in entries {
        balance = balance.apply(entry.active_delta, entry.pending_delta)?;
        balance.seq = entry.seq;
    }
    Some(balance)
}

//! Ledger append path and integrity checks
//!
//! Every balance mutation goes through [`append_entry`]: it loads the
//! cached balance, applies the entry's deltas, refuses anything that would
//! drive a balance negative, and writes the entry and the updated cache in
//! the caller's transaction. The cache is a rebuildable projection; the
//! entries are the source of truth.

use redb::WriteTransaction;
use shared::ledger::{fold_entries, BonusBalance, LedgerEntry, LedgerEntryKind};
use shared::{new_entity_id, now_millis};

use super::error::{EngineError, EngineResult};
use super::storage::Storage;

/// Parameters for one ledger append
pub struct EntryParams<'a> {
    pub customer_id: &'a str,
    pub order_id: Option<&'a str>,
    pub kind: LedgerEntryKind,
    /// Headline magnitude in points (>= 0)
    pub amount: i64,
    pub active_delta: i64,
    pub pending_delta: i64,
    pub activation_due_at: Option<i64>,
    pub note: Option<String>,
}

/// Append a ledger entry and update the cached balance, atomically with the
/// caller's transaction.
pub fn append_entry(
    storage: &Storage,
    txn: &WriteTransaction,
    params: EntryParams<'_>,
) -> EngineResult<LedgerEntry> {
    let balance = storage.get_balance_txn(txn, params.customer_id)?;
    let updated = balance
        .apply(params.active_delta, params.pending_delta)
        .ok_or_else(|| match params.kind {
            LedgerEntryKind::Spend => EngineError::InsufficientBonusBalance {
                requested: params.amount,
                available: balance.active,
            },
            _ => EngineError::InvalidOperation(format!(
                "ledger underflow for customer {}: deltas ({}, {}) against balance ({}, {})",
                params.customer_id,
                params.active_delta,
                params.pending_delta,
                balance.active,
                balance.pending
            )),
        })?;

    let entry = LedgerEntry {
        id: new_entity_id("led"),
        customer_id: params.customer_id.to_string(),
        order_id: params.order_id.map(str::to_string),
        seq: updated.seq,
        kind: params.kind,
        amount: params.amount,
        active_delta: params.active_delta,
        pending_delta: params.pending_delta,
        balance_active_after: updated.active,
        balance_pending_after: updated.pending,
        created_at: now_millis(),
        activation_due_at: params.activation_due_at,
        note: params.note,
    };

    storage.append_ledger_txn(txn, &entry)?;
    storage.store_balance_txn(txn, params.customer_id, &updated)?;
    Ok(entry)
}

/// Assert the conservation law for one customer: the fold of their entries
/// must reproduce the cached balance exactly.
pub fn verify_customer(storage: &Storage, customer_id: &str) -> EngineResult<BonusBalance> {
    let entries = storage.ledger_entries(customer_id)?;
    let cached = storage.get_balance(customer_id)?;
    check_fold(customer_id, &entries, &cached)?;
    Ok(cached)
}

/// Transaction-scoped variant used by the activation sweep
pub fn verify_customer_txn(
    storage: &Storage,
    txn: &WriteTransaction,
    customer_id: &str,
) -> EngineResult<BonusBalance> {
    let entries = storage.ledger_entries_txn(txn, customer_id)?;
    let cached = storage.get_balance_txn(txn, customer_id)?;
    check_fold(customer_id, &entries, &cached)?;
    Ok(cached)
}

fn check_fold(
    customer_id: &str,
    entries: &[LedgerEntry],
    cached: &BonusBalance,
) -> EngineResult<()> {
    let folded = fold_entries(entries).unwrap_or(BonusBalance {
        active: -1,
        pending: -1,
        seq: 0,
    });
    if folded.active != cached.active || folded.pending != cached.pending {
        return Err(EngineError::LedgerDivergence {
            customer_id: customer_id.to_string(),
            cached_active: cached.active,
            cached_pending: cached.pending,
            folded_active: folded.active,
            folded_pending: folded.pending,
        });
    }
    Ok(())
}

/// Pending points already reversed against an order's award.
///
/// Partial returns claw back slices of a still-pending award; the original
/// AwardPending entry is never touched, so the activation sweep must
/// activate only the remainder.
pub fn reversed_pending_for_order(entries: &[LedgerEntry], order_id: &str) -> i64 {
    entries
        .iter()
        .filter(|e| {
            e.kind == LedgerEntryKind::Reversal
                && e.pending_delta < 0
                && e.order_id.as_deref() == Some(order_id)
        })
        .map(|e| -e.pending_delta)
        .sum()
}

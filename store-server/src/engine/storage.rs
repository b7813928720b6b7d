//! redb-based storage for the order and ledger stores
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `orders` | `order_id` | `Order` | Order headers + embedded items |
//! | `ledger` | `(customer_id, seq)` | `LedgerEntry` | Bonus ledger (append-only) |
//! | `balances` | `customer_id` | `BonusBalance` | Materialized balance cache |
//! | `products` | `product_id` | `Product` | Authoritative catalog data |
//! | `stock` | `product_id` | `u32` | Stock counters |
//! | `returns` | `(order_id, return_id)` | `OrderReturn` | Partial-return records |
//! | `activation_queue` | `(customer_id, seq)` | `due_at` | Unactivated award index |
//! | `processed_commands` | key | outcome JSON | Idempotency + replay result |
//!
//! # Durability
//!
//! Every engine command runs inside a single write transaction; redb commits
//! are atomic (copy-on-write with pointer swap), so a crash mid-command
//! leaves stock, ledger, and orders all unchanged.
//!
//! The `activation_queue` is an index over unactivated `AwardPending`
//! entries. Deleting a queue row never touches the ledger itself, so the
//! append-only audit trail survives voiding and activation alike.

use redb::{
    Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::ledger::{BonusBalance, LedgerEntry};
use shared::order::{Order, OrderReturn};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Orders: key = order_id, value = JSON-serialized Order
const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");

/// Ledger: key = (customer_id, seq), value = JSON-serialized LedgerEntry
const LEDGER_TABLE: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("ledger");

/// Balance cache: key = customer_id, value = JSON-serialized BonusBalance
const BALANCES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("balances");

/// Catalog: key = product_id, value = JSON-serialized Product
const PRODUCTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("products");

/// Stock counters: key = product_id, value = units on hand
const STOCK_TABLE: TableDefinition<&str, u32> = TableDefinition::new("stock");

/// Returns: key = (order_id, return_id), value = JSON-serialized OrderReturn
const RETURNS_TABLE: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("returns");

/// Activation queue: key = (customer_id, ledger seq), value = activation_due_at millis
const ACTIVATION_QUEUE_TABLE: TableDefinition<(&str, u64), i64> =
    TableDefinition::new("activation_queue");

/// Processed commands: key = command key, value = JSON-serialized outcome (idempotent replay)
const PROCESSED_COMMANDS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("processed_commands");

/// Authoritative catalog record
///
/// Checkout re-reads price and bonus rate from here at commit time; client
/// supplied prices are never trusted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub product_id: String,
    pub name: String,
    pub price: Decimal,
    /// Bonus points awarded per unit purchased
    pub bonus_award_rate: i64,
}

/// One due activation-queue row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueActivation {
    pub customer_id: String,
    pub seq: u64,
    pub due_at: i64,
}

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Order not found: {0}")]
    OrderNotFound(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Durable store backed by redb
#[derive(Clone)]
pub struct Storage {
    db: Arc<Database>,
}

impl Storage {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        let storage = Self { db: Arc::new(db) };
        storage.init_tables()?;
        Ok(storage)
    }

    /// Open an in-memory database (tests)
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        let storage = Self { db: Arc::new(db) };
        storage.init_tables()?;
        Ok(storage)
    }

    fn init_tables(&self) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(ORDERS_TABLE)?;
            let _ = write_txn.open_table(LEDGER_TABLE)?;
            let _ = write_txn.open_table(BALANCES_TABLE)?;
            let _ = write_txn.open_table(PRODUCTS_TABLE)?;
            let _ = write_txn.open_table(STOCK_TABLE)?;
            let _ = write_txn.open_table(RETURNS_TABLE)?;
            let _ = write_txn.open_table(ACTIVATION_QUEUE_TABLE)?;
            let _ = write_txn.open_table(PROCESSED_COMMANDS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Begin a write transaction
    ///
    /// redb is single-writer: concurrent commands serialize here, which is
    /// what gives transitions their total order per order record.
    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    // ========== Orders ==========

    /// Store (insert or overwrite) an order within a transaction
    pub fn store_order(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        let mut table = txn.open_table(ORDERS_TABLE)?;
        let bytes = serde_json::to_vec(order)?;
        table.insert(order.order_id.as_str(), bytes.as_slice())?;
        Ok(())
    }

    /// Load an order within a transaction
    pub fn get_order_txn(&self, txn: &WriteTransaction, order_id: &str) -> StorageResult<Option<Order>> {
        let table = txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Load an order (read-only)
    pub fn get_order(&self, order_id: &str) -> StorageResult<Option<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    // ========== Catalog + Stock ==========

    /// Insert or update a product and its stock level (own transaction)
    pub fn upsert_product(&self, product: &Product, stock: u32) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut products = txn.open_table(PRODUCTS_TABLE)?;
            let bytes = serde_json::to_vec(product)?;
            products.insert(product.product_id.as_str(), bytes.as_slice())?;
            let mut stock_table = txn.open_table(STOCK_TABLE)?;
            stock_table.insert(product.product_id.as_str(), stock)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Load a product within a transaction (authoritative read at commit time)
    pub fn get_product_txn(
        &self,
        txn: &WriteTransaction,
        product_id: &str,
    ) -> StorageResult<Option<Product>> {
        let table = txn.open_table(PRODUCTS_TABLE)?;
        match table.get(product_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Load a product (read-only)
    pub fn get_product(&self, product_id: &str) -> StorageResult<Option<Product>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PRODUCTS_TABLE)?;
        match table.get(product_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Current stock within a transaction, 0 if the product has no row
    pub fn get_stock_txn(&self, txn: &WriteTransaction, product_id: &str) -> StorageResult<u32> {
        let table = txn.open_table(STOCK_TABLE)?;
        Ok(table.get(product_id)?.map(|g| g.value()).unwrap_or(0))
    }

    /// Current stock (read-only)
    pub fn get_stock(&self, product_id: &str) -> StorageResult<u32> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STOCK_TABLE)?;
        Ok(table.get(product_id)?.map(|g| g.value()).unwrap_or(0))
    }

    /// Set stock within a transaction
    pub fn set_stock_txn(
        &self,
        txn: &WriteTransaction,
        product_id: &str,
        stock: u32,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(STOCK_TABLE)?;
        table.insert(product_id, stock)?;
        Ok(())
    }

    // ========== Ledger + Balances ==========

    /// Append a ledger entry within a transaction
    ///
    /// Callers must have already assigned `entry.seq` from the cached
    /// balance row; the (customer_id, seq) key makes double-appends at the
    /// same sequence impossible to miss.
    pub fn append_ledger_txn(
        &self,
        txn: &WriteTransaction,
        entry: &LedgerEntry,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(LEDGER_TABLE)?;
        let bytes = serde_json::to_vec(entry)?;
        table.insert((entry.customer_id.as_str(), entry.seq), bytes.as_slice())?;
        Ok(())
    }

    /// Load one ledger entry within a transaction
    pub fn get_ledger_entry_txn(
        &self,
        txn: &WriteTransaction,
        customer_id: &str,
        seq: u64,
    ) -> StorageResult<Option<LedgerEntry>> {
        let table = txn.open_table(LEDGER_TABLE)?;
        match table.get((customer_id, seq))? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// All ledger entries for a customer, oldest first (replay order)
    pub fn ledger_entries(&self, customer_id: &str) -> StorageResult<Vec<LedgerEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LEDGER_TABLE)?;
        let mut entries = Vec::new();
        for item in table.range((customer_id, 0u64)..=(customer_id, u64::MAX))? {
            let (_, value) = item?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    /// All ledger entries for a customer within a transaction, oldest first
    pub fn ledger_entries_txn(
        &self,
        txn: &WriteTransaction,
        customer_id: &str,
    ) -> StorageResult<Vec<LedgerEntry>> {
        let table = txn.open_table(LEDGER_TABLE)?;
        let mut entries = Vec::new();
        for item in table.range((customer_id, 0u64)..=(customer_id, u64::MAX))? {
            let (_, value) = item?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    /// One page of ledger entries, newest first
    ///
    /// `before_seq` is an exclusive upper bound for cursor pagination.
    pub fn ledger_page(
        &self,
        customer_id: &str,
        before_seq: Option<u64>,
        limit: usize,
    ) -> StorageResult<Vec<LedgerEntry>> {
        let upper = before_seq.unwrap_or(u64::MAX);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LEDGER_TABLE)?;
        let mut entries = Vec::new();
        for item in table
            .range((customer_id, 0u64)..(customer_id, upper))?
            .rev()
            .take(limit)
        {
            let (_, value) = item?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    /// Cached balance within a transaction (zero balance if absent)
    pub fn get_balance_txn(
        &self,
        txn: &WriteTransaction,
        customer_id: &str,
    ) -> StorageResult<BonusBalance> {
        let table = txn.open_table(BALANCES_TABLE)?;
        match table.get(customer_id)? {
            Some(guard) => Ok(serde_json::from_slice(guard.value())?),
            None => Ok(BonusBalance::default()),
        }
    }

    /// Cached balance (read-only, zero balance if absent)
    pub fn get_balance(&self, customer_id: &str) -> StorageResult<BonusBalance> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BALANCES_TABLE)?;
        match table.get(customer_id)? {
            Some(guard) => Ok(serde_json::from_slice(guard.value())?),
            None => Ok(BonusBalance::default()),
        }
    }

    /// Store the cached balance within a transaction
    pub fn store_balance_txn(
        &self,
        txn: &WriteTransaction,
        customer_id: &str,
        balance: &BonusBalance,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(BALANCES_TABLE)?;
        let bytes = serde_json::to_vec(balance)?;
        table.insert(customer_id, bytes.as_slice())?;
        Ok(())
    }

    /// All customers with a balance row (reconciliation sweep input)
    pub fn customers_with_balances(&self) -> StorageResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BALANCES_TABLE)?;
        let mut customers = Vec::new();
        for item in table.iter()? {
            let (key, _) = item?;
            customers.push(key.value().to_string());
        }
        Ok(customers)
    }

    // ========== Activation Queue ==========

    /// Queue an AwardPending entry for activation
    pub fn queue_activation_txn(
        &self,
        txn: &WriteTransaction,
        customer_id: &str,
        seq: u64,
        due_at: i64,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(ACTIVATION_QUEUE_TABLE)?;
        table.insert((customer_id, seq), due_at)?;
        Ok(())
    }

    /// Remove a queue row; returns whether it was present.
    ///
    /// The re-check that makes the activation sweep idempotent per entry.
    pub fn dequeue_activation_txn(
        &self,
        txn: &WriteTransaction,
        customer_id: &str,
        seq: u64,
    ) -> StorageResult<bool> {
        let mut table = txn.open_table(ACTIVATION_QUEUE_TABLE)?;
        Ok(table.remove((customer_id, seq))?.is_some())
    }

    /// Pending queue rows for one customer within a transaction
    pub fn queued_activations_txn(
        &self,
        txn: &WriteTransaction,
        customer_id: &str,
    ) -> StorageResult<Vec<(u64, i64)>> {
        let table = txn.open_table(ACTIVATION_QUEUE_TABLE)?;
        let mut rows = Vec::new();
        for item in table.range((customer_id, 0u64)..=(customer_id, u64::MAX))? {
            let (key, value) = item?;
            rows.push((key.value().1, value.value()));
        }
        Ok(rows)
    }

    /// All queue rows due at or before `now` (read snapshot for the sweep)
    pub fn due_activations(&self, now: i64) -> StorageResult<Vec<DueActivation>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACTIVATION_QUEUE_TABLE)?;
        let mut due = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            let due_at = value.value();
            if due_at <= now {
                let (customer_id, seq) = key.value();
                due.push(DueActivation {
                    customer_id: customer_id.to_string(),
                    seq,
                    due_at,
                });
            }
        }
        Ok(due)
    }

    // ========== Returns ==========

    /// Store a return record within a transaction
    pub fn store_return_txn(
        &self,
        txn: &WriteTransaction,
        ret: &OrderReturn,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(RETURNS_TABLE)?;
        let bytes = serde_json::to_vec(ret)?;
        table.insert((ret.order_id.as_str(), ret.return_id.as_str()), bytes.as_slice())?;
        Ok(())
    }

    /// All returns recorded against an order, within a transaction
    pub fn returns_for_order_txn(
        &self,
        txn: &WriteTransaction,
        order_id: &str,
    ) -> StorageResult<Vec<OrderReturn>> {
        let table = txn.open_table(RETURNS_TABLE)?;
        let mut returns = Vec::new();
        for item in table.range((order_id, "")..)? {
            let (key, value) = item?;
            if key.value().0 != order_id {
                break;
            }
            returns.push(serde_json::from_slice(value.value())?);
        }
        Ok(returns)
    }

    /// All returns recorded against an order (read-only)
    pub fn returns_for_order(&self, order_id: &str) -> StorageResult<Vec<OrderReturn>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RETURNS_TABLE)?;
        let mut returns = Vec::new();
        for item in table.range((order_id, "")..)? {
            let (key, value) = item?;
            if key.value().0 != order_id {
                break;
            }
            returns.push(serde_json::from_slice(value.value())?);
        }
        Ok(returns)
    }

    // ========== Idempotency ==========

    /// Stored outcome for a command key, if the command was already applied
    pub fn get_processed(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PROCESSED_COMMANDS_TABLE)?;
        Ok(table.get(key)?.map(|g| g.value().to_vec()))
    }

    /// Same check inside the write transaction (closes the re-check window)
    pub fn get_processed_txn(
        &self,
        txn: &WriteTransaction,
        key: &str,
    ) -> StorageResult<Option<Vec<u8>>> {
        let table = txn.open_table(PROCESSED_COMMANDS_TABLE)?;
        Ok(table.get(key)?.map(|g| g.value().to_vec()))
    }

    /// Record a command as processed along with its serialized outcome
    pub fn mark_processed_txn(
        &self,
        txn: &WriteTransaction,
        key: &str,
        outcome: &[u8],
    ) -> StorageResult<()> {
        let mut table = txn.open_table(PROCESSED_COMMANDS_TABLE)?;
        table.insert(key, outcome)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::ledger::LedgerEntryKind;
    use shared::now_millis;

    fn sample_entry(customer: &str, seq: u64) -> LedgerEntry {
        LedgerEntry {
            id: format!("led_{seq}"),
            customer_id: customer.to_string(),
            order_id: None,
            seq,
            kind: LedgerEntryKind::AwardPending,
            amount: 10,
            active_delta: 0,
            pending_delta: 10,
            balance_active_after: 0,
            balance_pending_after: 10 * seq as i64,
            created_at: now_millis(),
            activation_due_at: None,
            note: None,
        }
    }

    #[test]
    fn ledger_range_is_per_customer() {
        let storage = Storage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage.append_ledger_txn(&txn, &sample_entry("alice", 1)).unwrap();
        storage.append_ledger_txn(&txn, &sample_entry("alice", 2)).unwrap();
        storage.append_ledger_txn(&txn, &sample_entry("bob", 1)).unwrap();
        txn.commit().unwrap();

        let alice = storage.ledger_entries("alice").unwrap();
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].seq, 1);
        assert_eq!(alice[1].seq, 2);
        assert_eq!(storage.ledger_entries("bob").unwrap().len(), 1);
    }

    #[test]
    fn ledger_page_is_newest_first_with_cursor() {
        let storage = Storage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        for seq in 1..=5 {
            storage.append_ledger_txn(&txn, &sample_entry("alice", seq)).unwrap();
        }
        txn.commit().unwrap();

        let page = storage.ledger_page("alice", None, 2).unwrap();
        assert_eq!(page.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![5, 4]);

        let next = storage.ledger_page("alice", Some(4), 2).unwrap();
        assert_eq!(next.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![3, 2]);
    }

    #[test]
    fn stock_defaults_to_zero() {
        let storage = Storage::open_in_memory().unwrap();
        assert_eq!(storage.get_stock("missing").unwrap(), 0);
    }

    #[test]
    fn processed_commands_round_trip() {
        let storage = Storage::open_in_memory().unwrap();
        assert!(storage.get_processed("cmd-1").unwrap().is_none());

        let txn = storage.begin_write().unwrap();
        storage.mark_processed_txn(&txn, "cmd-1", b"{\"ok\":true}").unwrap();
        txn.commit().unwrap();

        let stored = storage.get_processed("cmd-1").unwrap().unwrap();
        assert_eq!(stored, b"{\"ok\":true}");
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.redb");
        {
            let storage = Storage::open(&path).unwrap();
            let txn = storage.begin_write().unwrap();
            storage.append_ledger_txn(&txn, &sample_entry("alice", 1)).unwrap();
            storage.set_stock_txn(&txn, "bear", 7).unwrap();
            txn.commit().unwrap();
        }
        let storage = Storage::open(&path).unwrap();
        assert_eq!(storage.ledger_entries("alice").unwrap().len(), 1);
        assert_eq!(storage.get_stock("bear").unwrap(), 7);
    }

    #[test]
    fn activation_queue_dequeue_reports_presence() {
        let storage = Storage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage.queue_activation_txn(&txn, "alice", 1, 1000).unwrap();
        txn.commit().unwrap();

        let due = storage.due_activations(1000).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].customer_id, "alice");

        let txn = storage.begin_write().unwrap();
        assert!(storage.dequeue_activation_txn(&txn, "alice", 1).unwrap());
        assert!(!storage.dequeue_activation_txn(&txn, "alice", 1).unwrap());
        txn.commit().unwrap();
    }
}

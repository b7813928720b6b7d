//! Order lifecycle and bonus-ledger engine
//!
//! Single-writer command engine over redb: checkout, state transitions,
//! returns, and the bonus-point ledger all commit through one pipeline with
//! per-command idempotency keys. Background workers activate pending awards
//! and reconcile the ledger against its cached balances.

pub mod activation;
pub mod checkout;
pub mod dedup;
pub mod error;
pub mod ledger;
pub mod manager;
pub mod reconcile;
pub mod returns;
pub mod storage;
pub mod transition;

pub use activation::ActivationWorker;
pub use checkout::{CartLine, CheckoutOutcome, CheckoutRequest};
pub use dedup::{CoalesceError, RequestCoalescer};
pub use error::{EngineError, EngineResult};
pub use manager::{EngineConfig, OrderEngine};
pub use reconcile::ReconcileWorker;
pub use returns::{ReturnOutcome, ReturnRequest};
pub use storage::{Product, Storage, StorageError};
pub use transition::{TransitionOutcome, TransitionRequest};

//! Boundary to the transaction pool.

use basalt_types::{Transaction, H256};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Emitted by the pool whenever a transaction is added or re-classified.
#[derive(Clone, Debug)]
pub struct TxEvent {
    pub tx: Arc<Transaction>,
    /// Whether the transaction is currently executable; `None` when the
    /// pool cannot tell yet.
    pub executable: Option<bool>,
}

/// The transaction pool as seen from the engine.
pub trait TxPool: Send + Sync {
    /// Bulk-loads transactions without validation feedback; used to
    /// repopulate the pool on startup.
    fn fill(&self, txs: Vec<Transaction>);

    fn add(&self, tx: Transaction) -> anyhow::Result<()>;

    /// Transactions ready for inclusion, in the pool's preferred order.
    fn executables(&self) -> Vec<Arc<Transaction>>;

    /// Removes a transaction by its raw hash and canonical id. Returns
    /// whether anything was removed.
    fn remove(&self, hash: &H256, id: &H256) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<TxEvent>;
}

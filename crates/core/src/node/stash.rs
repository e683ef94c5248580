use basalt_types::{Transaction, H256};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Persistent FIFO buffer for transactions the pool classified as
/// non-executable, so they survive a restart and can repopulate the pool.
///
/// Entries live in a KV tree keyed by the transaction's raw hash; the FIFO
/// of insertion order is in-memory only and is regenerated by
/// [`load_all`].
///
/// [`load_all`]: TxStash::load_all
pub(crate) struct TxStash {
    tree: sled::Tree,
    capacity: usize,
    fifo: Mutex<VecDeque<H256>>,
}

impl TxStash {
    pub(crate) fn new(tree: sled::Tree, capacity: usize) -> Self {
        TxStash {
            tree,
            capacity: capacity.max(1),
            fifo: Mutex::new(VecDeque::new()),
        }
    }

    /// Stores `tx` unless it is already present; evicts the oldest entries
    /// past capacity. Fails only on storage errors.
    pub(crate) fn save(&self, tx: &Transaction) -> anyhow::Result<()> {
        let hash = tx.hash();
        let mut fifo = self.fifo.lock();
        if self.tree.contains_key(hash.as_bytes())? {
            return Ok(());
        }
        self.tree.insert(hash.as_bytes(), rlp::encode(tx).to_vec())?;
        fifo.push_back(hash);
        while fifo.len() > self.capacity {
            if let Some(victim) = fifo.pop_front() {
                self.tree.remove(victim.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Loads every stored transaction, self-healing the tree along the
    /// way: undecodable values are deleted and entries stored under a key
    /// other than the canonical hash (legacy data) are remapped. The
    /// repair batch is best-effort.
    pub(crate) fn load_all(&self) -> anyhow::Result<Vec<Transaction>> {
        let mut txs = Vec::new();
        let mut batch = sled::Batch::default();
        let mut needs_repair = false;
        let mut fifo = self.fifo.lock();
        fifo.clear();

        for item in self.tree.iter() {
            let (key, value) = item?;
            match rlp::decode::<Transaction>(&value) {
                Ok(tx) => {
                    let hash = tx.hash();
                    if key.as_ref() != hash.as_bytes() {
                        batch.remove(key);
                        batch.insert(hash.as_bytes(), value.to_vec());
                        needs_repair = true;
                    }
                    fifo.push_back(hash);
                    txs.push(tx);
                }
                Err(err) => {
                    tracing::warn!(%err, key = %hex::encode(&key), "dropping malformed stash entry");
                    batch.remove(key);
                    needs_repair = true;
                }
            }
        }

        if needs_repair {
            if let Err(err) = self.tree.apply_batch(batch) {
                tracing::warn!(%err, "failed to repair tx stash");
            }
        }
        Ok(txs)
    }

    #[cfg(test)]
    fn stored_len(&self) -> usize {
        self.tree.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{authority_key, signed_tx};

    fn stash(capacity: usize) -> (TxStash, sled::Db) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let tree = db.open_tree("tx.stash").unwrap();
        (TxStash::new(tree, capacity), db)
    }

    #[test]
    fn round_trips_distinct_txs() -> anyhow::Result<()> {
        let (stash, _db) = stash(16);
        let key = authority_key(7);

        let txs: Vec<_> = (0..5).map(|nonce| signed_tx(&key, nonce)).collect();
        for tx in &txs {
            stash.save(tx)?;
            // Saving twice is a no-op.
            stash.save(tx)?;
        }
        assert_eq!(stash.stored_len(), 5);

        let mut loaded = stash.load_all()?;
        loaded.sort_by_key(|tx| tx.nonce);
        assert_eq!(loaded, txs);
        Ok(())
    }

    #[test_case::test_case(1)]
    #[test_case::test_case(3)]
    #[test_case::test_case(8)]
    fn capacity_is_enforced_fifo(capacity: usize) -> anyhow::Result<()> {
        let (stash, _db) = stash(capacity);
        let key = authority_key(7);

        let total = capacity + 2;
        let txs: Vec<_> = (0..total as u64).map(|nonce| signed_tx(&key, nonce)).collect();
        for tx in &txs {
            stash.save(tx)?;
            assert!(stash.stored_len() <= capacity);
        }

        let loaded = stash.load_all()?;
        assert_eq!(loaded.len(), capacity);
        // The oldest entries were evicted, the newest survive.
        for tx in &txs[total - capacity..] {
            assert!(loaded.contains(tx));
        }
        Ok(())
    }

    #[test]
    fn load_all_heals_malformed_and_mis_keyed_entries() -> anyhow::Result<()> {
        let (stash, _db) = stash(16);
        let key = authority_key(7);

        let good = signed_tx(&key, 1);
        stash.save(&good)?;

        // A value that does not decode and a valid value filed under the
        // wrong key (legacy data).
        stash.tree.insert(b"garbage-key", &[0xde, 0xad, 0xbe, 0xef][..])?;
        let mis_keyed = signed_tx(&key, 2);
        stash
            .tree
            .insert(b"legacy-key", rlp::encode(&mis_keyed).to_vec())?;

        let loaded = stash.load_all()?;
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains(&good));
        assert!(loaded.contains(&mis_keyed));

        // The malformed entry is gone and the legacy one is re-keyed.
        assert!(!stash.tree.contains_key(b"garbage-key")?);
        assert!(!stash.tree.contains_key(b"legacy-key")?);
        assert!(stash.tree.contains_key(mis_keyed.hash().as_bytes())?);
        Ok(())
    }
}

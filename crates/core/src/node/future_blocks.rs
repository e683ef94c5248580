use basalt_types::{Block, BlockId};
use parking_lot::Mutex;
use rand::seq::IteratorRandom;
use std::collections::HashMap;
use std::sync::Arc;

/// Bounded cache for blocks that cannot be processed yet (parent missing,
/// number too far ahead, timestamp in the future).
///
/// Eviction picks a uniformly random occupant. Replay order does not rely
/// on the cache: the drain path sorts by block number, so a simple random
/// policy is enough here.
#[derive(Clone)]
pub(crate) struct FutureBlocks {
    capacity: usize,
    entries: Arc<Mutex<HashMap<BlockId, Arc<Block>>>>,
}

impl FutureBlocks {
    pub(crate) fn new(capacity: usize) -> Self {
        FutureBlocks {
            capacity: capacity.max(1),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub(crate) fn set(&self, block: Arc<Block>) {
        let mut entries = self.entries.lock();
        entries.insert(block.id(), block);
        if entries.len() > self.capacity {
            let victim = entries
                .keys()
                .copied()
                .choose(&mut rand::thread_rng())
                .expect("cache is over capacity, so not empty");
            entries.remove(&victim);
        }
    }

    pub(crate) fn get(&self, id: &BlockId) -> Option<Arc<Block>> {
        self.entries.lock().get(id).cloned()
    }

    pub(crate) fn contains(&self, id: &BlockId) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub(crate) fn remove(&self, id: &BlockId) -> Option<Arc<Block>> {
        self.entries.lock().remove(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn for_each(&self, mut f: impl FnMut(&BlockId, &Arc<Block>)) {
        for (id, block) in self.entries.lock().iter() {
            f(id, block);
        }
    }

    /// All cached blocks in ascending block-number order; the replay order.
    pub(crate) fn drain_ordered(&self) -> Vec<Arc<Block>> {
        let mut blocks: Vec<_> = self.entries.lock().values().cloned().collect();
        blocks.sort_by_key(|block| block.id());
        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestChain;

    #[test]
    fn eviction_keeps_cache_bounded() {
        let cache = FutureBlocks::new(4);
        let mut chain = TestChain::new();
        for _ in 0..32 {
            cache.set(Arc::new(chain.extend_empty()));
            assert!(cache.len() <= 4);
        }
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn drain_orders_by_number() {
        let cache = FutureBlocks::new(16);
        let mut chain = TestChain::new();
        let blocks: Vec<_> = (0..8).map(|_| Arc::new(chain.extend_empty())).collect();
        // Insert out of order.
        for block in blocks.iter().rev() {
            cache.set(block.clone());
        }
        let drained = cache.drain_ordered();
        let numbers: Vec<_> = drained.iter().map(|b| b.number()).collect();
        assert_eq!(numbers, (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn set_get_remove() {
        let cache = FutureBlocks::new(8);
        let mut chain = TestChain::new();
        let block = Arc::new(chain.extend_empty());
        let id = block.id();

        cache.set(block.clone());
        assert!(cache.contains(&id));
        assert_eq!(cache.get(&id).unwrap().id(), id);

        let mut seen = 0;
        cache.for_each(|each_id, _| {
            assert_eq!(*each_id, id);
            seen += 1;
        });
        assert_eq!(seen, 1);

        assert!(cache.remove(&id).is_some());
        assert!(!cache.contains(&id));
        assert_eq!(cache.len(), 0);
    }
}

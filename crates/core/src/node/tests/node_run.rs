//! End-to-end runs of the node loops against channel-driven collaborators.

use crate::comm::SyncItem;
use crate::node::Node;
use crate::testing::{
    authority_key, signed_tx, ChannelComm, MemLogDb, MemPool, MemRepository, MockBft, TestChain,
    TestConsensus, TestPacker,
};
use backon::{ConstantBuilder, Retryable};
use basalt_config::NodeConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct NodeFixture {
    repo: Arc<MemRepository>,
    pool: Arc<MemPool>,
    comm: Arc<ChannelComm>,
    packer: Arc<TestPacker>,
    log_db: Arc<MemLogDb>,
    chain: TestChain,
    stash_tree: sled::Tree,
    _stash_db: sled::Db,
    _stash_dir: tempfile::TempDir,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl NodeFixture {
    /// Boots a node over channel-driven collaborators with the local
    /// authority outside its packing round.
    fn start() -> anyhow::Result<Self> {
        Self::start_with_packing(false)
    }

    fn start_with_packing(packing: bool) -> anyhow::Result<Self> {
        let chain = TestChain::new();
        let repo = Arc::new(MemRepository::new(chain.genesis().clone()));
        let pool = Arc::new(MemPool::new());
        let comm = Arc::new(ChannelComm::new());
        let packer = Arc::new(TestPacker::new());
        let log_db = Arc::new(MemLogDb::new());
        packer.fail_schedule(!packing);
        comm.set_synced(true);

        let stash_dir = tempfile::tempdir()?;
        let stash_db = sled::open(stash_dir.path())?;
        let stash_tree = stash_db.open_tree("tx.stash")?;

        let node = Node::new(
            NodeConfig {
                stash_capacity: 16,
                future_blocks_capacity: 16,
                ..NodeConfig::default()
            },
            *chain.key(),
            repo.clone(),
            Arc::new(MockBft::new()),
            Arc::new(TestConsensus::new()),
            packer.clone(),
            pool.clone(),
            comm.clone(),
            Some(log_db.clone()),
            stash_tree.clone(),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(node.run(cancel.clone()));
        Ok(NodeFixture {
            repo,
            pool,
            comm,
            packer,
            log_db,
            chain,
            stash_tree,
            _stash_db: stash_db,
            _stash_dir: stash_dir,
            cancel,
            handle,
        })
    }

    async fn eventually(
        &self,
        what: &str,
        condition: impl Fn() -> bool,
    ) -> anyhow::Result<()> {
        let check = || async {
            if condition() {
                Ok(())
            } else {
                anyhow::bail!("still waiting for {what}")
            }
        };
        check
            .retry(
                ConstantBuilder::default()
                    .with_delay(Duration::from_millis(50))
                    .with_max_times(100),
            )
            .await
    }

    async fn shutdown(self) -> anyhow::Result<()> {
        self.cancel.cancel();
        self.handle.await?
    }
}

#[tokio::test]
async fn imports_synced_blocks_and_relays_gossip() -> anyhow::Result<()> {
    let mut fixture = NodeFixture::start()?;
    let b1 = fixture.chain.extend_with(vec![signed_tx(&authority_key(9), 1)]);
    let b2 = fixture.chain.extend_empty();
    let b3 = fixture.chain.extend_empty();

    fixture.comm.feed(SyncItem::Block(Arc::new(b1.clone()))).await;
    fixture.comm.feed(SyncItem::KeepAlive).await;
    fixture.comm.feed(SyncItem::Block(Arc::new(b2.clone()))).await;

    let repo = fixture.repo.clone();
    let b2_id = b2.id();
    fixture
        .eventually("sync import", move || repo.best_id() == b2_id)
        .await?;
    assert!(fixture.log_db.contains(&b1.id()));

    // A gossiped trunk block is imported and relayed onward. The gossip
    // is re-sent on every poll in case the house-keeping loop had not
    // subscribed yet; replays are known blocks and change nothing.
    let repo = fixture.repo.clone();
    let comm = fixture.comm.clone();
    let gossiped = Arc::new(b3.clone());
    let b3_id = b3.id();
    fixture
        .eventually("gossip import", move || {
            comm.gossip(gossiped.clone());
            repo.best_id() == b3_id
        })
        .await?;
    assert!(fixture.comm.broadcasted().contains(&b3.id()));

    fixture.shutdown().await
}

#[tokio::test]
async fn packs_a_block_on_its_turn_and_broadcasts_it() -> anyhow::Result<()> {
    let fixture = NodeFixture::start_with_packing(true)?;

    let repo = fixture.repo.clone();
    fixture
        .eventually("packed block", move || repo.best_id().number() >= 1)
        .await?;
    assert!(!fixture.comm.broadcasted().is_empty());
    assert!(!fixture.packer.votes().is_empty());

    fixture.shutdown().await
}

#[tokio::test]
async fn stashes_non_executable_transactions() -> anyhow::Result<()> {
    let fixture = NodeFixture::start()?;
    let stashed_tx = signed_tx(&authority_key(9), 1);
    let executable_tx = signed_tx(&authority_key(9), 2);

    // Re-emit on every poll in case the stash loop had not subscribed
    // yet; the stash dedups by hash.
    let pool = fixture.pool.clone();
    let tree = fixture.stash_tree.clone();
    let hash = stashed_tx.hash();
    let emitted = (stashed_tx.clone(), executable_tx.clone());
    fixture
        .eventually("stashed tx", move || {
            pool.emit(emitted.0.clone(), Some(false));
            pool.emit(emitted.1.clone(), Some(true));
            tree.contains_key(hash.as_bytes()).unwrap_or(false)
        })
        .await?;
    assert!(!fixture
        .stash_tree
        .contains_key(executable_tx.hash().as_bytes())?);

    fixture.shutdown().await
}

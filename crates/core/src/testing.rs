//! In-memory collaborator implementations for exercising the engine
//! hermetically. Gated behind the `testing` feature for downstream crates.

use crate::bft::BftEngine;
use crate::chain::Repository;
use crate::comm::{Communicator, SyncItem};
use crate::consensus::{ConsensusEngine, ConsensusError};
use crate::logdb::{LogDb, LogWriter};
use crate::packer::{AdoptError, PackFlow, Packer};
use crate::pool::{TxEvent, TxPool};
use crate::state::StateStage;
use anyhow::{anyhow, bail, Result};
use basalt_config::constants::BLOCK_INTERVAL;
use basalt_types::{
    Block, BlockId, BlockSummary, Clause, Header, Output, Receipt, Transaction, Transfer, Event,
    H256, U256, blake2b256,
};
use parking_lot::{Mutex, RwLock};
use secp256k1::SecretKey;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

pub const TEST_CHAIN_TAG: u8 = 0x4a;
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
pub const TEST_GAS_LIMIT: u64 = 40_000_000;

/// Deterministic secp256k1 key; `seed` must be non-zero.
pub fn authority_key(seed: u8) -> SecretKey {
    assert_ne!(seed, 0, "zero is not a valid key seed");
    let mut raw = [0u8; 32];
    raw[31] = seed;
    SecretKey::from_slice(&raw).expect("small non-zero scalar is a valid key")
}

/// A minimal signed transfer transaction.
pub fn signed_tx(key: &SecretKey, nonce: u64) -> Transaction {
    Transaction {
        chain_tag: TEST_CHAIN_TAG,
        expiration: 720,
        gas_price_coef: 0,
        gas: 21_000,
        nonce,
        clauses: vec![Clause {
            to: Some(basalt_types::Address::repeat_byte(0xd7)),
            value: U256::from(1u64),
            data: vec![],
        }],
        signature: vec![],
    }
    .sign(key)
}

/// Marks a transaction so [`TestFlow::adopt`] reports it as not adoptable
/// right now.
pub const COEF_NOT_ADOPTABLE_NOW: u8 = 254;
/// Marks a transaction so [`TestFlow::adopt`] rejects it outright.
pub const COEF_REJECTED: u8 = 255;

pub fn unsigned_genesis() -> Block {
    let header = Header {
        parent_id: BlockId::genesis_parent(TEST_CHAIN_TAG),
        timestamp: GENESIS_TIMESTAMP,
        gas_limit: TEST_GAS_LIMIT,
        gas_used: 0,
        total_score: 0,
        txs_root: Block::compute_txs_root(&[]),
        state_root: H256::repeat_byte(0x11),
        receipts_root: Receipt::compute_receipts_root(&[]),
        signature: vec![],
    };
    Block::new(header, vec![])
}

/// Receipts the test consensus deterministically derives from a tx list.
pub fn receipts_for(txs: &[Transaction]) -> Vec<Receipt> {
    txs.iter()
        .map(|tx| {
            let gas_payer = tx.signer().unwrap_or_default();
            Receipt {
                gas_used: tx.gas,
                gas_payer,
                paid: U256::from(tx.gas),
                reverted: false,
                outputs: vec![Output {
                    events: vec![Event {
                        address: gas_payer,
                        topics: vec![tx.hash()],
                        data: vec![],
                    }],
                    transfers: vec![Transfer {
                        sender: gas_payer,
                        recipient: basalt_types::Address::repeat_byte(0xd7),
                        amount: U256::from(1u64),
                    }],
                }],
            }
        })
        .collect()
}

/// Builds a valid, signed child of `parent` with an explicit timestamp.
pub fn build_child_at(
    parent: &Header,
    key: &SecretKey,
    txs: Vec<Transaction>,
    score_delta: u64,
    timestamp: u64,
) -> Block {
    let receipts = receipts_for(&txs);
    let number = parent.number().wrapping_add(1);
    let header = Header {
        parent_id: parent.id(),
        timestamp,
        gas_limit: TEST_GAS_LIMIT,
        gas_used: txs.iter().map(|tx| tx.gas).sum(),
        total_score: parent.total_score + score_delta,
        txs_root: Block::compute_txs_root(&txs),
        state_root: blake2b256(&[parent.state_root.as_bytes(), &number.to_be_bytes()]),
        receipts_root: Receipt::compute_receipts_root(&receipts),
        signature: vec![],
    }
    .sign(key);
    Block::new(header, txs)
}

/// Builds a valid, signed child one block interval after `parent`.
pub fn build_child(
    parent: &Header,
    key: &SecretKey,
    txs: Vec<Transaction>,
    score_delta: u64,
) -> Block {
    build_child_at(parent, key, txs, score_delta, parent.timestamp + BLOCK_INTERVAL)
}

/// Grows a linear chain of valid blocks, one authority.
pub struct TestChain {
    key: SecretKey,
    genesis: Block,
    head: Header,
}

impl TestChain {
    pub fn new() -> Self {
        let genesis = unsigned_genesis();
        TestChain {
            key: authority_key(1),
            head: genesis.header.clone(),
            genesis,
        }
    }

    pub fn genesis(&self) -> &Block {
        &self.genesis
    }

    pub fn head(&self) -> &Header {
        &self.head
    }

    pub fn key(&self) -> &SecretKey {
        &self.key
    }

    pub fn extend_empty(&mut self) -> Block {
        self.extend_with(vec![])
    }

    pub fn extend_with(&mut self, txs: Vec<Transaction>) -> Block {
        let block = build_child(&self.head, &self.key, txs, 1);
        self.head = block.header.clone();
        block
    }
}

impl Default for TestChain {
    fn default() -> Self {
        TestChain::new()
    }
}

// ---------------------------------------------------------------------------
// Repository

struct StoredBlock {
    block: Block,
    receipts: Vec<Receipt>,
    summary: BlockSummary,
}

struct RepoInner {
    blocks: HashMap<BlockId, StoredBlock>,
    by_number: BTreeMap<u32, Vec<BlockId>>,
    best: BlockId,
    max_number: u32,
}

/// Fork-aware in-memory repository.
pub struct MemRepository {
    chain_tag: u8,
    genesis_id: BlockId,
    inner: RwLock<RepoInner>,
    best_watch: watch::Sender<BlockId>,
    appends: AtomicUsize,
}

impl MemRepository {
    pub fn new(genesis: Block) -> Self {
        let genesis_id = genesis.id();
        let summary = summarize(&genesis, 0);
        let mut blocks = HashMap::new();
        blocks.insert(
            genesis_id,
            StoredBlock {
                block: genesis,
                receipts: vec![],
                summary,
            },
        );
        let mut by_number = BTreeMap::new();
        by_number.insert(0, vec![genesis_id]);
        let (best_watch, _) = watch::channel(genesis_id);
        MemRepository {
            chain_tag: TEST_CHAIN_TAG,
            genesis_id,
            inner: RwLock::new(RepoInner {
                blocks,
                by_number,
                best: genesis_id,
                max_number: 0,
            }),
            best_watch,
            appends: AtomicUsize::new(0),
        }
    }

    pub fn best_id(&self) -> BlockId {
        self.inner.read().best
    }

    /// Number of `add_block` calls so far.
    pub fn append_count(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }
}

fn summarize(block: &Block, conflicts: u32) -> BlockSummary {
    BlockSummary {
        header: block.header.clone(),
        tx_ids: block
            .transactions
            .iter()
            .map(|tx| tx.id().unwrap_or_else(|_| tx.hash()))
            .collect(),
        size: block.size(),
        conflicts,
    }
}

impl Repository for MemRepository {
    fn chain_tag(&self) -> u8 {
        self.chain_tag
    }

    fn genesis_id(&self) -> BlockId {
        self.genesis_id
    }

    fn max_block_num(&self) -> Result<u32> {
        Ok(self.inner.read().max_number)
    }

    fn scan_conflicts(&self, number: u32) -> Result<u32> {
        Ok(self
            .inner
            .read()
            .by_number
            .get(&number)
            .map(|ids| ids.len() as u32)
            .unwrap_or(0))
    }

    fn block_summary(&self, id: &BlockId) -> Result<Option<BlockSummary>> {
        Ok(self
            .inner
            .read()
            .blocks
            .get(id)
            .map(|stored| stored.summary.clone()))
    }

    fn best_summary(&self) -> BlockSummary {
        let inner = self.inner.read();
        inner.blocks[&inner.best].summary.clone()
    }

    fn block(&self, id: &BlockId) -> Result<Option<Block>> {
        Ok(self
            .inner
            .read()
            .blocks
            .get(id)
            .map(|stored| stored.block.clone()))
    }

    fn receipts(&self, id: &BlockId) -> Result<Option<Vec<Receipt>>> {
        Ok(self
            .inner
            .read()
            .blocks
            .get(id)
            .map(|stored| stored.receipts.clone()))
    }

    fn summaries_at(&self, number: u32) -> Result<Vec<BlockSummary>> {
        let inner = self.inner.read();
        Ok(inner
            .by_number
            .get(&number)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.blocks.get(id))
            .map(|stored| stored.summary.clone())
            .collect())
    }

    fn add_block(
        &self,
        block: &Block,
        receipts: &[Receipt],
        conflicts: u32,
        become_best: bool,
    ) -> Result<()> {
        let id = block.id();
        let number = block.number();
        let mut inner = self.inner.write();
        if inner.blocks.contains_key(&id) {
            bail!("block {id} already stored");
        }
        inner.blocks.insert(
            id,
            StoredBlock {
                block: block.clone(),
                receipts: receipts.to_vec(),
                summary: summarize(block, conflicts),
            },
        );
        inner.by_number.entry(number).or_default().push(id);
        inner.max_number = inner.max_number.max(number);
        if become_best {
            inner.best = id;
            self.best_watch.send_replace(id);
        }
        self.appends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn chain_block_id(&self, head: &BlockId, number: u32) -> Result<Option<BlockId>> {
        let inner = self.inner.read();
        let mut cursor = *head;
        loop {
            let Some(stored) = inner.blocks.get(&cursor) else {
                return Ok(None);
            };
            let cursor_number = stored.summary.number();
            if cursor_number < number {
                return Ok(None);
            }
            if cursor_number == number {
                return Ok(Some(cursor));
            }
            cursor = stored.summary.header.parent_id;
        }
    }

    fn best_ticker(&self) -> watch::Receiver<BlockId> {
        self.best_watch.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Consensus

struct MemStage {
    root: H256,
}

impl StateStage for MemStage {
    fn commit(self: Box<Self>) -> Result<H256> {
        Ok(self.root)
    }
}

/// Consensus stub: verifies the structure the test chain builders produce
/// and derives receipts deterministically.
#[derive(Default)]
pub struct TestConsensus {
    fail_next: Mutex<Option<ConsensusError>>,
}

impl TestConsensus {
    pub fn new() -> Self {
        TestConsensus::default()
    }

    /// The next `process` call returns `err` instead of executing.
    pub fn fail_next(&self, err: ConsensusError) {
        *self.fail_next.lock() = Some(err);
    }
}

impl ConsensusEngine for TestConsensus {
    fn process(
        &self,
        parent: &BlockSummary,
        block: &Block,
        now: u64,
        _conflicts: u32,
    ) -> std::result::Result<(Box<dyn StateStage>, Vec<Receipt>), ConsensusError> {
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }
        if block.header.timestamp > now {
            return Err(ConsensusError::FutureBlock);
        }
        if block.header.parent_id != parent.id() {
            return Err(ConsensusError::Critical("parent mismatch".into()));
        }
        if block.header.timestamp <= parent.header.timestamp {
            return Err(ConsensusError::Critical(
                "timestamp not after parent".into(),
            ));
        }
        if block.header.txs_root != Block::compute_txs_root(&block.transactions) {
            return Err(ConsensusError::Critical("txs root mismatch".into()));
        }
        let receipts = receipts_for(&block.transactions);
        if block.header.receipts_root != Receipt::compute_receipts_root(&receipts) {
            return Err(ConsensusError::Critical("receipts root mismatch".into()));
        }
        Ok((
            Box::new(MemStage {
                root: block.header.state_root,
            }),
            receipts,
        ))
    }
}

// ---------------------------------------------------------------------------
// BFT

/// Scriptable finality engine.
pub struct MockBft {
    accepts: AtomicBool,
    select_result: AtomicBool,
    vote: AtomicBool,
    finalized: Mutex<BlockId>,
    committed: Mutex<Vec<(BlockId, bool)>>,
}

impl Default for MockBft {
    fn default() -> Self {
        MockBft {
            accepts: AtomicBool::new(true),
            select_result: AtomicBool::new(true),
            vote: AtomicBool::new(true),
            finalized: Mutex::new(BlockId::default()),
            committed: Mutex::new(Vec::new()),
        }
    }
}

impl MockBft {
    pub fn new() -> Self {
        MockBft::default()
    }

    pub fn set_accepts(&self, accepts: bool) {
        self.accepts.store(accepts, Ordering::SeqCst);
    }

    pub fn set_select_result(&self, selected: bool) {
        self.select_result.store(selected, Ordering::SeqCst);
    }

    pub fn set_should_vote(&self, vote: bool) {
        self.vote.store(vote, Ordering::SeqCst);
    }

    pub fn set_finalized(&self, id: BlockId) {
        *self.finalized.lock() = id;
    }

    /// `(id, packing)` pairs seen by `commit_block`, in order.
    pub fn committed(&self) -> Vec<(BlockId, bool)> {
        self.committed.lock().clone()
    }
}

impl BftEngine for MockBft {
    fn accepts(&self, _parent_id: &BlockId) -> Result<bool> {
        Ok(self.accepts.load(Ordering::SeqCst))
    }

    fn select(&self, _header: &Header) -> Result<bool> {
        Ok(self.select_result.load(Ordering::SeqCst))
    }

    fn commit_block(&self, header: &Header, packing: bool) -> Result<()> {
        self.committed.lock().push((header.id(), packing));
        Ok(())
    }

    fn should_vote(&self, _parent_id: &BlockId) -> Result<bool> {
        Ok(self.vote.load(Ordering::SeqCst))
    }

    fn finalized(&self) -> BlockId {
        *self.finalized.lock()
    }
}

// ---------------------------------------------------------------------------
// Log DB

#[derive(Debug, Clone)]
enum LogOp {
    Write(u32, BlockId),
    Truncate(u32),
}

/// In-memory log database with injectable write failures.
pub struct MemLogDb {
    store: Arc<Mutex<BTreeMap<u32, BlockId>>>,
    fail_writes: Arc<AtomicBool>,
    writers: AtomicUsize,
    sync_off_writers: AtomicUsize,
}

impl Default for MemLogDb {
    fn default() -> Self {
        MemLogDb {
            store: Arc::new(Mutex::new(BTreeMap::new())),
            fail_writes: Arc::new(AtomicBool::new(false)),
            writers: AtomicUsize::new(0),
            sync_off_writers: AtomicUsize::new(0),
        }
    }
}

impl MemLogDb {
    pub fn new() -> Self {
        MemLogDb::default()
    }

    /// Makes every subsequent `write` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Committed `(number, id)` entries in ascending number order.
    pub fn entries(&self) -> Vec<(u32, BlockId)> {
        self.store
            .lock()
            .iter()
            .map(|(number, id)| (*number, *id))
            .collect()
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.store.lock().values().any(|stored| stored == id)
    }

    pub fn writer_count(&self) -> usize {
        self.writers.load(Ordering::SeqCst)
    }

    pub fn sync_off_writer_count(&self) -> usize {
        self.sync_off_writers.load(Ordering::SeqCst)
    }
}

struct MemLogWriter {
    store: Arc<Mutex<BTreeMap<u32, BlockId>>>,
    fail_writes: Arc<AtomicBool>,
    ops: Vec<LogOp>,
}

impl LogWriter for MemLogWriter {
    fn write(&mut self, block: &Block, _receipts: &[Receipt]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("injected log write failure");
        }
        self.ops.push(LogOp::Write(block.number(), block.id()));
        Ok(())
    }

    fn truncate(&mut self, from: u32) -> Result<()> {
        self.ops.push(LogOp::Truncate(from));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let mut store = self.store.lock();
        for op in self.ops.drain(..) {
            match op {
                LogOp::Write(number, id) => {
                    store.insert(number, id);
                }
                LogOp::Truncate(from) => {
                    store.retain(|number, _| *number < from);
                }
            }
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.ops.clear();
        Ok(())
    }
}

impl LogDb for MemLogDb {
    fn new_writer(&self) -> Box<dyn LogWriter> {
        self.writers.fetch_add(1, Ordering::SeqCst);
        Box::new(MemLogWriter {
            store: self.store.clone(),
            fail_writes: self.fail_writes.clone(),
            ops: Vec::new(),
        })
    }

    fn new_writer_sync_off(&self) -> Box<dyn LogWriter> {
        self.sync_off_writers.fetch_add(1, Ordering::SeqCst);
        Box::new(MemLogWriter {
            store: self.store.clone(),
            fail_writes: self.fail_writes.clone(),
            ops: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tx pool

/// Minimal pool: FIFO storage, broadcastable events, and a log of every
/// `add` call so tests can assert how the engine feeds it.
pub struct MemPool {
    txs: Mutex<Vec<Arc<Transaction>>>,
    added: Mutex<Vec<H256>>,
    events: broadcast::Sender<TxEvent>,
}

impl Default for MemPool {
    fn default() -> Self {
        let (events, _) = broadcast::channel(64);
        MemPool {
            txs: Mutex::new(Vec::new()),
            added: Mutex::new(Vec::new()),
            events,
        }
    }
}

impl MemPool {
    pub fn new() -> Self {
        MemPool::default()
    }

    /// Emits a pool event, as the real pool does on classification.
    pub fn emit(&self, tx: Transaction, executable: Option<bool>) {
        let _ = self.events.send(TxEvent {
            tx: Arc::new(tx),
            executable,
        });
    }

    pub fn len(&self) -> usize {
        self.txs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.lock().is_empty()
    }

    pub fn contains_hash(&self, hash: &H256) -> bool {
        self.txs.lock().iter().any(|tx| tx.hash() == *hash)
    }

    /// How many times `add` was called with this transaction.
    pub fn times_added(&self, hash: &H256) -> usize {
        self.added.lock().iter().filter(|h| *h == hash).count()
    }
}

impl TxPool for MemPool {
    fn fill(&self, txs: Vec<Transaction>) {
        let mut stored = self.txs.lock();
        for tx in txs {
            if !stored.iter().any(|existing| existing.hash() == tx.hash()) {
                stored.push(Arc::new(tx));
            }
        }
    }

    fn add(&self, tx: Transaction) -> Result<()> {
        let hash = tx.hash();
        self.added.lock().push(hash);
        let mut stored = self.txs.lock();
        if !stored.iter().any(|existing| existing.hash() == hash) {
            stored.push(Arc::new(tx));
        }
        Ok(())
    }

    fn executables(&self) -> Vec<Arc<Transaction>> {
        self.txs.lock().clone()
    }

    fn remove(&self, hash: &H256, _id: &H256) -> bool {
        let mut stored = self.txs.lock();
        let before = stored.len();
        stored.retain(|tx| tx.hash() != *hash);
        stored.len() != before
    }

    fn subscribe(&self) -> broadcast::Receiver<TxEvent> {
        self.events.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Packer

struct PackerShared {
    target_gas_limit: AtomicU64,
    fail_schedule: AtomicBool,
    /// Seconds added to the base timestamp when planning a slot.
    slot_delay: AtomicU64,
    votes: Mutex<Vec<bool>>,
}

/// Packer stub producing blocks compatible with [`TestConsensus`].
pub struct TestPacker {
    shared: Arc<PackerShared>,
}

impl Default for TestPacker {
    fn default() -> Self {
        TestPacker {
            shared: Arc::new(PackerShared {
                target_gas_limit: AtomicU64::new(TEST_GAS_LIMIT),
                fail_schedule: AtomicBool::new(false),
                slot_delay: AtomicU64::new(0),
                votes: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl TestPacker {
    pub fn new() -> Self {
        TestPacker::default()
    }

    /// Makes `schedule` fail, as for a node outside the authority round.
    pub fn fail_schedule(&self, fail: bool) {
        self.shared.fail_schedule.store(fail, Ordering::SeqCst);
    }

    pub fn set_slot_delay(&self, seconds: u64) {
        self.shared.slot_delay.store(seconds, Ordering::SeqCst);
    }

    pub fn target_gas_limit(&self) -> u64 {
        self.shared.target_gas_limit.load(Ordering::SeqCst)
    }

    /// `should_vote` flags passed to `pack`, in order.
    pub fn votes(&self) -> Vec<bool> {
        self.shared.votes.lock().clone()
    }
}

impl Packer for TestPacker {
    fn schedule(&self, parent: &BlockSummary, base: u64) -> Result<Box<dyn PackFlow>> {
        if self.shared.fail_schedule.load(Ordering::SeqCst) {
            bail!("not scheduled to pack in this round");
        }
        let when = base + self.shared.slot_delay.load(Ordering::SeqCst);
        Ok(Box::new(TestFlow {
            shared: self.shared.clone(),
            parent: parent.header.clone(),
            when,
            gas_limit: self.shared.target_gas_limit.load(Ordering::SeqCst),
            gas_used: 0,
            txs: Vec::new(),
        }))
    }

    fn set_target_gas_limit(&self, limit: u64) {
        self.shared.target_gas_limit.store(limit, Ordering::SeqCst);
    }
}

pub struct TestFlow {
    shared: Arc<PackerShared>,
    parent: Header,
    when: u64,
    gas_limit: u64,
    gas_used: u64,
    txs: Vec<Transaction>,
}

impl PackFlow for TestFlow {
    fn when(&self) -> u64 {
        self.when
    }

    fn number(&self) -> u32 {
        self.parent.number().wrapping_add(1)
    }

    fn parent(&self) -> &Header {
        &self.parent
    }

    fn total_score(&self) -> u64 {
        self.parent.total_score + 1
    }

    fn adopt(&mut self, tx: &Transaction) -> std::result::Result<(), AdoptError> {
        match tx.gas_price_coef {
            COEF_NOT_ADOPTABLE_NOW => return Err(AdoptError::NotAdoptableNow),
            COEF_REJECTED => {
                return Err(AdoptError::Rejected(anyhow!("tx rejected by test flow")))
            }
            _ => {}
        }
        if self.gas_used + tx.gas > self.gas_limit {
            return Err(AdoptError::GasLimitReached);
        }
        self.gas_used += tx.gas;
        self.txs.push(tx.clone());
        Ok(())
    }

    fn pack(
        self: Box<Self>,
        key: &SecretKey,
        _conflicts: u32,
        should_vote: bool,
    ) -> Result<(Block, Box<dyn StateStage>, Vec<Receipt>)> {
        let TestFlow {
            shared,
            parent,
            when,
            txs,
            ..
        } = *self;
        shared.votes.lock().push(should_vote);
        let timestamp = when.max(parent.timestamp + 1);
        let block = build_child_at(&parent, key, txs, 1, timestamp);
        let receipts = receipts_for(&block.transactions);
        let stage = Box::new(MemStage {
            root: block.header.state_root,
        });
        Ok((block, stage, receipts))
    }
}

// ---------------------------------------------------------------------------
// Communicator

/// Channel-backed communicator; tests drive both directions by hand.
pub struct ChannelComm {
    sync_sender: mpsc::Sender<SyncItem>,
    sync_receiver: Mutex<Option<mpsc::Receiver<SyncItem>>>,
    gossip: broadcast::Sender<Arc<Block>>,
    broadcasted: Mutex<Vec<BlockId>>,
    synced: watch::Sender<bool>,
    peers: AtomicUsize,
}

impl Default for ChannelComm {
    fn default() -> Self {
        let (sync_sender, sync_receiver) = mpsc::channel(64);
        let (gossip, _) = broadcast::channel(64);
        let (synced, _) = watch::channel(false);
        ChannelComm {
            sync_sender,
            sync_receiver: Mutex::new(Some(sync_receiver)),
            gossip,
            broadcasted: Mutex::new(Vec::new()),
            synced,
            peers: AtomicUsize::new(1),
        }
    }
}

impl ChannelComm {
    pub fn new() -> Self {
        ChannelComm::default()
    }

    /// Feeds one item into the sync stream.
    pub async fn feed(&self, item: SyncItem) {
        let _ = self.sync_sender.send(item).await;
    }

    /// Delivers a freshly gossiped block.
    pub fn gossip(&self, block: Arc<Block>) {
        let _ = self.gossip.send(block);
    }

    pub fn set_synced(&self, synced: bool) {
        self.synced.send_replace(synced);
    }

    pub fn set_peer_count(&self, count: usize) {
        self.peers.store(count, Ordering::SeqCst);
    }

    /// Ids this node announced, in order.
    pub fn broadcasted(&self) -> Vec<BlockId> {
        self.broadcasted.lock().clone()
    }
}

impl Communicator for ChannelComm {
    fn sync_stream(&self) -> mpsc::Receiver<SyncItem> {
        self.sync_receiver.lock().take().unwrap_or_else(|| {
            // Second caller gets an immediately closed stream.
            let (_sender, receiver) = mpsc::channel(1);
            receiver
        })
    }

    fn subscribe_block(&self) -> broadcast::Receiver<Arc<Block>> {
        self.gossip.subscribe()
    }

    fn broadcast_block(&self, block: Arc<Block>) {
        self.broadcasted.lock().push(block.id());
    }

    fn synced(&self) -> watch::Receiver<bool> {
        self.synced.subscribe()
    }

    fn peer_count(&self) -> usize {
        self.peers.load(Ordering::SeqCst)
    }
}

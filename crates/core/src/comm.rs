//! Boundary to the peer-to-peer communicator.

use basalt_types::Block;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

/// One item on the sync stream.
#[derive(Clone, Debug)]
pub enum SyncItem {
    Block(Arc<Block>),
    /// Throttling tick emitted by the transport; carries no data and is
    /// skipped by the handler.
    KeepAlive,
}

/// The peer communicator as seen from the engine.
pub trait Communicator: Send + Sync {
    /// Opens the stream of blocks downloaded by the sync protocol. The
    /// stream is drained serially, which is the transport's back-pressure.
    /// The node opens exactly one stream for its lifetime.
    fn sync_stream(&self) -> mpsc::Receiver<SyncItem>;

    /// Subscription to blocks freshly gossiped by peers.
    fn subscribe_block(&self) -> broadcast::Receiver<Arc<Block>>;

    /// Announces a block to peers.
    fn broadcast_block(&self, block: Arc<Block>);

    /// Flips to `true` once the initial synchronization is done.
    fn synced(&self) -> watch::Receiver<bool>;

    fn peer_count(&self) -> usize;
}

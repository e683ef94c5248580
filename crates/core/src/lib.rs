//! basalt-core
//!
//! The block-processing engine of a Basalt node: a serialized pipeline that
//! admits blocks from the network and from the local proposer, validates
//! them against consensus and the BFT finality overlay, commits state,
//! receipts and indexed logs atomically, maintains the canonical chain
//! under forks, and produces new blocks on the local authority's POA turn.
//!
//! Every collaborator that is not the engine itself (chain repository,
//! consensus rules, BFT vote engine, packer, transaction pool, peer
//! communicator, log database) is injected through a narrow trait so the
//! engine can be exercised hermetically.

pub mod bft;
pub mod chain;
pub mod comm;
pub mod consensus;
pub mod logdb;
pub mod node;
pub mod packer;
pub mod pool;
pub mod state;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use node::{Node, ProcessError};

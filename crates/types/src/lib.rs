//! Chain primitives shared by every Basalt crate.
//!
//! Everything on the wire and on disk is RLP; block and transaction
//! identifiers are Blake2b-256 based. Block ids carry the block number in
//! their top four bytes so chain code can order blocks without decoding
//! headers.

mod block;
mod hash;
mod receipt;
mod transaction;

pub use block::{Block, BlockId, BlockSummary, Header};
pub use hash::blake2b256;
pub use receipt::{Event, Output, Receipt, Transfer};
pub use transaction::{key_address, Clause, SignatureError, Transaction};

pub use primitive_types::{H160, H256, U256};

/// An account address, the trailing 20 bytes of the Blake2b-256 hash of the
/// uncompressed public key.
pub type Address = H160;

use crate::hash::blake2b256;
use crate::transaction::{recover_signer, sign_digest, SignatureError};
use crate::{Address, Transaction};
use primitive_types::H256;
use rlp::{DecoderError, Encodable, Rlp, RlpStream};
use secp256k1::SecretKey;
use std::fmt;

/// A block identifier: the Blake2b-256 hash of the encoded header with the
/// block number spliced over the top four bytes (big-endian).
///
/// The number prefix makes ids orderable by height without any decoding;
/// byte-wise ordering therefore sorts by number first.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(H256);

impl BlockId {
    pub fn new(number: u32, hash: H256) -> Self {
        let mut raw = hash;
        raw.0[..4].copy_from_slice(&number.to_be_bytes());
        BlockId(raw)
    }

    /// Parent id carried by the genesis header. Its number field wraps so
    /// that the genesis block itself sits at height 0.
    pub fn genesis_parent(chain_tag: u8) -> Self {
        let mut raw = H256::zero();
        raw.0[31] = chain_tag;
        BlockId::new(u32::MAX, raw)
    }

    /// Block height encoded in the top four bytes.
    pub fn number(&self) -> u32 {
        u32::from_be_bytes(self.0 .0[..4].try_into().expect("id has 32 bytes"))
    }

    pub fn as_h256(&self) -> &H256 {
        &self.0
    }
}

impl From<H256> for BlockId {
    fn from(raw: H256) -> Self {
        BlockId(raw)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}…{}", self.number(), hex::encode(&self.0 .0[28..]))
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId(0x{})", hex::encode(self.0 .0))
    }
}

impl Encodable for BlockId {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.append(&self.0);
    }
}

impl rlp::Decodable for BlockId {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(BlockId(rlp.as_val()?))
    }
}

/// A signed block header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub parent_id: BlockId,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    /// Accumulated proposer score along this chain; the fork-choice weight
    /// before the finality engine takes over.
    pub total_score: u64,
    pub txs_root: H256,
    pub state_root: H256,
    pub receipts_root: H256,
    pub signature: Vec<u8>,
}

impl Header {
    /// Height of this block, derived from the parent id.
    pub fn number(&self) -> u32 {
        self.parent_id.number().wrapping_add(1)
    }

    /// Digest covered by the proposer's signature.
    pub fn signing_hash(&self) -> H256 {
        let mut s = RlpStream::new_list(8);
        s.append(&self.parent_id);
        s.append(&self.timestamp);
        s.append(&self.gas_limit);
        s.append(&self.gas_used);
        s.append(&self.total_score);
        s.append(&self.txs_root);
        s.append(&self.state_root);
        s.append(&self.receipts_root);
        blake2b256(&[s.as_raw()])
    }

    /// The block id; covers the signature.
    pub fn id(&self) -> BlockId {
        let encoded = rlp::encode(self);
        BlockId::new(self.number(), blake2b256(&[encoded.as_ref()]))
    }

    /// The authority that produced this block.
    pub fn signer(&self) -> Result<Address, SignatureError> {
        recover_signer(self.signing_hash(), &self.signature)
    }

    pub fn sign(mut self, key: &SecretKey) -> Self {
        self.signature = sign_digest(self.signing_hash(), key);
        self
    }
}

impl Encodable for Header {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(9);
        s.append(&self.parent_id);
        s.append(&self.timestamp);
        s.append(&self.gas_limit);
        s.append(&self.gas_used);
        s.append(&self.total_score);
        s.append(&self.txs_root);
        s.append(&self.state_root);
        s.append(&self.receipts_root);
        s.append(&self.signature);
    }
}

impl rlp::Decodable for Header {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 9 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Header {
            parent_id: rlp.val_at(0)?,
            timestamp: rlp.val_at(1)?,
            gas_limit: rlp.val_at(2)?,
            gas_used: rlp.val_at(3)?,
            total_score: rlp.val_at(4)?,
            txs_root: rlp.val_at(5)?,
            state_root: rlp.val_at(6)?,
            receipts_root: rlp.val_at(7)?,
            signature: rlp.val_at(8)?,
        })
    }
}

/// A full block: header plus the ordered transaction list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Block {
            header,
            transactions,
        }
    }

    pub fn id(&self) -> BlockId {
        self.header.id()
    }

    pub fn number(&self) -> u32 {
        self.header.number()
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> u64 {
        rlp::encode(self).len() as u64
    }

    /// Root committing to the transaction list, for use in [`Header::txs_root`].
    pub fn compute_txs_root(transactions: &[Transaction]) -> H256 {
        let mut s = RlpStream::new_list(transactions.len());
        for tx in transactions {
            s.append(&tx.hash());
        }
        blake2b256(&[s.as_raw()])
    }
}

impl Encodable for Block {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.header);
        s.append_list(&self.transactions);
    }
}

impl rlp::Decodable for Block {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Block {
            header: rlp.val_at(0)?,
            transactions: rlp.list_at(1)?,
        })
    }
}

/// The repository's lightweight handle on a stored block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockSummary {
    pub header: Header,
    /// Ids of the block's transactions, in block order.
    pub tx_ids: Vec<H256>,
    /// Encoded size of the full block in bytes.
    pub size: u64,
    /// Number of other blocks stored at the same height when this block was
    /// added; doubles as the trie partition discriminator.
    pub conflicts: u32,
}

impl BlockSummary {
    pub fn id(&self) -> BlockId {
        self.header.id()
    }

    pub fn number(&self) -> u32 {
        self.header.number()
    }
}

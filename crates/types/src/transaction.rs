use crate::hash::blake2b256;
use crate::Address;
use primitive_types::{H256, U256};
use rlp::{DecoderError, Encodable, Rlp, RlpStream};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, SecretKey, SECP256K1};

/// Length of a recoverable secp256k1 signature: 64 compact bytes plus the
/// recovery id.
const SIGNATURE_LEN: usize = 65;

#[derive(thiserror::Error, Debug)]
pub enum SignatureError {
    #[error("signature must be {SIGNATURE_LEN} bytes, got {0}")]
    InvalidLength(usize),
    #[error("invalid recovery id {0}")]
    InvalidRecoveryId(u8),
    #[error("signature recovery failed: {0}")]
    Recovery(#[from] secp256k1::Error),
}

/// Recovers the signing address from a 65-byte recoverable signature over
/// `digest`.
pub(crate) fn recover_signer(digest: H256, signature: &[u8]) -> Result<Address, SignatureError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(SignatureError::InvalidLength(signature.len()));
    }
    let recovery_id = RecoveryId::from_i32(signature[64] as i32)
        .map_err(|_| SignatureError::InvalidRecoveryId(signature[64]))?;
    let sig = RecoverableSignature::from_compact(&signature[..64], recovery_id)?;
    let public_key = SECP256K1.recover_ecdsa(&Message::from_digest(digest.0), &sig)?;
    Ok(address_of(&public_key.serialize_uncompressed()))
}

/// Signs `digest` with `key`, producing the 65-byte recoverable form.
pub(crate) fn sign_digest(digest: H256, key: &SecretKey) -> Vec<u8> {
    let sig = SECP256K1.sign_ecdsa_recoverable(&Message::from_digest(digest.0), key);
    let (recovery_id, compact) = sig.serialize_compact();
    let mut out = Vec::with_capacity(SIGNATURE_LEN);
    out.extend_from_slice(&compact);
    out.push(recovery_id.to_i32() as u8);
    out
}

fn address_of(uncompressed_public_key: &[u8; 65]) -> Address {
    // Skip the 0x04 prefix; the address is the tail of the key hash.
    let hash = blake2b256(&[&uncompressed_public_key[1..]]);
    Address::from_slice(&hash[12..])
}

/// Address controlled by `key`.
pub fn key_address(key: &SecretKey) -> Address {
    let public_key = key.public_key(SECP256K1);
    address_of(&public_key.serialize_uncompressed())
}

/// A single call carried by a transaction. `to = None` deploys a contract.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Clause {
    pub to: Option<Address>,
    pub value: U256,
    pub data: Vec<u8>,
}

impl Encodable for Clause {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        match &self.to {
            Some(to) => s.append(&to.as_bytes().to_vec()),
            None => s.append_empty_data(),
        };
        s.append(&self.value);
        s.append(&self.data);
    }
}

impl rlp::Decodable for Clause {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        let to_bytes: Vec<u8> = rlp.val_at(0)?;
        let to = match to_bytes.len() {
            0 => None,
            20 => Some(Address::from_slice(&to_bytes)),
            _ => return Err(DecoderError::Custom("clause recipient must be 0 or 20 bytes")),
        };
        Ok(Clause {
            to,
            value: rlp.val_at(1)?,
            data: rlp.val_at(2)?,
        })
    }
}

/// A signed Basalt transaction.
///
/// Two distinct digests identify a transaction: [`Transaction::hash`]
/// digests the raw encoding and serves as a storage key (e.g. in the tx
/// stash), while [`Transaction::id`] binds the signing digest to the
/// signer and is used for on-chain dedup and pool bookkeeping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transaction {
    pub chain_tag: u8,
    /// Number of blocks from the head within which this tx may be included.
    pub expiration: u32,
    pub gas_price_coef: u8,
    pub gas: u64,
    pub nonce: u64,
    pub clauses: Vec<Clause>,
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Digest the sender signs: everything except the signature itself.
    pub fn signing_hash(&self) -> H256 {
        let mut s = RlpStream::new_list(6);
        s.append(&self.chain_tag);
        s.append(&self.expiration);
        s.append(&self.gas_price_coef);
        s.append(&self.gas);
        s.append(&self.nonce);
        s.append_list(&self.clauses);
        blake2b256(&[s.as_raw()])
    }

    /// Hash of the full raw encoding.
    pub fn hash(&self) -> H256 {
        let encoded = rlp::encode(self);
        blake2b256(&[encoded.as_ref()])
    }

    /// Canonical transaction id: the signing digest bound to the signer.
    pub fn id(&self) -> Result<H256, SignatureError> {
        let signer = self.signer()?;
        Ok(blake2b256(&[self.signing_hash().as_bytes(), signer.as_bytes()]))
    }

    pub fn signer(&self) -> Result<Address, SignatureError> {
        recover_signer(self.signing_hash(), &self.signature)
    }

    pub fn sign(mut self, key: &SecretKey) -> Self {
        self.signature = sign_digest(self.signing_hash(), key);
        self
    }

    /// Total intrinsic size of the encoded transaction in bytes.
    pub fn size(&self) -> u64 {
        rlp::encode(self).len() as u64
    }
}

impl Encodable for Transaction {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(7);
        s.append(&self.chain_tag);
        s.append(&self.expiration);
        s.append(&self.gas_price_coef);
        s.append(&self.gas);
        s.append(&self.nonce);
        s.append_list(&self.clauses);
        s.append(&self.signature);
    }
}

impl rlp::Decodable for Transaction {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 7 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Transaction {
            chain_tag: rlp.val_at(0)?,
            expiration: rlp.val_at(1)?,
            gas_price_coef: rlp.val_at(2)?,
            gas: rlp.val_at(3)?,
            nonce: rlp.val_at(4)?,
            clauses: rlp.list_at(5)?,
            signature: rlp.val_at(6)?,
        })
    }
}

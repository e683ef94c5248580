use crate::hash::blake2b256;
use crate::Address;
use primitive_types::{H256, U256};
use rlp::{DecoderError, Encodable, Rlp, RlpStream};

/// A contract event emitted while executing a clause.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Event {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

impl Encodable for Event {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&self.address);
        s.append_list(&self.topics);
        s.append(&self.data);
    }
}

impl rlp::Decodable for Event {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Event {
            address: rlp.val_at(0)?,
            topics: rlp.list_at(1)?,
            data: rlp.val_at(2)?,
        })
    }
}

/// A native-token transfer observed while executing a clause.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transfer {
    pub sender: Address,
    pub recipient: Address,
    pub amount: U256,
}

impl Encodable for Transfer {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&self.sender);
        s.append(&self.recipient);
        s.append(&self.amount);
    }
}

impl rlp::Decodable for Transfer {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Transfer {
            sender: rlp.val_at(0)?,
            recipient: rlp.val_at(1)?,
            amount: rlp.val_at(2)?,
        })
    }
}

/// Per-clause execution output destined for the log index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Output {
    pub events: Vec<Event>,
    pub transfers: Vec<Transfer>,
}

impl Encodable for Output {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append_list(&self.events);
        s.append_list(&self.transfers);
    }
}

impl rlp::Decodable for Output {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Output {
            events: rlp.list_at(0)?,
            transfers: rlp.list_at(1)?,
        })
    }
}

/// Execution receipt of a single transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Receipt {
    pub gas_used: u64,
    pub gas_payer: Address,
    /// Amount paid for gas, in wei.
    pub paid: U256,
    pub reverted: bool,
    /// One output per clause; empty when the transaction reverted.
    pub outputs: Vec<Output>,
}

impl Receipt {
    /// Root committing to a block's receipt list.
    pub fn compute_receipts_root(receipts: &[Receipt]) -> H256 {
        let mut s = RlpStream::new_list(receipts.len());
        for receipt in receipts {
            s.append(receipt);
        }
        blake2b256(&[s.as_raw()])
    }
}

impl Encodable for Receipt {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(5);
        s.append(&self.gas_used);
        s.append(&self.gas_payer);
        s.append(&self.paid);
        s.append(&self.reverted);
        s.append_list(&self.outputs);
    }
}

impl rlp::Decodable for Receipt {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 5 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Receipt {
            gas_used: rlp.val_at(0)?,
            gas_payer: rlp.val_at(1)?,
            paid: rlp.val_at(2)?,
            reverted: rlp.val_at(3)?,
            outputs: rlp.list_at(4)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipts_root_is_order_sensitive() {
        let a = Receipt {
            gas_used: 21000,
            ..Default::default()
        };
        let b = Receipt {
            gas_used: 42000,
            reverted: true,
            ..Default::default()
        };
        assert_ne!(
            Receipt::compute_receipts_root(&[a.clone(), b.clone()]),
            Receipt::compute_receipts_root(&[b, a])
        );
    }
}

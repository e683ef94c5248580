use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use primitive_types::H256;

type Blake2b256 = Blake2b<U32>;

/// Blake2b-256 over the concatenation of `parts`.
pub fn blake2b256(parts: &[&[u8]]) -> H256 {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }
    H256(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_input_hashes_like_contiguous_input() {
        let whole = blake2b256(&[b"basalt block"]);
        let split = blake2b256(&[b"basalt ", b"block"]);
        assert_eq!(whole, split);
        assert_ne!(whole, blake2b256(&[b"basalt block "]));
    }
}

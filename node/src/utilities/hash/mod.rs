use digest::consts::U32;
use digest::Digest;

pub type HashType = [u8; 32];

pub fn blake2_256(data: &[u8]) -> HashType {
    let mut dest = [0; 32];
    type Blake2b256 = blake2::Blake2b<U32>;
    dest.copy_from_slice(Blake2b256::digest(data).as_slice());
    dest
}

/// Hashes the concatenation of two byte strings without allocating.
pub fn blake2_256_chain(left: &[u8], right: &[u8]) -> HashType {
    let mut dest = [0; 32];
    type Blake2b256 = blake2::Blake2b<U32>;
    let mut hasher = Blake2b256::new();
    hasher.update(left);
    hasher.update(right);
    dest.copy_from_slice(hasher.finalize().as_slice());
    dest
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_chain_matches_concatenation() {
        let joined = [b"left".as_slice(), b"right".as_slice()].concat();
        assert_eq!(blake2_256(&joined), blake2_256_chain(b"left", b"right"));
        assert_ne!(blake2_256(b"left"), blake2_256(b"right"));
    }
}

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::crypto::{Keypair, PublicKey, Signature};
use crate::utilities::encoding::{Decode, Encode};
use crate::utilities::{blake2_256, encoding, HashType};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlockBody {
    pub index: u64,
    pub round_received: i64,
    pub transactions: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Block {
    pub body: BlockBody,
    pub signatures: BTreeMap<PublicKey, Signature>,
}

impl Block {
    pub fn new(index: u64, round_received: i64, transactions: Vec<Vec<u8>>) -> Self {
        Self {
            body: BlockBody {
                index,
                round_received,
                transactions,
            },
            signatures: BTreeMap::new(),
        }
    }

    pub fn index(&self) -> u64 {
        self.body.index
    }

    pub fn round_received(&self) -> i64 {
        self.body.round_received
    }

    pub fn transactions(&self) -> &[Vec<u8>] {
        &self.body.transactions
    }

    /// Hash of the body only, so collecting signatures doesn't change it.
    pub fn hash(&self) -> anyhow::Result<HashType> {
        let bytes = encoding::encode(&self.body)?;
        Ok(blake2_256(&bytes))
    }

    pub fn sign(&self, keypair: &Keypair) -> anyhow::Result<BlockSignature> {
        let hash = self.hash()?;
        Ok(BlockSignature {
            validator: keypair.public_key(),
            index: self.index(),
            signature: keypair.sign(hash),
        })
    }

    pub fn verify(&self, signature: &BlockSignature) -> anyhow::Result<bool> {
        if signature.index != self.index() {
            return Ok(false);
        }
        let hash = self.hash()?;
        Ok(signature.validator.verify(hash, &signature.signature))
    }

    pub fn set_signature(&mut self, signature: BlockSignature) {
        self.signatures
            .insert(signature.validator, signature.signature);
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "index: {}, round received: {}, nr of transactions: {}, nr of signatures: {}",
            self.index(),
            self.round_received(),
            self.body.transactions.len(),
            self.signatures.len()
        )
    }
}

impl Encode for Block {
    fn encode(&self) -> anyhow::Result<Vec<u8>> {
        encoding::encode(self)
    }
}

impl Decode for Block {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        encoding::decode(bytes)
    }
}

/// A validator's signature over the hash of the block with `index`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct BlockSignature {
    pub validator: PublicKey,
    pub index: u64,
    pub signature: Signature,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_block_signature() {
        let keypair = Keypair::generate(None);
        let mut block = Block::new(3, 7, vec![b"tx1".to_vec(), b"tx2".to_vec()]);
        let hash = block.hash().unwrap();

        let signature = block.sign(&keypair).unwrap();
        assert_eq!(signature.index, 3);
        assert!(block.verify(&signature).unwrap());

        block.set_signature(signature);
        assert_eq!(block.hash().unwrap(), hash);
        assert_eq!(block.signatures.len(), 1);
    }

    #[test]
    fn test_signature_for_other_block_is_rejected() {
        let keypair = Keypair::generate(None);
        let first = Block::new(0, 1, vec![b"tx".to_vec()]);
        let second = Block::new(0, 1, vec![b"other".to_vec()]);

        let signature = first.sign(&keypair).unwrap();
        assert!(!second.verify(&signature).unwrap());

        let mut moved = signature;
        moved.index = 1;
        assert!(!first.verify(&moved).unwrap());
    }

    #[test]
    fn test_encoding() {
        let keypair = Keypair::generate(None);
        let mut block = Block::new(1, 2, vec![b"tx".to_vec()]);
        block.set_signature(block.sign(&keypair).unwrap());

        let decoded = Block::decode(&block.encode().unwrap()).unwrap();
        assert_eq!(block, decoded);
    }
}

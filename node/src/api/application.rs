use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::block::Block;
use crate::utilities::hash::blake2_256_chain;
use crate::utilities::HashType;

#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("ApplicationError::GeneralError: {0}")]
    GeneralError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ApplicationError>;

/// Receives the blocks agreed on by the hashgraph.
///
/// Notes:
/// A) Blocks arrive in index order, each exactly once per node run.
/// B) The call is made from the delivery task, it should not block for long.
/// C) It should not panic
pub trait Application: Send + Sync {
    /// Applies the block and returns the resulting state hash.
    fn commit_block(&self, block: &Block) -> Result<HashType>;
}

#[derive(Debug, Default)]
struct InmemState {
    state_hash: HashType,
    committed_transactions: Vec<Vec<u8>>,
    state_hashes: Vec<HashType>,
}

/// Keeps every committed transaction and folds them into a running state hash.
///
/// Clones share the same state, so a copy can be kept to inspect what the node delivered.
#[derive(Debug, Clone, Default)]
pub struct InmemApplication {
    state: Arc<Mutex<InmemState>>,
}

impl InmemApplication {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_hash(&self) -> HashType {
        self.state.lock().state_hash
    }

    pub fn committed_transactions(&self) -> Vec<Vec<u8>> {
        self.state.lock().committed_transactions.clone()
    }

    /// State hash after each committed block.
    pub fn state_hashes(&self) -> Vec<HashType> {
        self.state.lock().state_hashes.clone()
    }
}

impl Application for InmemApplication {
    fn commit_block(&self, block: &Block) -> Result<HashType> {
        log::trace!("InmemApplication::commit_block: {}", block);
        let mut state = self.state.lock();
        for tx in block.transactions() {
            state.state_hash = blake2_256_chain(&state.state_hash, tx);
            state.committed_transactions.push(tx.clone());
        }
        let state_hash = state.state_hash;
        state.state_hashes.push(state_hash);
        Ok(state_hash)
    }
}

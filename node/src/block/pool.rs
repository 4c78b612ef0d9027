use crate::block::BlockSignature;

/// Transactions and block signatures waiting to be packed into the next self event.
#[derive(Debug, Clone, Default)]
pub(crate) struct TransactionPool {
    transactions: Vec<Vec<u8>>,
    block_signatures: Vec<BlockSignature>,
}

impl TransactionPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_transactions(&mut self, transactions: Vec<Vec<u8>>) {
        log::trace!("Adding {} transactions to pool", transactions.len());
        self.transactions.extend(transactions);
        log::trace!("Transaction pool size: {}", self.transactions.len());
    }

    pub(crate) fn add_block_signature(&mut self, signature: BlockSignature) {
        if self.block_signatures.contains(&signature) {
            log::warn!("Block signature already in pool: {:?}", signature);
            return;
        }
        self.block_signatures.push(signature);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.transactions.is_empty() && self.block_signatures.is_empty()
    }

    pub(crate) fn transactions_len(&self) -> usize {
        self.transactions.len()
    }

    /// Empties the pool. The order in which transactions were added is kept.
    pub(crate) fn take(&mut self) -> (Vec<Vec<u8>>, Vec<BlockSignature>) {
        (
            std::mem::take(&mut self.transactions),
            std::mem::take(&mut self.block_signatures),
        )
    }
}

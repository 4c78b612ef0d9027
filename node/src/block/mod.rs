//! # Blocks
//!
//! A block is the unit in which ordered transactions leave consensus. Every time `FindOrder`
//! assigns a round received to a batch of events, the transactions of those events are grouped
//! per round received and each non-empty group becomes exactly one block with the next index.
//!
//! Blocks carry no parent link. Their position is fixed by the block index and the round
//! they were received in, both of which are identical on every honest node.
//!
//! ## Block signatures
//!
//! After an application commits a block, the node signs the block hash and gossips the signature
//! inside its next event. Other nodes collect signatures from incoming events in a signature pool
//! and attach them to their own copy of the block once it exists locally. A signature for a block
//! which hasn't been produced yet stays in the pool until a later consensus run creates it.

pub(crate) mod pool;
pub(crate) mod types;

pub use types::block::{Block, BlockBody, BlockSignature};

//! Storage of events, rounds, roots and blocks.
//!
//! The hashgraph only talks to the [`Store`] trait. The in-memory implementation keeps a bounded
//! window of recent data per participant and evicts events only after they have reached consensus.
//!
//! All mutations between `begin_tx` and `commit_tx` can be undone with `rollback_tx`.
//! Transactions nest: committing an inner transaction folds it into the outer one.

use std::collections::BTreeMap;
use std::fmt::Display;

use thiserror::Error;

use crate::block::Block;
use crate::crypto::PublicKey;
use crate::hashgraph::event::{Event, EventHash};
use crate::hashgraph::participants::Participants;
use crate::hashgraph::root::Root;
use crate::hashgraph::round::RoundInfo;

pub(crate) mod inmem;
pub(crate) mod rolling_index;

pub use inmem::InmemStore;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    KeyNotFound,
    TooLate,
    PassedIndex,
    SkippedIndex,
    NoRoot,
    UnknownParticipant,
    Empty,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{component}: {kind:?}, key: {key}")]
pub struct StoreError {
    pub component: &'static str,
    pub kind: StoreErrorKind,
    pub key: String,
}

impl StoreError {
    pub fn new<K: Display>(component: &'static str, kind: StoreErrorKind, key: K) -> Self {
        StoreError {
            component,
            kind,
            key: key.to_string(),
        }
    }

    pub fn is(&self, kind: StoreErrorKind) -> bool {
        self.kind == kind
    }
}

pub trait Store: Send + Sync {
    fn cache_size(&self) -> usize;

    fn participants(&self) -> &Participants;

    fn contains_event(&self, hash: &EventHash) -> bool;

    fn get_event(&self, hash: &EventHash) -> Result<&Event>;

    /// Inserts a new event or replaces the stored copy of an existing one.
    fn set_event(&mut self, event: Event) -> Result<()>;

    /// Hashes of the participant's events with index greater than `skip`, oldest first.
    fn participant_events(&self, participant: &PublicKey, skip: i64) -> Result<Vec<EventHash>>;

    fn participant_event(&self, participant: &PublicKey, index: i64) -> Result<EventHash>;

    /// Last event of the participant. The flag is set when the answer comes from its root.
    fn last_event_from(&self, participant: &PublicKey) -> Result<(Option<EventHash>, bool)>;

    /// Index of the participant's last known event, -1 if there is none.
    fn last_index(&self, participant: &PublicKey) -> Result<i64>;

    /// Last known index per participant id.
    fn known_events(&self) -> BTreeMap<usize, i64>;

    /// Most recent consensus events, in consensus order.
    fn consensus_events(&self) -> Vec<EventHash>;

    fn consensus_events_count(&self) -> usize;

    fn add_consensus_event(&mut self, hash: EventHash) -> Result<()>;

    fn get_round(&self, round: i64) -> Result<RoundInfo>;

    fn set_round(&mut self, round: i64, info: RoundInfo) -> Result<()>;

    /// Highest round with stored events, -1 if none.
    fn last_round(&self) -> i64;

    /// Drops every round below `before`. Their witnesses are no longer kept for round computation.
    fn prune_rounds(&mut self, before: i64);

    fn round_witnesses(&self, round: i64) -> Vec<EventHash>;

    fn round_events(&self, round: i64) -> usize;

    fn get_root(&self, participant: &PublicKey) -> Result<Root>;

    fn get_block(&self, index: u64) -> Result<Block>;

    fn set_block(&mut self, block: Block) -> Result<()>;

    /// Last stored block index, if any.
    fn last_block_index(&self) -> Option<u64>;

    /// Drops all events and rounds and restarts every participant from the given roots.
    fn reset(&mut self, roots: BTreeMap<PublicKey, Root>) -> Result<()>;

    fn begin_tx(&mut self);

    fn commit_tx(&mut self);

    fn rollback_tx(&mut self);
}

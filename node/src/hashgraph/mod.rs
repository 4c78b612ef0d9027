//! # Hashgraph
//!
//! Virtual-voting consensus over a DAG of signed events. Every participant gossips the events it
//! knows about and packs its own transactions into new events whose parents are its previous event
//! and the last event received from a peer. Consensus is then computed locally, from the graph
//! alone, in three passes:
//!
//! 1. `divide_rounds` assigns a round to every new event and marks the witnesses, the first event
//!    of each participant in a round.
//! 2. `decide_fame` lets witnesses of later rounds vote on whether each witness is famous.
//! 3. `find_order` gives every event which is seen by famous witnesses of a decided round a round
//!    received and a consensus timestamp, sorts them and emits one block per round received.
//!
//! The passes only read the graph and previous decisions, so every node with the same events reaches
//! exactly the same order.

use std::collections::BTreeSet;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::block::{Block, BlockSignature};
use crate::crypto::PublicKey;
use crate::hashgraph::event::{Event, EventCoordinates, EventError, EventHash};
use crate::hashgraph::participants::Participants;
use crate::hashgraph::round::{Fame, FameDecidedError};
use crate::storage::{Store, StoreError, StoreErrorKind};

pub(crate) mod event;
pub(crate) mod fame;
pub(crate) mod frame;
pub(crate) mod order;
pub(crate) mod participants;
pub(crate) mod root;
pub(crate) mod round;
pub(crate) mod rounds;

pub use event::{EventBody, Received, WireEvent};
pub use frame::Frame;
pub use root::Root;
pub use round::RoundInfo;

pub type Result<T> = std::result::Result<T, HashgraphError>;

#[derive(Error, Debug)]
pub enum HashgraphError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Event error: {0}")]
    Event(#[from] EventError),
    #[error("Fame error: {0}")]
    Fame(#[from] FameDecidedError),
    #[error("Unknown participant {0}")]
    UnknownParticipant(PublicKey),
    #[error("Invalid signature on event {0}")]
    InvalidSignature(EventHash),
    #[error("Event {hash} has self parent {got:?}, expected {expected:?}")]
    InvalidSelfParent {
        hash: EventHash,
        expected: Option<EventHash>,
        got: Option<EventHash>,
    },
    #[error("Event {hash} has unknown other parent {other_parent}")]
    UnknownOtherParent {
        hash: EventHash,
        other_parent: EventHash,
    },
    #[error("Event {0} has no round yet")]
    MissingRound(EventHash),
    #[error("General error: {0}")]
    General(#[from] anyhow::Error),
}

/// Bookkeeping which lives outside the store and is restored on rollback.
#[derive(Debug, Clone, Default)]
struct ConsensusState {
    undetermined_events: Vec<EventHash>,
    undecided_rounds: BTreeSet<i64>,
    last_consensus_round: Option<i64>,
    last_committed_round_events: usize,
    consensus_transactions: usize,
    pending_loaded_events: usize,
    topological_index: usize,
    sig_pool: Vec<BlockSignature>,
    pending_blocks: Vec<Block>,
}

pub struct Hashgraph {
    participants: Participants,
    store: Box<dyn Store>,
    super_majority: usize,
    coin_round_frequency: i64,
    commit_tx: Option<UnboundedSender<Block>>,
    state: ConsensusState,
    checkpoints: Vec<ConsensusState>,
}

impl Hashgraph {
    /// Blocks are sent to `commit_tx` once the transaction that produced them commits.
    /// Coin rounds default to the number of participants, but never fewer than every second round.
    pub fn new(
        participants: Participants,
        store: Box<dyn Store>,
        commit_tx: Option<UnboundedSender<Block>>,
        coin_round_frequency: Option<usize>,
    ) -> Self {
        let super_majority = participants.super_majority();
        let coin_round_frequency = coin_round_frequency
            .unwrap_or_else(|| participants.len())
            .max(2) as i64;
        Hashgraph {
            participants,
            store,
            super_majority,
            coin_round_frequency,
            commit_tx,
            state: ConsensusState::default(),
            checkpoints: vec![],
        }
    }

    pub fn participants(&self) -> &Participants {
        &self.participants
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub(crate) fn store_mut(&mut self) -> &mut dyn Store {
        self.store.as_mut()
    }

    pub fn super_majority(&self) -> usize {
        self.super_majority
    }

    /// Validates and inserts an event.
    ///
    /// Inserting an event which is already known is a no-op and returns false. `trusted` skips
    /// signature verification for events this node has just signed itself.
    pub fn insert_event(&mut self, mut event: Event, trusted: bool) -> Result<bool> {
        let hash = event.hash();
        if self.store.contains_event(&hash) {
            log::debug!("Event {:?} already inserted", hash);
            return Ok(false);
        }

        let creator = *event.creator();
        let creator_id = self
            .participants
            .id(&creator)
            .ok_or(HashgraphError::UnknownParticipant(creator))?;

        if !trusted && !event.verify() {
            return Err(HashgraphError::InvalidSignature(hash));
        }
        self.check_index(&event)?;
        self.check_self_parent(&event)?;
        self.check_other_parent(&event)?;

        self.init_event_coordinates(&mut event, creator_id);
        event.topological_index = self.state.topological_index;

        let coordinates = EventCoordinates {
            hash: Some(hash),
            index: event.index(),
        };
        let last_ancestors = event.last_ancestors.clone();
        let loaded = event.is_loaded();
        let block_signatures = event.block_signatures().to_vec();

        log::trace!("Inserting event {}", event);
        self.store.set_event(event)?;
        self.state.topological_index += 1;

        self.update_ancestor_first_descendant(creator_id, coordinates, &last_ancestors)?;

        self.state.undetermined_events.push(hash);
        if loaded {
            self.state.pending_loaded_events += 1;
        }
        self.state.sig_pool.extend(block_signatures);
        Ok(true)
    }

    fn check_index(&self, event: &Event) -> Result<()> {
        let expected = self.store.last_index(event.creator())? + 1;
        let kind = if event.index() < expected {
            StoreErrorKind::PassedIndex
        } else if event.index() > expected {
            StoreErrorKind::SkippedIndex
        } else {
            return Ok(());
        };
        Err(StoreError::new("Hashgraph", kind, event.index()).into())
    }

    fn check_self_parent(&self, event: &Event) -> Result<()> {
        let (last, _) = self.store.last_event_from(event.creator())?;
        if event.self_parent() != last {
            return Err(HashgraphError::InvalidSelfParent {
                hash: event.hash(),
                expected: last,
                got: event.self_parent(),
            });
        }
        Ok(())
    }

    fn check_other_parent(&self, event: &Event) -> Result<()> {
        let Some(other_parent) = event.other_parent() else {
            return Ok(());
        };
        if self.store.contains_event(&other_parent) {
            return Ok(());
        }
        // Other parents outside the stored graph are only accepted when a root vouches for them
        let root = self.store.get_root(event.creator())?;
        if root.y == Some(other_parent) && event.self_parent() == root.x {
            return Ok(());
        }
        if root.others.get(&event.hash()) == Some(&other_parent) {
            return Ok(());
        }
        Err(HashgraphError::UnknownOtherParent {
            hash: event.hash(),
            other_parent,
        })
    }

    fn init_event_coordinates(&self, event: &mut Event, creator_id: usize) {
        let members = self.participants.len();
        let mut last_ancestors = vec![EventCoordinates::NO_ANCESTOR; members];

        for parent in [event.self_parent(), event.other_parent()]
            .into_iter()
            .flatten()
        {
            if let Ok(parent) = self.store.get_event(&parent) {
                for (mine, theirs) in last_ancestors.iter_mut().zip(&parent.last_ancestors) {
                    if theirs.index > mine.index {
                        *mine = *theirs;
                    }
                }
            }
        }

        let coordinates = EventCoordinates {
            hash: Some(event.hash()),
            index: event.index(),
        };
        last_ancestors[creator_id] = coordinates;

        let mut first_descendants = vec![EventCoordinates::NO_DESCENDANT; members];
        first_descendants[creator_id] = coordinates;

        event.last_ancestors = last_ancestors;
        event.first_descendants = first_descendants;
    }

    /// Walks back every last ancestor's self-parent chain and records the new event as the first
    /// descendant from its creator, stopping at the first ancestor which already has one.
    fn update_ancestor_first_descendant(
        &mut self,
        creator_id: usize,
        coordinates: EventCoordinates,
        last_ancestors: &[EventCoordinates],
    ) -> Result<()> {
        for ancestor in last_ancestors {
            let mut cursor = ancestor.hash;
            while let Some(hash) = cursor {
                let Ok(ancestor) = self.store.get_event(&hash) else {
                    break;
                };
                if ancestor.first_descendants[creator_id].index != i64::MAX {
                    break;
                }
                let mut ancestor = ancestor.clone();
                ancestor.first_descendants[creator_id] = coordinates;
                cursor = ancestor.self_parent();
                self.store.set_event(ancestor)?;
            }
        }
        Ok(())
    }

    pub fn get_event(&self, hash: &EventHash) -> Result<&Event> {
        Ok(self.store.get_event(hash)?)
    }

    /// Fame of a witness, `Undecided` for anything else.
    pub fn fame(&self, hash: &EventHash) -> Result<Fame> {
        let Some(round) = self.get_event(hash)?.round() else {
            return Ok(Fame::Undecided);
        };
        Ok(self.store.get_round(round)?.fame(hash))
    }

    pub fn undetermined_events(&self) -> &[EventHash] {
        &self.state.undetermined_events
    }

    pub fn undecided_rounds(&self) -> Vec<i64> {
        self.state.undecided_rounds.iter().copied().collect()
    }

    pub fn last_consensus_round(&self) -> Option<i64> {
        self.state.last_consensus_round
    }

    pub fn last_committed_round_events(&self) -> usize {
        self.state.last_committed_round_events
    }

    pub fn consensus_transactions(&self) -> usize {
        self.state.consensus_transactions
    }

    pub fn pending_loaded_events(&self) -> usize {
        self.state.pending_loaded_events
    }

    pub fn last_block_index(&self) -> Option<u64> {
        self.store.last_block_index()
    }

    pub fn sig_pool(&self) -> &[BlockSignature] {
        &self.state.sig_pool
    }

    pub fn begin_tx(&mut self) {
        self.checkpoints.push(self.state.clone());
        self.store.begin_tx();
    }

    /// Ends the innermost transaction. Blocks are only released by the outermost one.
    pub fn commit_tx(&mut self) {
        self.checkpoints.pop();
        self.store.commit_tx();
        self.flush_blocks();
    }

    pub fn rollback_tx(&mut self) {
        match self.checkpoints.pop() {
            Some(state) => self.state = state,
            None => log::warn!("Rollback requested without an active transaction"),
        }
        self.store.rollback_tx();
    }

    fn flush_blocks(&mut self) {
        if !self.checkpoints.is_empty() {
            return;
        }
        for block in self.state.pending_blocks.drain(..) {
            let Some(commit_tx) = &self.commit_tx else {
                continue;
            };
            let index = block.index();
            if commit_tx.send(block).is_err() {
                log::warn!("Commit channel closed, block {index} not delivered");
            }
        }
    }
}

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::hashgraph::event::{Event, WireEvent};
use crate::hashgraph::root::Root;
use crate::hashgraph::{ConsensusState, Hashgraph, Result};
use crate::storage::{StoreError, StoreErrorKind};
use crate::utilities::encoding::{Decode, Encode};
use crate::utilities::{blake2_256, encoding, HashType};

/// Snapshot of the graph from the last decided round on, enough for a peer to continue from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub round: i64,
    pub roots: BTreeMap<PublicKey, Root>,
    pub events: Vec<WireEvent>,
}

impl Frame {
    pub fn hash(&self) -> anyhow::Result<HashType> {
        Ok(blake2_256(&self.encode()?))
    }
}

impl Encode for Frame {
    fn encode(&self) -> anyhow::Result<Vec<u8>> {
        encoding::encode(self)
    }
}

impl Decode for Frame {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        encoding::decode(bytes)
    }
}

impl Hashgraph {
    /// Builds a frame at the last consensus round.
    ///
    /// Every witness of that round contributes itself and all later events of its creator, with a
    /// root made from its parents. Participants without such a witness contribute their last event.
    pub fn get_frame(&self) -> Result<Frame> {
        let round = self.state.last_consensus_round.unwrap_or(0);
        let round_info = self.store.get_round(round).map_err(|err| {
            if err.is(StoreErrorKind::KeyNotFound) {
                StoreError::new("Hashgraph", StoreErrorKind::Empty, round)
            } else {
                err
            }
        })?;

        let mut events: Vec<Event> = vec![];
        let mut roots: BTreeMap<PublicKey, Root> = BTreeMap::new();

        for witness in round_info.witnesses() {
            let witness = self.store.get_event(&witness)?;
            roots.insert(*witness.creator(), self.root_below(witness)?);
            events.push(witness.clone());
            for hash in self
                .store
                .participant_events(witness.creator(), witness.index())?
            {
                events.push(self.store.get_event(&hash)?.clone());
            }
        }

        for (_, participant) in self.participants.iter() {
            if roots.contains_key(participant) {
                continue;
            }
            let root = match self.store.last_event_from(participant)? {
                (Some(last), false) => {
                    let last = self.store.get_event(&last)?;
                    events.push(last.clone());
                    self.root_below(last)?
                }
                _ => self.store.get_root(participant)?,
            };
            roots.insert(*participant, root);
        }

        events.sort_by_key(|event| event.topological_index);

        // Other parents outside the frame can only be vouched for by the creator's root
        let mut treated = BTreeSet::new();
        for event in &events {
            treated.insert(event.hash());
            let Some(other_parent) = event.other_parent() else {
                continue;
            };
            if treated.contains(&other_parent) {
                continue;
            }
            if let Some(root) = roots.get_mut(event.creator()) {
                if event.self_parent() != root.x {
                    root.others.insert(event.hash(), other_parent);
                }
            }
        }

        Ok(Frame {
            round,
            roots,
            events: events.iter().map(Event::to_wire).collect(),
        })
    }

    /// Root standing in for the parents of `event`.
    fn root_below(&self, event: &Event) -> Result<Root> {
        let round = match event.self_parent() {
            Some(parent) if self.store.contains_event(&parent) => self.round(&parent)?,
            Some(_) => self.store.get_root(event.creator())?.round,
            None => -1,
        };
        Ok(Root {
            x: event.self_parent(),
            y: event.other_parent(),
            index: event.index() - 1,
            round,
            others: BTreeMap::new(),
        })
    }

    /// Replaces the whole graph with the content of a frame.
    pub fn reset(&mut self, frame: &Frame) -> Result<()> {
        log::info!(
            "Resetting hashgraph from frame at round {} with {} events",
            frame.round,
            frame.events.len()
        );
        self.store.reset(frame.roots.clone())?;

        let pending_blocks = std::mem::take(&mut self.state.pending_blocks);
        self.state = ConsensusState {
            pending_blocks,
            ..ConsensusState::default()
        };

        for wire in &frame.events {
            let event = Event::from_wire(wire.clone())?;
            self.insert_event(event, false)?;
        }
        Ok(())
    }
}

use std::collections::BTreeMap;

use crate::hashgraph::event::EventHash;
use crate::utilities::HashType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fame {
    #[default]
    Undecided,
    Famous,
    NotFamous,
}

impl Fame {
    pub fn is_decided(&self) -> bool {
        *self != Fame::Undecided
    }
}

impl From<bool> for Fame {
    fn from(famous: bool) -> Self {
        if famous {
            Fame::Famous
        } else {
            Fame::NotFamous
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoundEvent {
    pub witness: bool,
    pub fame: Fame,
}

#[derive(Debug, thiserror::Error)]
#[error("Fame of witness {witness} already decided as {decided:?}")]
pub struct FameDecidedError {
    pub witness: EventHash,
    pub decided: Fame,
}

/// Events created in one round, with the fame of its witnesses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundInfo {
    events: BTreeMap<EventHash, RoundEvent>,
    pub(crate) queued: bool,
}

impl RoundInfo {
    pub fn add_event(&mut self, hash: EventHash, witness: bool) {
        self.events.entry(hash).or_insert(RoundEvent {
            witness,
            fame: Fame::Undecided,
        });
    }

    /// Records the fame of a witness. A decision can be repeated but never flipped.
    pub fn set_fame(&mut self, hash: EventHash, famous: bool) -> Result<(), FameDecidedError> {
        let event = self.events.entry(hash).or_insert(RoundEvent {
            witness: true,
            fame: Fame::Undecided,
        });
        let fame = Fame::from(famous);
        match event.fame {
            Fame::Undecided => {
                event.witness = true;
                event.fame = fame;
                Ok(())
            }
            decided if decided == fame => Ok(()),
            decided => Err(FameDecidedError {
                witness: hash,
                decided,
            }),
        }
    }

    pub fn fame(&self, hash: &EventHash) -> Fame {
        self.events
            .get(hash)
            .map(|event| event.fame)
            .unwrap_or_default()
    }

    pub fn is_decided(&self, hash: &EventHash) -> bool {
        self.fame(hash).is_decided()
    }

    pub fn witnesses(&self) -> Vec<EventHash> {
        self.events
            .iter()
            .filter(|(_, event)| event.witness)
            .map(|(hash, _)| *hash)
            .collect()
    }

    pub fn famous_witnesses(&self) -> Vec<EventHash> {
        self.events
            .iter()
            .filter(|(_, event)| event.witness && event.fame == Fame::Famous)
            .map(|(hash, _)| *hash)
            .collect()
    }

    /// True also for a round without witnesses.
    pub fn witnesses_decided(&self) -> bool {
        self.events
            .values()
            .filter(|event| event.witness)
            .all(|event| event.fame.is_decided())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// XOR of the famous witness hashes. Used to whiten signatures when ordering.
    pub fn pseudo_random_number(&self) -> HashType {
        let mut result = [0u8; 32];
        for hash in self.famous_witnesses() {
            for (byte, other) in result.iter_mut().zip(hash.as_bytes()) {
                *byte ^= other;
            }
        }
        result
    }
}

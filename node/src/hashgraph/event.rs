use std::fmt::{Debug, Display, Formatter};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::block::BlockSignature;
use crate::crypto::{Keypair, PublicKey, Signature};
use crate::utilities::encoding::{Decode, Encode};
use crate::utilities::{blake2_256, encoding, from_hex, to_hex, HashType, HashgraphTime};

/// Content hash of an event body. Serialized as a 0x-prefixed hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventHash(HashType);

impl EventHash {
    pub fn new(hash: HashType) -> Self {
        EventHash(hash)
    }

    pub fn as_bytes(&self) -> &HashType {
        &self.0
    }
}

impl Display for EventHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", to_hex(self.0))
    }
}

impl Debug for EventHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let hex = to_hex(self.0);
        write!(f, "{}", &hex[..10])
    }
}

impl Serialize for EventHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_hex(self.0))
    }
}

impl<'de> Deserialize<'de> for EventHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = from_hex(encoded).map_err(de::Error::custom)?;
        let hash = HashType::try_from(bytes.as_slice())
            .map_err(|_| de::Error::custom("Invalid event hash length"))?;
        Ok(EventHash(hash))
    }
}

/// The signed part of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBody {
    pub transactions: Vec<Vec<u8>>,
    pub block_signatures: Vec<BlockSignature>,
    pub self_parent: Option<EventHash>,
    pub other_parent: Option<EventHash>,
    pub creator: PublicKey,
    pub index: i64,
    pub timestamp: u64,
}

impl EventBody {
    pub fn new(
        transactions: Vec<Vec<u8>>,
        block_signatures: Vec<BlockSignature>,
        parents: (Option<EventHash>, Option<EventHash>),
        creator: PublicKey,
        index: i64,
    ) -> Self {
        EventBody {
            transactions,
            block_signatures,
            self_parent: parents.0,
            other_parent: parents.1,
            creator,
            index,
            timestamp: HashgraphTime::now(),
        }
    }

    pub fn hash(&self) -> anyhow::Result<EventHash> {
        let bytes = encoding::encode(self)?;
        Ok(EventHash(blake2_256(&bytes)))
    }
}

/// Reference to the last ancestor or first descendant of an event per participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EventCoordinates {
    pub(crate) hash: Option<EventHash>,
    pub(crate) index: i64,
}

impl EventCoordinates {
    pub(crate) const NO_ANCESTOR: EventCoordinates = EventCoordinates {
        hash: None,
        index: -1,
    };

    pub(crate) const NO_DESCENDANT: EventCoordinates = EventCoordinates {
        hash: None,
        index: i64::MAX,
    };
}

/// Consensus position of an event. Once `At`, never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Received {
    #[default]
    Pending,
    At { round: i64, timestamp: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Event {0} already has a round received")]
    AlreadyReceived(EventHash),
    #[error("Event {0} already has round {1}")]
    RoundAlreadySet(EventHash, i64),
    #[error("Invalid event encoding: {0}")]
    Encoding(#[from] anyhow::Error),
}

/// An event as kept by the local node: the signed body plus the derived consensus metadata.
#[derive(Debug, Clone)]
pub struct Event {
    body: EventBody,
    signature: Signature,
    hash: EventHash,
    pub(crate) topological_index: usize,
    round: Option<i64>,
    witness: bool,
    received: Received,
    pub(crate) last_ancestors: Vec<EventCoordinates>,
    pub(crate) first_descendants: Vec<EventCoordinates>,
}

impl Event {
    pub fn new(body: EventBody) -> Result<Self, EventError> {
        let hash = body.hash()?;
        Ok(Event {
            body,
            signature: Signature::default(),
            hash,
            topological_index: 0,
            round: None,
            witness: false,
            received: Received::Pending,
            last_ancestors: vec![],
            first_descendants: vec![],
        })
    }

    pub fn from_wire(wire: WireEvent) -> Result<Self, EventError> {
        let mut event = Event::new(wire.body)?;
        event.signature = wire.signature;
        Ok(event)
    }

    pub fn to_wire(&self) -> WireEvent {
        WireEvent {
            body: self.body.clone(),
            signature: self.signature.clone(),
        }
    }

    pub fn sign(&mut self, keypair: &Keypair) {
        self.signature = keypair.sign(self.hash.as_bytes());
    }

    /// Checks the signature against the creator key.
    pub fn verify(&self) -> bool {
        self.body
            .creator
            .verify(self.hash.as_bytes(), &self.signature)
    }

    pub fn hash(&self) -> EventHash {
        self.hash
    }

    pub fn body(&self) -> &EventBody {
        &self.body
    }

    pub fn creator(&self) -> &PublicKey {
        &self.body.creator
    }

    pub fn self_parent(&self) -> Option<EventHash> {
        self.body.self_parent
    }

    pub fn other_parent(&self) -> Option<EventHash> {
        self.body.other_parent
    }

    pub fn index(&self) -> i64 {
        self.body.index
    }

    pub fn timestamp(&self) -> u64 {
        self.body.timestamp
    }

    pub fn transactions(&self) -> &[Vec<u8>] {
        &self.body.transactions
    }

    pub fn block_signatures(&self) -> &[BlockSignature] {
        &self.body.block_signatures
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn round(&self) -> Option<i64> {
        self.round
    }

    pub fn is_witness(&self) -> bool {
        self.witness
    }

    pub fn received(&self) -> Received {
        self.received
    }

    pub fn is_received(&self) -> bool {
        matches!(self.received, Received::At { .. })
    }

    pub fn round_received(&self) -> Option<i64> {
        match self.received {
            Received::At { round, .. } => Some(round),
            Received::Pending => None,
        }
    }

    pub fn consensus_timestamp(&self) -> Option<u64> {
        match self.received {
            Received::At { timestamp, .. } => Some(timestamp),
            Received::Pending => None,
        }
    }

    /// First event of a creator, or any event carrying a payload.
    pub fn is_loaded(&self) -> bool {
        self.body.index == 0
            || !self.body.transactions.is_empty()
            || !self.body.block_signatures.is_empty()
    }

    pub(crate) fn set_round(&mut self, round: i64, witness: bool) -> Result<(), EventError> {
        match self.round {
            Some(existing) if existing != round => {
                Err(EventError::RoundAlreadySet(self.hash, existing))
            }
            _ => {
                self.round = Some(round);
                self.witness = witness;
                Ok(())
            }
        }
    }

    pub(crate) fn set_received(&mut self, round: i64, timestamp: u64) -> Result<(), EventError> {
        if self.is_received() {
            return Err(EventError::AlreadyReceived(self.hash));
        }
        self.received = Received::At { round, timestamp };
        Ok(())
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "hash: {:?}, creator: {:?}, index: {}, round: {:?}",
            self.hash, self.body.creator, self.body.index, self.round
        )
    }
}

/// What travels between peers: the body and its signature. Everything else is recomputed locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEvent {
    pub body: EventBody,
    pub signature: Signature,
}

impl Encode for WireEvent {
    fn encode(&self) -> anyhow::Result<Vec<u8>> {
        encoding::encode(self)
    }
}

impl Decode for WireEvent {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        encoding::decode(bytes)
    }
}

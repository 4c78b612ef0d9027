use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::block::Block;
use crate::crypto::PublicKey;
use crate::hashgraph::event::{Event, EventHash};
use crate::hashgraph::participants::Participants;
use crate::hashgraph::root::Root;
use crate::hashgraph::round::RoundInfo;
use crate::storage::rolling_index::RollingIndex;
use crate::storage::{Result, Store, StoreError, StoreErrorKind};

/// Prior values of everything touched since `begin_tx`.
#[derive(Default)]
struct Journal {
    events: HashMap<EventHash, Option<Event>>,
    rounds: BTreeMap<i64, Option<RoundInfo>>,
    participant_events: BTreeMap<PublicKey, RollingIndex<EventHash>>,
    consensus_events: Option<(RollingIndex<EventHash>, usize)>,
    blocks: Option<RollingIndex<Block>>,
    roots: Option<BTreeMap<PublicKey, Root>>,
    last_round: Option<i64>,
}

impl Journal {
    /// Folds a committed inner journal into this one. Values recorded here first are older.
    fn absorb(&mut self, inner: Journal) {
        for (hash, prior) in inner.events {
            self.events.entry(hash).or_insert(prior);
        }
        for (round, prior) in inner.rounds {
            self.rounds.entry(round).or_insert(prior);
        }
        for (participant, prior) in inner.participant_events {
            self.participant_events.entry(participant).or_insert(prior);
        }
        if self.consensus_events.is_none() {
            self.consensus_events = inner.consensus_events;
        }
        if self.blocks.is_none() {
            self.blocks = inner.blocks;
        }
        if self.roots.is_none() {
            self.roots = inner.roots;
        }
        if self.last_round.is_none() {
            self.last_round = inner.last_round;
        }
    }
}

/// Keeps the events consensus still depends on pinned in memory: events without a round
/// received, the last event of every participant and the witnesses of rounds still in the
/// table. Everything else goes through the LRU cache and can be evicted.
///
/// Rounds more than `cache_size` below the last decided round are dropped once
/// `prune_rounds` is called.
pub struct InmemStore {
    cache_size: usize,
    participants: Participants,
    pinned_events: HashMap<EventHash, Event>,
    received_events: LruCache<EventHash, Event>,
    rounds: BTreeMap<i64, RoundInfo>,
    participant_events: BTreeMap<PublicKey, RollingIndex<EventHash>>,
    consensus_events: RollingIndex<EventHash>,
    total_consensus_events: usize,
    blocks: RollingIndex<Block>,
    roots: BTreeMap<PublicKey, Root>,
    last_round: i64,
    journals: Vec<Journal>,
}

impl InmemStore {
    pub fn new(participants: Participants, cache_size: NonZeroUsize) -> Self {
        let size = cache_size.get();
        let roots = participants
            .iter()
            .map(|(_, key)| (*key, Root::base()))
            .collect::<BTreeMap<_, _>>();
        let participant_events = participants
            .iter()
            .map(|(_, key)| (*key, RollingIndex::new(size)))
            .collect();
        let capacity = size
            .saturating_mul(2)
            .saturating_mul(participants.len().max(1));
        InmemStore {
            cache_size: size,
            participants,
            pinned_events: HashMap::new(),
            received_events: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(cache_size)),
            rounds: BTreeMap::new(),
            participant_events,
            consensus_events: RollingIndex::new(size),
            total_consensus_events: 0,
            blocks: RollingIndex::new(size),
            roots,
            last_round: -1,
            journals: vec![],
        }
    }

    fn is_pinned(&self, hash: &EventHash, event: &Event) -> bool {
        if !event.is_received() {
            return true;
        }
        let last = self
            .participant_events
            .get(event.creator())
            .and_then(|index| index.last());
        if last == Some(hash) {
            return true;
        }
        event.is_witness()
            && event
                .round()
                .map_or(false, |round| self.rounds.contains_key(&round))
    }

    fn place_event(&mut self, event: Event) -> Option<(EventHash, Event)> {
        let hash = event.hash();
        if self.is_pinned(&hash, &event) {
            self.received_events.pop(&hash);
            self.pinned_events.insert(hash, event);
            None
        } else {
            self.pinned_events.remove(&hash);
            match self.received_events.push(hash, event) {
                Some((evicted, event)) if evicted != hash => Some((evicted, event)),
                _ => None,
            }
        }
    }

    /// Moves a stored event between the pinned set and the cache when what pins it has changed.
    fn settle(&mut self, hash: &EventHash) {
        let pinned = match self
            .pinned_events
            .get(hash)
            .or_else(|| self.received_events.peek(hash))
        {
            Some(event) => self.is_pinned(hash, event),
            None => return,
        };
        if pinned == self.pinned_events.contains_key(hash) {
            return;
        }
        let event = if pinned {
            self.received_events.pop(hash)
        } else {
            self.pinned_events.remove(hash)
        };
        if let Some(event) = event {
            let evicted = self.place_event(event);
            self.record_evicted(evicted);
        }
    }

    fn remove_event(&mut self, hash: &EventHash) {
        self.pinned_events.remove(hash);
        self.received_events.pop(hash);
    }

    fn record_event(&mut self, hash: EventHash) {
        if self.journals.is_empty() {
            return;
        }
        let prior = self.get_event(&hash).ok().cloned();
        if let Some(journal) = self.journals.last_mut() {
            journal.events.entry(hash).or_insert(prior);
        }
    }

    fn record_evicted(&mut self, evicted: Option<(EventHash, Event)>) {
        if let (Some((hash, event)), Some(journal)) = (evicted, self.journals.last_mut()) {
            log::trace!("Evicted consensus event {:?}", hash);
            journal.events.entry(hash).or_insert(Some(event));
        }
    }

    fn record_round(&mut self, round: i64) {
        if let Some(journal) = self.journals.last_mut() {
            journal
                .rounds
                .entry(round)
                .or_insert_with(|| self.rounds.get(&round).cloned());
        }
    }

    fn record_last_round(&mut self) {
        if let Some(journal) = self.journals.last_mut() {
            journal.last_round.get_or_insert(self.last_round);
        }
    }

    fn record_participant(&mut self, participant: &PublicKey) {
        if let (Some(journal), Some(index)) = (
            self.journals.last_mut(),
            self.participant_events.get(participant),
        ) {
            journal
                .participant_events
                .entry(*participant)
                .or_insert_with(|| index.clone());
        }
    }

    fn record_consensus(&mut self) {
        if let Some(journal) = self.journals.last_mut() {
            journal
                .consensus_events
                .get_or_insert_with(|| (self.consensus_events.clone(), self.total_consensus_events));
        }
    }

    fn record_blocks(&mut self) {
        if let Some(journal) = self.journals.last_mut() {
            journal.blocks.get_or_insert_with(|| self.blocks.clone());
        }
    }

    fn record_roots(&mut self) {
        if let Some(journal) = self.journals.last_mut() {
            journal.roots.get_or_insert_with(|| self.roots.clone());
        }
    }

    fn participant_index(&self, participant: &PublicKey) -> Result<&RollingIndex<EventHash>> {
        self.participant_events.get(participant).ok_or_else(|| {
            StoreError::new(
                "InmemStore",
                StoreErrorKind::UnknownParticipant,
                participant,
            )
        })
    }
}

impl Store for InmemStore {
    fn cache_size(&self) -> usize {
        self.cache_size
    }

    fn participants(&self) -> &Participants {
        &self.participants
    }

    fn contains_event(&self, hash: &EventHash) -> bool {
        self.pinned_events.contains_key(hash) || self.received_events.contains(hash)
    }

    fn get_event(&self, hash: &EventHash) -> Result<&Event> {
        self.pinned_events
            .get(hash)
            .or_else(|| self.received_events.peek(hash))
            .ok_or_else(|| StoreError::new("InmemStore", StoreErrorKind::KeyNotFound, hash))
    }

    fn set_event(&mut self, event: Event) -> Result<()> {
        let hash = event.hash();
        let mut previous_last = None;
        if !self.contains_event(&hash) {
            let creator = *event.creator();
            previous_last = self.participant_index(&creator)?.last().copied();
            self.record_participant(&creator);
            if let Some(index) = self.participant_events.get_mut(&creator) {
                index.add(hash, event.index())?;
            }
        }
        self.record_event(hash);
        let evicted = self.place_event(event);
        self.record_evicted(evicted);
        if let Some(previous) = previous_last {
            self.settle(&previous);
        }
        Ok(())
    }

    fn participant_events(&self, participant: &PublicKey, skip: i64) -> Result<Vec<EventHash>> {
        self.participant_index(participant)?.get(skip)
    }

    fn participant_event(&self, participant: &PublicKey, index: i64) -> Result<EventHash> {
        let events = self.participant_index(participant)?;
        match events.get_item(index) {
            Ok(hash) => Ok(*hash),
            Err(err) if err.is(StoreErrorKind::TooLate) => {
                // The root is the only event still known below the window
                let root = self.get_root(participant)?;
                match root.x {
                    Some(x) if root.index == index => Ok(x),
                    _ => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    fn last_event_from(&self, participant: &PublicKey) -> Result<(Option<EventHash>, bool)> {
        match self.participant_index(participant)?.last() {
            Some(last) => Ok((Some(*last), false)),
            None => Ok((self.get_root(participant)?.x, true)),
        }
    }

    fn last_index(&self, participant: &PublicKey) -> Result<i64> {
        Ok(self.participant_index(participant)?.last_index())
    }

    fn known_events(&self) -> BTreeMap<usize, i64> {
        self.participants
            .iter()
            .map(|(id, key)| {
                let last = self
                    .participant_events
                    .get(key)
                    .map(|index| index.last_index())
                    .unwrap_or(-1);
                (id, last)
            })
            .collect()
    }

    fn consensus_events(&self) -> Vec<EventHash> {
        self.consensus_events.last_window().0.to_vec()
    }

    fn consensus_events_count(&self) -> usize {
        self.total_consensus_events
    }

    fn add_consensus_event(&mut self, hash: EventHash) -> Result<()> {
        self.record_consensus();
        self.consensus_events
            .add(hash, self.total_consensus_events as i64)?;
        self.total_consensus_events += 1;
        Ok(())
    }

    fn get_round(&self, round: i64) -> Result<RoundInfo> {
        self.rounds
            .get(&round)
            .cloned()
            .ok_or_else(|| StoreError::new("InmemStore", StoreErrorKind::KeyNotFound, round))
    }

    fn set_round(&mut self, round: i64, info: RoundInfo) -> Result<()> {
        self.record_round(round);
        self.record_last_round();
        self.rounds.insert(round, info);
        if round > self.last_round {
            self.last_round = round;
        }
        Ok(())
    }

    fn last_round(&self) -> i64 {
        self.last_round
    }

    fn prune_rounds(&mut self, before: i64) {
        let pruned: Vec<i64> = self.rounds.range(..before).map(|(round, _)| *round).collect();
        if pruned.is_empty() {
            return;
        }
        log::trace!("Pruning {} rounds below {before}", pruned.len());
        for round in pruned {
            self.record_round(round);
            if let Some(info) = self.rounds.remove(&round) {
                for witness in info.witnesses() {
                    self.settle(&witness);
                }
            }
        }
    }

    fn round_witnesses(&self, round: i64) -> Vec<EventHash> {
        self.rounds
            .get(&round)
            .map(|info| info.witnesses())
            .unwrap_or_default()
    }

    fn round_events(&self, round: i64) -> usize {
        self.rounds.get(&round).map(|info| info.len()).unwrap_or(0)
    }

    fn get_root(&self, participant: &PublicKey) -> Result<Root> {
        self.roots
            .get(participant)
            .cloned()
            .ok_or_else(|| StoreError::new("InmemStore", StoreErrorKind::NoRoot, participant))
    }

    fn get_block(&self, index: u64) -> Result<Block> {
        self.blocks.get_item(index as i64).cloned()
    }

    fn set_block(&mut self, block: Block) -> Result<()> {
        self.record_blocks();
        let index = block.index() as i64;
        self.blocks.set(block, index)
    }

    fn last_block_index(&self) -> Option<u64> {
        match self.blocks.last_index() {
            -1 => None,
            index => Some(index as u64),
        }
    }

    fn reset(&mut self, roots: BTreeMap<PublicKey, Root>) -> Result<()> {
        for (_, key) in self.participants.iter() {
            if !roots.contains_key(key) {
                return Err(StoreError::new("InmemStore", StoreErrorKind::NoRoot, key));
            }
        }

        if !self.journals.is_empty() {
            let hashes: Vec<EventHash> = self
                .pinned_events
                .keys()
                .chain(self.received_events.iter().map(|(hash, _)| hash))
                .copied()
                .collect();
            for hash in hashes {
                self.record_event(hash);
            }
            let rounds: Vec<i64> = self.rounds.keys().copied().collect();
            for round in rounds {
                self.record_round(round);
            }
            let participants: Vec<PublicKey> = self.participant_events.keys().copied().collect();
            for participant in participants {
                self.record_participant(&participant);
            }
            self.record_consensus();
            self.record_roots();
            self.record_last_round();
        }

        self.pinned_events.clear();
        self.received_events.clear();
        self.rounds.clear();
        self.participant_events = roots
            .iter()
            .map(|(key, root)| (*key, RollingIndex::with_last_index(self.cache_size, root.index)))
            .collect();
        self.consensus_events = RollingIndex::new(self.cache_size);
        self.total_consensus_events = 0;
        self.roots = roots;
        self.last_round = -1;
        Ok(())
    }

    fn begin_tx(&mut self) {
        self.journals.push(Journal::default());
    }

    fn commit_tx(&mut self) {
        if let Some(journal) = self.journals.pop() {
            if let Some(outer) = self.journals.last_mut() {
                outer.absorb(journal);
            }
        }
    }

    fn rollback_tx(&mut self) {
        let Some(journal) = self.journals.pop() else {
            log::warn!("Rollback requested without an active transaction");
            return;
        };
        // rounds and participant indices first, they decide where restored events go
        let mut unsettled = vec![];
        for (round, prior) in journal.rounds {
            match prior {
                Some(info) => {
                    unsettled.extend(info.witnesses());
                    self.rounds.insert(round, info);
                }
                None => {
                    self.rounds.remove(&round);
                }
            }
        }
        for (participant, prior) in journal.participant_events {
            self.participant_events.insert(participant, prior);
        }
        unsettled.extend(
            self.participant_events
                .values()
                .filter_map(|index| index.last().copied()),
        );

        for hash in journal.events.keys() {
            self.remove_event(hash);
        }
        for event in journal.events.into_values().flatten() {
            self.place_event(event);
        }
        if let Some((consensus_events, total)) = journal.consensus_events {
            self.consensus_events = consensus_events;
            self.total_consensus_events = total;
        }
        if let Some(blocks) = journal.blocks {
            self.blocks = blocks;
        }
        if let Some(roots) = journal.roots {
            self.roots = roots;
        }
        if let Some(last_round) = journal.last_round {
            self.last_round = last_round;
        }
        for hash in unsettled {
            self.settle(&hash);
        }
    }
}

use std::collections::BTreeMap;

use crate::block::Block;
use crate::hashgraph::event::{Event, EventHash};
use crate::hashgraph::{Hashgraph, Result};
use crate::storage::StoreErrorKind;
use crate::utilities::HashType;

impl Hashgraph {
    /// Gives undetermined events a round received and a consensus timestamp.
    ///
    /// An event is received in the first round after its own which is decided, with every earlier
    /// queued round decided as well, and which has a famous witness that sees the event.
    pub fn decide_round_received(&mut self) -> Result<()> {
        let last_round = self.store.last_round();

        for hash in self.state.undetermined_events.clone() {
            let round = self.round(&hash)?;

            for candidate in round + 1..=last_round {
                let blocked = self
                    .state
                    .undecided_rounds
                    .first()
                    .map_or(false, |undecided| *undecided <= candidate);
                if blocked {
                    break;
                }
                let round_info = match self.store.get_round(candidate) {
                    Ok(info) => info,
                    Err(err) if err.is(StoreErrorKind::KeyNotFound) => continue,
                    Err(err) => return Err(err.into()),
                };
                if !round_info.witnesses_decided() {
                    continue;
                }

                let event = self.store.get_event(&hash)?;
                let mut timestamps = vec![];
                for witness in round_info.famous_witnesses() {
                    let Ok(witness) = self.store.get_event(&witness) else {
                        continue;
                    };
                    if self.sees(witness, event) {
                        timestamps.push(self.timestamp_seen_by(witness, event));
                    }
                }
                if timestamps.is_empty() {
                    continue;
                }

                timestamps.sort_unstable();
                let median = timestamps[timestamps.len() / 2];

                let mut event = event.clone();
                event.set_received(candidate, median)?;
                log::trace!("Event {:?} received in round {candidate}", hash);
                self.store.set_event(event)?;
                break;
            }
        }
        Ok(())
    }

    /// Timestamp of the oldest self-ancestor of `witness` which sees `event`.
    fn timestamp_seen_by(&self, witness: &Event, event: &Event) -> u64 {
        let oldest = self
            .participants
            .id(witness.creator())
            .map(|id| event.first_descendants[id])
            .filter(|descendant| descendant.index <= witness.index())
            .and_then(|descendant| descendant.hash)
            .and_then(|hash| self.store.get_event(&hash).ok());
        match oldest {
            Some(oldest) => oldest.timestamp(),
            None => witness.timestamp(),
        }
    }

    /// Moves every received event to the consensus list and emits the resulting blocks.
    pub fn find_order(&mut self) -> Result<()> {
        self.decide_round_received()?;

        let mut new_consensus = vec![];
        let mut still_undetermined = vec![];
        for hash in &self.state.undetermined_events {
            let event = self.store.get_event(hash)?;
            if event.is_received() {
                new_consensus.push(event.clone());
            } else {
                still_undetermined.push(*hash);
            }
        }
        self.state.undetermined_events = still_undetermined;

        if !new_consensus.is_empty() {
            self.sort_consensus_events(&mut new_consensus)?;
            self.handle_new_consensus_events(new_consensus)?;
        }

        if let Some(round) = self.state.last_consensus_round {
            self.state.last_committed_round_events = self.store.round_events(round - 1);
            self.prune_rounds(round);
        }
        self.flush_blocks();
        Ok(())
    }

    /// Keeps `cache_size` rounds below the last decided one, and every round still being voted on.
    fn prune_rounds(&mut self, last_consensus_round: i64) {
        let mut before = last_consensus_round - self.store.cache_size() as i64;
        if let Some(undecided) = self.state.undecided_rounds.first() {
            before = before.min(*undecided);
        }
        self.store.prune_rounds(before);
    }

    fn sort_consensus_events(&self, events: &mut [Event]) -> Result<()> {
        let mut whiteners: BTreeMap<i64, HashType> = BTreeMap::new();
        for event in events.iter() {
            if let Some(round) = event.round_received() {
                if !whiteners.contains_key(&round) {
                    let info = self.store.get_round(round)?;
                    whiteners.insert(round, info.pseudo_random_number());
                }
            }
        }

        events.sort_by_cached_key(|event| {
            let round_received = event.round_received().unwrap_or(i64::MAX);
            let whitener = whiteners
                .get(&round_received)
                .copied()
                .unwrap_or_default();
            let whitened: Vec<u8> = event
                .signature()
                .as_bytes()
                .iter()
                .zip(whitener.iter().cycle())
                .map(|(byte, mask)| byte ^ mask)
                .collect();
            (
                round_received,
                event.round().unwrap_or(-1),
                event.consensus_timestamp().unwrap_or_default(),
                whitened,
                event.hash(),
            )
        });
        Ok(())
    }

    fn handle_new_consensus_events(&mut self, events: Vec<Event>) -> Result<()> {
        let mut batches: BTreeMap<i64, Vec<Vec<u8>>> = BTreeMap::new();
        for event in events {
            self.store.add_consensus_event(event.hash())?;
            self.state.consensus_transactions += event.transactions().len();
            if event.is_loaded() {
                self.state.pending_loaded_events = self.state.pending_loaded_events.saturating_sub(1);
            }
            if let Some(round) = event.round_received() {
                batches
                    .entry(round)
                    .or_default()
                    .extend(event.transactions().iter().cloned());
            }
        }

        for (round_received, transactions) in batches {
            if transactions.is_empty() {
                continue;
            }
            let index = self.store.last_block_index().map_or(0, |last| last + 1);
            let block = Block::new(index, round_received, transactions);
            log::debug!("Created block {}", block);
            self.store.set_block(block.clone())?;
            self.state.pending_blocks.push(block);
        }
        Ok(())
    }

    /// Attaches gossiped block signatures to the local copy of their block.
    ///
    /// Signatures for blocks not produced yet stay in the pool. Signatures that don't verify,
    /// or belong to blocks already out of the window, are dropped.
    pub fn process_sig_pool(&mut self) -> Result<()> {
        let mut retained = vec![];
        for signature in std::mem::take(&mut self.state.sig_pool) {
            if !self.participants.contains(&signature.validator) {
                log::warn!("Block signature from unknown validator {}", signature.validator);
                continue;
            }
            let mut block = match self.store.get_block(signature.index) {
                Ok(block) => block,
                Err(err) if err.is(StoreErrorKind::KeyNotFound) => {
                    retained.push(signature);
                    continue;
                }
                Err(err) if err.is(StoreErrorKind::TooLate) => {
                    log::debug!("Block {} too old for signature", signature.index);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            if !block.verify(&signature)? {
                log::warn!(
                    "Invalid signature from {} for block {}",
                    signature.validator,
                    signature.index
                );
                continue;
            }
            block.set_signature(signature);
            self.store.set_block(block)?;
        }
        self.state.sig_pool = retained;
        Ok(())
    }

    /// Hashes of the most recent consensus events, in consensus order.
    pub fn consensus_events(&self) -> Vec<EventHash> {
        self.store.consensus_events()
    }
}

#[cfg(test)]
mod test {
    use tokio::sync::mpsc;

    use crate::block::Block;
    use crate::hashgraph::test::{gossip_graph, TestGraph};
    use crate::hashgraph::{EventBody, Received};
    use crate::hashgraph::event::Event;

    fn run(graph: &mut TestGraph) {
        graph.run_consensus();
    }

    #[test]
    fn test_find_order() {
        let (commit_tx, mut commit_rcv) = mpsc::unbounded_channel();
        let mut graph = gossip_graph(Some(commit_tx));
        run(&mut graph);

        let hg = &graph.hashgraph;
        assert_eq!(hg.last_consensus_round(), Some(4));
        assert_eq!(hg.store().consensus_events_count(), 18);
        assert_eq!(hg.undetermined_events().len(), 27 - 18);
        assert_eq!(hg.consensus_transactions(), 18);

        for name in ["a0", "b0", "c0", "a1", "b2", "c3"] {
            let event = hg.get_event(&graph.hash(name)).unwrap();
            assert_eq!(event.round_received(), Some(1), "{name}");
        }

        let blocks: Vec<Block> = std::iter::from_fn(|| commit_rcv.try_recv().ok()).collect();
        assert_eq!(
            blocks.iter().map(|b| (b.index(), b.round_received())).collect::<Vec<_>>(),
            vec![(0, 1), (1, 2), (2, 3), (3, 4)]
        );
        assert_eq!(
            blocks.iter().map(|b| b.transactions().len()).collect::<Vec<_>>(),
            vec![6, 4, 4, 4]
        );
        assert_eq!(hg.last_block_index(), Some(3));
    }

    #[test]
    fn test_consensus_order_follows_round_received() {
        let mut graph = gossip_graph(None);
        run(&mut graph);

        let hg = &graph.hashgraph;
        let rounds: Vec<i64> = hg
            .consensus_events()
            .iter()
            .map(|hash| hg.get_event(hash).unwrap().round_received().unwrap())
            .collect();
        assert!(rounds.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn test_consensus_is_final() {
        let mut graph = gossip_graph(None);
        run(&mut graph);

        let hg = &graph.hashgraph;
        let order = hg.consensus_events();
        let received: Vec<Received> = order
            .iter()
            .map(|hash| hg.get_event(hash).unwrap().received())
            .collect();

        run(&mut graph);
        run(&mut graph);

        let hg = &graph.hashgraph;
        assert_eq!(hg.consensus_events(), order);
        let again: Vec<Received> = order
            .iter()
            .map(|hash| hg.get_event(hash).unwrap().received())
            .collect();
        assert_eq!(again, received);
        assert_eq!(hg.last_block_index(), Some(3));
    }

    #[test]
    fn test_same_events_same_order() {
        let mut first = gossip_graph(None);
        run(&mut first);

        // Same events, inserted creator by creator where parents allow it
        let mut second = TestGraph::new(3, None);
        let mut events: Vec<Event> = first
            .names
            .values()
            .map(|hash| first.hashgraph.get_event(hash).unwrap().clone())
            .collect();
        events.sort_by_key(|event| (event.index(), event.creator().to_string()));
        let mut pending = events;
        while !pending.is_empty() {
            let mut rest = vec![];
            for event in pending {
                let wire = event.to_wire();
                if second.hashgraph.insert_event(Event::from_wire(wire).unwrap(), false).is_err() {
                    rest.push(event);
                }
            }
            pending = rest;
        }
        run(&mut second);

        assert_eq!(second.hashgraph.consensus_events(), first.hashgraph.consensus_events());
    }

    #[test]
    fn test_block_signatures_are_collected() {
        let mut graph = gossip_graph(None);
        run(&mut graph);

        let block = graph.hashgraph.store().get_block(0).unwrap();
        let signature = block.sign(&graph.keys[1]).unwrap();
        let early = Block::new(7, 9, vec![]).sign(&graph.keys[2]).unwrap();

        let last = graph.hashgraph.store().participant_events(&graph.keys[1].public_key(), -1).unwrap();
        let body = EventBody::new(
            vec![],
            vec![signature.clone(), early.clone()],
            (last.last().copied(), None),
            graph.keys[1].public_key(),
            last.len() as i64,
        );
        let mut event = Event::new(body).unwrap();
        event.sign(&graph.keys[1]);
        graph.hashgraph.insert_event(event, false).unwrap();
        graph.hashgraph.process_sig_pool().unwrap();

        let block = graph.hashgraph.store().get_block(0).unwrap();
        assert_eq!(block.signatures.get(&signature.validator), Some(&signature.signature));
        assert_eq!(graph.hashgraph.sig_pool(), &[early]);
    }
}

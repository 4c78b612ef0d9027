use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::block::pool::TransactionPool;
use crate::block::{Block, BlockSignature};
use crate::core::messages::{FastForwardRequest, FastForwardResponse, SyncRequest, SyncResponse};
use crate::crypto::{Keypair, PublicKey};
use crate::hashgraph::event::{Event, EventError, EventHash};
use crate::hashgraph::participants::Participants;
use crate::hashgraph::{EventBody, Frame, Hashgraph, HashgraphError, WireEvent};
use crate::storage::{Store, StoreError, StoreErrorKind};

pub type Result<T> = std::result::Result<T, ControllerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusStage {
    DivideRounds,
    DecideFame,
    FindOrder,
    ProcessSigPool,
}

impl Display for ConsensusStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConsensusStage::DivideRounds => "DivideRounds",
            ConsensusStage::DecideFame => "DecideFame",
            ConsensusStage::FindOrder => "FindOrder",
            ConsensusStage::ProcessSigPool => "ProcessSigPool",
        };
        write!(f, "{name}")
    }
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Hashgraph error: {0}")]
    Hashgraph(#[from] HashgraphError),
    #[error("{stage} failed: {source}")]
    Consensus {
        stage: ConsensusStage,
        #[source]
        source: HashgraphError,
    },
    #[error("Peer {0} is over the sync limit")]
    SyncLimit(usize),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Event error: {0}")]
    Event(#[from] EventError),
    #[error("General error: {0}")]
    General(#[from] anyhow::Error),
}

/// One participant's view of the protocol: its own chain of events, the pool of transactions
/// waiting to be gossiped and the hashgraph built from everything it has received.
pub struct Controller {
    id: usize,
    keypair: Arc<Keypair>,
    public_key: PublicKey,
    hg: Hashgraph,
    /// Last event created by this node.
    head: Option<EventHash>,
    /// Index of `head`, -1 before the first event.
    seq: i64,
    pool: TransactionPool,
}

impl Controller {
    pub fn new(
        id: usize,
        keypair: Arc<Keypair>,
        participants: Participants,
        store: Box<dyn Store>,
        commit_tx: Option<UnboundedSender<Block>>,
        coin_round_frequency: Option<usize>,
    ) -> Self {
        let public_key = keypair.public_key();
        let hg = Hashgraph::new(participants, store, commit_tx, coin_round_frequency);
        Controller {
            id,
            keypair,
            public_key,
            hg,
            head: None,
            seq: -1,
            pool: TransactionPool::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    pub fn hashgraph(&self) -> &Hashgraph {
        &self.hg
    }

    /// Creates the node's first event. Does nothing if the node already has one.
    pub fn init(&mut self) -> Result<()> {
        if self.seq >= 0 {
            log::debug!("Node {} already has events, skipping initial event", self.id);
            return Ok(());
        }
        let body = EventBody::new(vec![], vec![], (None, None), self.public_key, 0);
        self.sign_and_insert_self_event(Event::new(body)?)?;
        log::info!("Node {} created initial event {:?}", self.id, self.head);
        Ok(())
    }

    /// Restores head and sequence from the store, falling back to the root.
    pub fn bootstrap(&mut self) -> Result<()> {
        let (last, is_root) = self.hg.store().last_event_from(&self.public_key)?;
        if is_root {
            let root = self.hg.store().get_root(&self.public_key)?;
            self.head = root.x;
            self.seq = root.index;
        } else {
            self.head = last;
            self.seq = match &last {
                Some(hash) => self.hg.get_event(hash)?.index(),
                None => -1,
            };
        }
        log::debug!("Node {} bootstrapped at seq {}", self.id, self.seq);
        Ok(())
    }

    fn sign_and_insert_self_event(&mut self, mut event: Event) -> Result<()> {
        event.sign(&self.keypair);
        self.insert_event(event, true)?;
        Ok(())
    }

    /// True when the event was not known before.
    fn insert_event(&mut self, event: Event, trusted: bool) -> Result<bool> {
        let hash = event.hash();
        let own = *event.creator() == self.public_key;
        let index = event.index();
        let inserted = self.hg.insert_event(event, trusted)?;
        if own && index > self.seq {
            self.head = Some(hash);
            self.seq = index;
        }
        Ok(inserted)
    }

    pub fn known_events(&self) -> BTreeMap<usize, i64> {
        self.hg.store().known_events()
    }

    /// True when the events the peer is missing add up to more than `sync_limit`.
    pub fn over_sync_limit(&self, known: &BTreeMap<usize, i64>, sync_limit: usize) -> bool {
        let total: i64 = self
            .known_events()
            .into_iter()
            .map(|(id, mine)| (mine - known.get(&id).copied().unwrap_or(-1)).max(0))
            .sum();
        total > sync_limit as i64
    }

    /// Events this node has and the peer doesn't, parents always before children.
    pub fn event_diff(&self, known: &BTreeMap<usize, i64>) -> Result<Vec<Event>> {
        let mut unknown = vec![];
        for (id, participant) in self.hg.participants().iter() {
            let last_known = known.get(&id).copied().unwrap_or(-1);
            for hash in self.hg.store().participant_events(participant, last_known)? {
                unknown.push(self.hg.get_event(&hash)?.clone());
            }
        }
        unknown.sort_by_key(|event| event.topological_index);
        Ok(unknown)
    }

    /// Inserts a batch received from a peer and records it with a new self event.
    ///
    /// The batch is all or nothing. The self event takes the last event of the batch as other
    /// parent and carries whatever is in the pool. It is only created when the batch added
    /// something new or the pool has content.
    pub fn sync(&mut self, events: Vec<WireEvent>) -> Result<()> {
        log::debug!(
            "Node {} syncing {} events, {} transactions pending",
            self.id,
            events.len(),
            self.pool.transactions_len()
        );
        self.transaction(move |controller| {
            let mut inserted = false;
            let mut other_head = None;
            for wire in events {
                let event = Event::from_wire(wire)?;
                other_head = Some(event.hash());
                inserted |= controller.insert_event(event, false)?;
            }
            if inserted || !controller.pool.is_empty() {
                controller.create_self_event(other_head)?;
            }
            Ok(())
        })
    }

    /// Packs the pool into a self event without a peer exchange. No-op when the pool is empty.
    pub fn add_self_event(&mut self) -> Result<()> {
        if self.pool.is_empty() {
            return Ok(());
        }
        self.transaction(|controller| controller.create_self_event(None))
    }

    fn create_self_event(&mut self, other_parent: Option<EventHash>) -> Result<()> {
        let (transactions, block_signatures) = self.pool.take();
        let body = EventBody::new(
            transactions,
            block_signatures,
            (self.head, other_parent),
            self.public_key,
            self.seq + 1,
        );
        self.sign_and_insert_self_event(Event::new(body)?)
    }

    pub fn run_consensus(&mut self) -> Result<()> {
        self.transaction(|controller| {
            controller.run_stage(ConsensusStage::DivideRounds, Hashgraph::divide_rounds)?;
            controller.run_stage(ConsensusStage::DecideFame, Hashgraph::decide_fame)?;
            controller.run_stage(ConsensusStage::FindOrder, Hashgraph::find_order)?;
            controller.run_stage(ConsensusStage::ProcessSigPool, Hashgraph::process_sig_pool)
        })
    }

    fn run_stage(
        &mut self,
        stage: ConsensusStage,
        run: fn(&mut Hashgraph) -> crate::hashgraph::Result<()>,
    ) -> Result<()> {
        let start = Instant::now();
        run(&mut self.hg).map_err(|source| ControllerError::Consensus { stage, source })?;
        log::debug!("{stage} took {:?}", start.elapsed());
        Ok(())
    }

    /// Sync and consensus as one unit, so a failing consensus run also undoes the batch.
    pub fn sync_and_run_consensus(&mut self, events: Vec<WireEvent>) -> Result<()> {
        self.transaction(move |controller| {
            controller.sync(events)?;
            controller.run_consensus()
        })
    }

    /// Answers a peer's sync request with what it is missing, or with the sync limit flag.
    pub fn process_sync_request(
        &self,
        request: &SyncRequest,
        sync_limit: usize,
    ) -> Result<SyncResponse> {
        let mut response = SyncResponse {
            from_id: self.id,
            sync_limit: false,
            events: vec![],
            known: self.known_events(),
        };
        if self.over_sync_limit(&request.known, sync_limit) {
            log::debug!("Node {} is over the sync limit", request.from_id);
            response.sync_limit = true;
            return Ok(response);
        }
        let diff = self.event_diff(&request.known)?;
        response.events = self.to_wire(&diff);
        Ok(response)
    }

    pub fn process_fast_forward_request(
        &self,
        request: &FastForwardRequest,
    ) -> Result<FastForwardResponse> {
        log::debug!("Node {} building frame for node {}", self.id, request.from_id);
        Ok(FastForwardResponse {
            from_id: self.id,
            frame: self.get_frame()?,
        })
    }

    pub fn get_frame(&self) -> Result<Frame> {
        Ok(self.hg.get_frame()?)
    }

    /// Replaces the local graph with a peer's frame and continues from the node's own last event in it.
    pub fn fast_forward(&mut self, frame: &Frame) -> Result<()> {
        self.transaction(|controller| {
            controller.hg.reset(frame)?;
            controller.bootstrap()?;
            controller.run_consensus()
        })
    }

    /// Signs a block, keeps the signature on the stored copy and returns it for gossip.
    pub fn sign_block(&mut self, block: Block) -> Result<BlockSignature> {
        let signature = block.sign(&self.keypair)?;
        // the stored copy may already carry signatures from peers
        let mut stored = match self.hg.store().get_block(block.index()) {
            Ok(stored) => stored,
            Err(err) if err.is(StoreErrorKind::KeyNotFound) => block,
            Err(err) => return Err(err.into()),
        };
        stored.set_signature(signature.clone());
        self.hg.store_mut().set_block(stored)?;
        Ok(signature)
    }

    pub fn add_transactions(&mut self, transactions: Vec<Vec<u8>>) {
        self.pool.add_transactions(transactions);
    }

    pub fn add_block_signature(&mut self, signature: BlockSignature) {
        self.pool.add_block_signature(signature);
    }

    pub fn from_wire(&self, wire_events: Vec<WireEvent>) -> Result<Vec<Event>> {
        wire_events
            .into_iter()
            .map(|wire| Event::from_wire(wire).map_err(ControllerError::from))
            .collect()
    }

    pub fn to_wire(&self, events: &[Event]) -> Vec<WireEvent> {
        events.iter().map(Event::to_wire).collect()
    }

    pub fn head(&self) -> Option<EventHash> {
        self.head
    }

    pub fn seq(&self) -> i64 {
        self.seq
    }

    pub fn get_event(&self, hash: &EventHash) -> Result<Event> {
        Ok(self.hg.get_event(hash)?.clone())
    }

    pub fn event_transactions(&self, hash: &EventHash) -> Result<Vec<Vec<u8>>> {
        Ok(self.hg.get_event(hash)?.transactions().to_vec())
    }

    pub fn consensus_events(&self) -> Vec<EventHash> {
        self.hg.consensus_events()
    }

    pub fn consensus_events_count(&self) -> usize {
        self.hg.store().consensus_events_count()
    }

    /// Transactions of the consensus events still in the store window, in consensus order.
    pub fn consensus_transactions(&self) -> Result<Vec<Vec<u8>>> {
        let mut transactions = vec![];
        for hash in self.consensus_events() {
            transactions.extend_from_slice(self.hg.get_event(&hash)?.transactions());
        }
        Ok(transactions)
    }

    pub fn consensus_transactions_count(&self) -> usize {
        self.hg.consensus_transactions()
    }

    pub fn undetermined_events(&self) -> Vec<EventHash> {
        self.hg.undetermined_events().to_vec()
    }

    pub fn pending_loaded_events(&self) -> usize {
        self.hg.pending_loaded_events()
    }

    pub fn last_consensus_round(&self) -> Option<i64> {
        self.hg.last_consensus_round()
    }

    pub fn last_committed_round_events(&self) -> usize {
        self.hg.last_committed_round_events()
    }

    pub fn last_block_index(&self) -> Option<u64> {
        self.hg.last_block_index()
    }

    pub fn transaction_pool_len(&self) -> usize {
        self.pool.transactions_len()
    }

    /// Whether there is anything worth a gossip round: loaded events not yet in consensus or
    /// something waiting in the pool.
    pub fn need_gossip(&self) -> bool {
        self.hg.pending_loaded_events() > 0 || !self.pool.is_empty()
    }

    /// Runs `operation` inside a hashgraph transaction. On error, the store, the consensus
    /// bookkeeping, head, sequence and pool are all put back.
    fn transaction<T>(&mut self, operation: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let head = self.head;
        let seq = self.seq;
        let pool = self.pool.clone();
        self.hg.begin_tx();
        match operation(self) {
            Ok(value) => {
                self.hg.commit_tx();
                Ok(value)
            }
            Err(err) => {
                log::warn!("Node {} rolling back: {err}", self.id);
                self.hg.rollback_tx();
                self.head = head;
                self.seq = seq;
                self.pool = pool;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::num::NonZeroUsize;

    use assert_matches::assert_matches;
    use tokio::sync::mpsc;

    use super::*;
    use crate::storage::InmemStore;

    pub(crate) fn keys(n: usize) -> Vec<Arc<Keypair>> {
        (0..n)
            .map(|i| Arc::new(Keypair::generate(Some(format!("node{i}").into_bytes()))))
            .collect()
    }

    pub(crate) fn controller(
        id: usize,
        keys: &[Arc<Keypair>],
        commit_tx: Option<UnboundedSender<Block>>,
    ) -> Controller {
        controller_with_cache(id, keys, commit_tx, 1000)
    }

    fn controller_with_cache(
        id: usize,
        keys: &[Arc<Keypair>],
        commit_tx: Option<UnboundedSender<Block>>,
        cache_size: usize,
    ) -> Controller {
        let participants = Participants::new(keys.iter().map(|k| k.public_key()));
        let store = InmemStore::new(participants.clone(), NonZeroUsize::new(cache_size).unwrap());
        Controller::new(
            id,
            keys[id].clone(),
            participants,
            Box::new(store),
            commit_tx,
            None,
        )
    }

    pub(crate) fn init_controllers(n: usize) -> Vec<Controller> {
        let keys = keys(n);
        (0..n)
            .map(|id| {
                let mut controller = controller(id, &keys, None);
                controller.init().unwrap();
                controller
            })
            .collect()
    }

    pub(crate) fn synchronize(
        controllers: &mut [Controller],
        from: usize,
        to: usize,
        payload: Vec<Vec<u8>>,
    ) -> Result<()> {
        let known = controllers[to].known_events();
        let unknown = controllers[from].event_diff(&known)?;
        let wire = controllers[from].to_wire(&unknown);
        controllers[to].add_transactions(payload);
        controllers[to].sync(wire)
    }

    fn sync_and_run_consensus(controllers: &mut [Controller], from: usize, to: usize, payload: Vec<Vec<u8>>) {
        synchronize(controllers, from, to, payload).unwrap();
        controllers[to].run_consensus().unwrap();
    }

    /// Eighteen pairwise syncs between three nodes, each carrying one transaction.
    pub(crate) fn consensus_controllers() -> Vec<Controller> {
        let mut controllers = init_controllers(3);
        let playbook = [(0, 1), (1, 2), (2, 0), (0, 1), (1, 0), (1, 2)];
        for round in 0..3 {
            for (step, (from, to)) in playbook.iter().enumerate() {
                let payload = vec![format!("tx {round}.{step}").into_bytes()];
                sync_and_run_consensus(&mut controllers, *from, *to, payload);
            }
        }
        controllers
    }

    /// Inserts the init scenario into node 0 with e01 created by node 0 itself.
    fn init_hashgraph(controllers: &mut [Controller]) -> BTreeMap<&'static str, EventHash> {
        let mut names = BTreeMap::new();
        for (id, name) in ["e0", "e1", "e2"].into_iter().enumerate() {
            names.insert(name, controllers[id].head().unwrap());
        }
        for id in 1..3 {
            let event = controllers[id].get_event(&names[["e0", "e1", "e2"][id]]).unwrap();
            controllers[0].insert_event(event, true).unwrap();
        }

        let keys = keys(3);
        let build = |creator: usize, parents: (EventHash, EventHash)| {
            let body = EventBody::new(
                vec![],
                vec![],
                (Some(parents.0), Some(parents.1)),
                keys[creator].public_key(),
                1,
            );
            let mut event = Event::new(body).unwrap();
            event.sign(&keys[creator]);
            event
        };

        let e01 = build(0, (names["e0"], names["e1"]));
        controllers[0].sign_and_insert_self_event(e01).unwrap();
        names.insert("e01", controllers[0].head().unwrap());

        let e20 = build(2, (names["e2"], names["e01"]));
        names.insert("e20", e20.hash());
        controllers[0].insert_event(e20, true).unwrap();

        let e12 = build(1, (names["e1"], names["e20"]));
        names.insert("e12", e12.hash());
        controllers[0].insert_event(e12, true).unwrap();
        names
    }

    #[test]
    fn test_init() {
        let controllers = init_controllers(3);
        for controller in &controllers {
            assert_eq!(controller.seq(), 0);
            let head = controller.get_event(&controller.head().unwrap()).unwrap();
            assert_eq!(head.self_parent(), None);
            assert_eq!(head.other_parent(), None);
            assert!(head.verify());
        }
    }

    #[test]
    fn test_init_twice_keeps_first_event() {
        let mut controllers = init_controllers(1);
        let head = controllers[0].head();
        controllers[0].init().unwrap();
        assert_eq!(controllers[0].head(), head);
        assert_eq!(controllers[0].seq(), 0);
    }

    #[test]
    fn test_event_diff_is_topological() {
        let mut controllers = init_controllers(3);
        let names = init_hashgraph(&mut controllers);

        let known_by_1 = controllers[1].known_events();
        let unknown_by_1 = controllers[0].event_diff(&known_by_1).unwrap();

        let expected: Vec<EventHash> = ["e0", "e2", "e01", "e20", "e12"]
            .iter()
            .map(|name| names[name])
            .collect();
        let got: Vec<EventHash> = unknown_by_1.iter().map(Event::hash).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_sync() {
        let mut controllers = init_controllers(3);
        let e0 = controllers[0].head().unwrap();
        let e1 = controllers[1].head().unwrap();
        let e2 = controllers[2].head().unwrap();

        synchronize(&mut controllers, 1, 0, vec![]).unwrap();
        assert_eq!(
            controllers[0].known_events(),
            BTreeMap::from([(0, 1), (1, 0), (2, -1)])
        );
        let head = controllers[0].get_event(&controllers[0].head().unwrap()).unwrap();
        assert_eq!(head.self_parent(), Some(e0));
        assert_eq!(head.other_parent(), Some(e1));
        let e01 = head.hash();

        synchronize(&mut controllers, 0, 2, vec![]).unwrap();
        assert_eq!(
            controllers[2].known_events(),
            BTreeMap::from([(0, 1), (1, 0), (2, 1)])
        );
        let head = controllers[2].get_event(&controllers[2].head().unwrap()).unwrap();
        assert_eq!(head.self_parent(), Some(e2));
        assert_eq!(head.other_parent(), Some(e01));
        let e20 = head.hash();

        synchronize(&mut controllers, 2, 1, vec![]).unwrap();
        assert_eq!(
            controllers[1].known_events(),
            BTreeMap::from([(0, 1), (1, 1), (2, 1)])
        );
        let head = controllers[1].get_event(&controllers[1].head().unwrap()).unwrap();
        assert_eq!(head.self_parent(), Some(e1));
        assert_eq!(head.other_parent(), Some(e20));
    }

    #[test]
    fn test_empty_sync_with_empty_pool_creates_nothing() {
        let mut controllers = init_controllers(2);
        controllers[0].sync(vec![]).unwrap();
        assert_eq!(controllers[0].seq(), 0);

        controllers[0].add_transactions(vec![b"tx".to_vec()]);
        assert!(controllers[0].need_gossip());
        controllers[0].sync(vec![]).unwrap();
        assert_eq!(controllers[0].seq(), 1);
        assert_eq!(controllers[0].transaction_pool_len(), 0);
        // the initial event and the one carrying the transaction still wait for consensus
        assert_eq!(controllers[0].pending_loaded_events(), 2);
        assert!(controllers[0].need_gossip());

        let head = controllers[0].get_event(&controllers[0].head().unwrap()).unwrap();
        assert_eq!(head.other_parent(), None);
        assert_eq!(head.transactions(), &[b"tx".to_vec()]);
    }

    #[test]
    fn test_sync_of_known_events_creates_nothing() {
        let mut controllers = init_controllers(2);
        let e1 = controllers[1].get_event(&controllers[1].head().unwrap()).unwrap();
        controllers[0].sync(vec![e1.to_wire()]).unwrap();
        assert_eq!(controllers[0].seq(), 1);

        controllers[0].sync(vec![e1.to_wire()]).unwrap();
        assert_eq!(controllers[0].seq(), 1);
        assert_eq!(controllers[0].known_events(), BTreeMap::from([(0, 1), (1, 0)]));
    }

    #[test]
    fn test_add_self_event() {
        let mut controllers = init_controllers(1);
        controllers[0].add_self_event().unwrap();
        assert_eq!(controllers[0].seq(), 0);

        controllers[0].add_transactions(vec![b"a".to_vec(), b"b".to_vec()]);
        controllers[0].add_self_event().unwrap();
        assert_eq!(controllers[0].seq(), 1);
        assert_eq!(controllers[0].transaction_pool_len(), 0);
        let head = controllers[0].head().unwrap();
        assert_eq!(
            controllers[0].event_transactions(&head).unwrap(),
            vec![b"a".to_vec(), b"b".to_vec()]
        );
    }

    #[test]
    fn test_consensus_agrees_across_nodes() {
        let controllers = consensus_controllers();

        let reference = controllers[0].consensus_events();
        assert_eq!(reference.len(), 6);
        assert_eq!(controllers[0].consensus_events_count(), 6);
        for controller in &controllers[1..] {
            assert_eq!(controller.consensus_events(), reference);
        }
        assert_eq!(
            controllers[0].consensus_transactions().unwrap(),
            controllers[1].consensus_transactions().unwrap()
        );
    }

    #[test]
    fn test_quiet_participant_with_small_cache() {
        let cache_size = 3;
        let keys = keys(4);
        let mut controllers: Vec<Controller> = (0..4)
            .map(|id| {
                let mut controller = controller_with_cache(id, &keys, None, cache_size);
                controller.init().unwrap();
                controller
            })
            .collect();
        let quiet = controllers[3].head().unwrap();
        sync_and_run_consensus(&mut controllers, 3, 0, vec![]);

        let playbook = [(0, 1), (1, 2), (2, 0), (0, 2), (1, 0), (2, 1)];
        for step in 0..60 {
            let (from, to) = playbook[step % playbook.len()];
            sync_and_run_consensus(&mut controllers, from, to, vec![format!("tx {step}").into_bytes()]);
        }
        assert!(controllers[0].consensus_events_count() > 0);
        assert!(controllers[0].hashgraph().store().contains_event(&quiet));

        // node 3 speaks again, its new event builds on the old one
        controllers[3].add_transactions(vec![b"late".to_vec()]);
        controllers[3].add_self_event().unwrap();
        sync_and_run_consensus(&mut controllers, 3, 0, vec![]);
        let consensus = controllers[0].consensus_events_count();

        for step in 0..30 {
            let (from, to) = playbook[step % playbook.len()];
            sync_and_run_consensus(&mut controllers, from, to, vec![]);
        }
        assert!(controllers[0].consensus_events_count() > consensus);

        let store = controllers[0].hashgraph().store();
        let last_consensus_round = controllers[0].last_consensus_round().unwrap();
        assert!(store.get_round(last_consensus_round).is_ok());
        for round in 0..last_consensus_round - cache_size as i64 {
            assert!(store.get_round(round).unwrap_err().is(StoreErrorKind::KeyNotFound));
        }
    }

    #[test]
    fn test_over_sync_limit() {
        let controllers = consensus_controllers();
        let node = &controllers[0];
        assert_eq!(node.known_events(), BTreeMap::from([(0, 6), (1, 6), (2, 5)]));

        assert!(node.over_sync_limit(&BTreeMap::from([(0, 1), (1, 1), (2, 1)]), 10));
        assert!(!node.over_sync_limit(&BTreeMap::from([(0, 6), (1, 6), (2, 6)]), 10));
        assert!(!node.over_sync_limit(&BTreeMap::from([(0, 2), (1, 3), (2, 3)]), 10));
        // a gap of exactly the limit is still fine
        assert!(!node.over_sync_limit(&BTreeMap::from([(0, 2), (1, 2), (2, 3)]), 10));
        assert!(node.over_sync_limit(&BTreeMap::from([(0, 1), (1, 2), (2, 3)]), 10));
    }

    #[test]
    fn test_failed_sync_leaves_nothing_behind() {
        let mut controllers = init_controllers(3);
        let e1 = controllers[1].get_event(&controllers[1].head().unwrap()).unwrap();
        let mut forged = controllers[2]
            .get_event(&controllers[2].head().unwrap())
            .unwrap()
            .to_wire();
        forged.body.timestamp += 1;

        let head = controllers[0].head();
        controllers[0].add_transactions(vec![b"kept".to_vec()]);
        let err = controllers[0]
            .sync(vec![e1.to_wire(), forged])
            .unwrap_err();

        assert_matches!(
            err,
            ControllerError::Hashgraph(HashgraphError::InvalidSignature(_))
        );
        assert!(!controllers[0].hashgraph().store().contains_event(&e1.hash()));
        assert_eq!(
            controllers[0].known_events(),
            BTreeMap::from([(0, 0), (1, -1), (2, -1)])
        );
        assert_eq!(controllers[0].head(), head);
        assert_eq!(controllers[0].seq(), 0);
        assert_eq!(controllers[0].transaction_pool_len(), 1);
    }

    #[test]
    fn test_process_sync_request() {
        let mut controllers = consensus_controllers();
        let fresh = SyncRequest {
            from_id: 1,
            known: BTreeMap::from([(0, 0), (1, 0), (2, 0)]),
        };
        let response = controllers[0].process_sync_request(&fresh, 10).unwrap();
        assert!(response.sync_limit);
        assert!(response.events.is_empty());
        assert_eq!(response.known, controllers[0].known_events());

        let request = SyncRequest {
            from_id: 1,
            known: controllers[1].known_events(),
        };
        let response = controllers[0].process_sync_request(&request, 10).unwrap();
        assert!(!response.sync_limit);
        controllers[1]
            .sync_and_run_consensus(response.events)
            .unwrap();
        let known = controllers[1].known_events();
        assert_eq!(known[&0], controllers[0].known_events()[&0]);
    }

    #[test]
    fn test_fast_forward() {
        let controllers = consensus_controllers();
        let response = controllers[0]
            .process_fast_forward_request(&FastForwardRequest { from_id: 2 })
            .unwrap();

        let keys = keys(3);
        let mut lagging = controller(2, &keys, None);
        lagging.fast_forward(&response.frame).unwrap();

        assert_eq!(lagging.known_events(), controllers[0].known_events());
        let (last, _) = controllers[0]
            .hashgraph()
            .store()
            .last_event_from(&keys[2].public_key())
            .unwrap();
        assert_eq!(lagging.head(), last);
        assert_eq!(lagging.seq(), controllers[0].known_events()[&2]);

        lagging.add_transactions(vec![b"after".to_vec()]);
        lagging.add_self_event().unwrap();
        assert_eq!(lagging.seq(), controllers[0].known_events()[&2] + 1);
    }

    #[test]
    fn test_sign_block() {
        let mut controllers = init_controllers(2);
        let block = Block::new(0, 1, vec![b"tx".to_vec()]);
        let peer_signature = block.sign(&keys(2)[1]).unwrap();
        let mut stored = block.clone();
        stored.set_signature(peer_signature.clone());
        controllers[0].hg.store_mut().set_block(stored).unwrap();

        let signature = controllers[0].sign_block(block.clone()).unwrap();
        assert_eq!(signature.index, 0);
        assert_eq!(signature.validator, controllers[0].public_key());
        assert!(block.verify(&signature).unwrap());

        let stored = controllers[0].hashgraph().store().get_block(0).unwrap();
        assert_eq!(stored.signatures.get(&signature.validator), Some(&signature.signature));
        assert_eq!(
            stored.signatures.get(&peer_signature.validator),
            Some(&peer_signature.signature)
        );
    }

    #[test]
    fn test_blocks_are_delivered_after_commit() {
        let keys = keys(3);
        let (commit_tx, mut commit_rcv) = mpsc::unbounded_channel();
        let mut controllers: Vec<Controller> = (0..3)
            .map(|id| {
                let tx = if id == 0 { Some(commit_tx.clone()) } else { None };
                let mut controller = controller(id, &keys, tx);
                controller.init().unwrap();
                controller
            })
            .collect();

        let playbook = [(0, 1), (1, 2), (2, 0), (0, 1), (1, 0), (1, 2)];
        for round in 0..3 {
            for (step, (from, to)) in playbook.iter().enumerate() {
                let payload = vec![format!("tx {round}.{step}").into_bytes()];
                sync_and_run_consensus(&mut controllers, *from, *to, payload);
            }
        }

        let mut blocks = vec![];
        while let Ok(block) = commit_rcv.try_recv() {
            blocks.push(block);
        }
        assert!(!blocks.is_empty());
        for (expected, block) in blocks.iter().enumerate() {
            assert_eq!(block.index(), expected as u64);
        }
        assert_eq!(controllers[0].last_block_index(), Some(blocks.len() as u64 - 1));
    }
}

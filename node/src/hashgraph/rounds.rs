use crate::hashgraph::event::{Event, EventHash};
use crate::hashgraph::root::Root;
use crate::hashgraph::round::RoundInfo;
use crate::hashgraph::{Hashgraph, HashgraphError, Result};
use crate::storage::StoreErrorKind;

#[derive(Debug, Clone, Copy)]
struct ParentRound {
    round: i64,
    is_root: bool,
}

impl Hashgraph {
    /// True if `y` is an ancestor of `x`, or `x` itself.
    pub fn see(&self, x: &EventHash, y: &EventHash) -> bool {
        match (self.store.get_event(x), self.store.get_event(y)) {
            (Ok(x), Ok(y)) => self.sees(x, y),
            _ => false,
        }
    }

    /// True if `x` reaches `y` through events of a supermajority of participants.
    pub fn strongly_see(&self, x: &EventHash, y: &EventHash) -> bool {
        match (self.store.get_event(x), self.store.get_event(y)) {
            (Ok(x), Ok(y)) => self.strongly_sees(x, y),
            _ => false,
        }
    }

    pub(crate) fn sees(&self, x: &Event, y: &Event) -> bool {
        match self.participants.id(y.creator()) {
            Some(id) => x.last_ancestors[id].index >= y.index(),
            None => false,
        }
    }

    pub(crate) fn strongly_sees(&self, x: &Event, y: &Event) -> bool {
        let seen_through = x
            .last_ancestors
            .iter()
            .zip(&y.first_descendants)
            .filter(|(ancestor, descendant)| ancestor.index >= descendant.index)
            .count();
        seen_through >= self.super_majority
    }

    /// Round of an event which has gone through `divide_rounds`.
    pub fn round(&self, hash: &EventHash) -> Result<i64> {
        self.store
            .get_event(hash)?
            .round()
            .ok_or(HashgraphError::MissingRound(*hash))
    }

    pub fn witness(&self, hash: &EventHash) -> Result<bool> {
        let event = self.store.get_event(hash)?;
        match event.round() {
            Some(_) => Ok(event.is_witness()),
            None => Err(HashgraphError::MissingRound(*hash)),
        }
    }

    /// Assigns a round to every undetermined event and files it under its round.
    pub fn divide_rounds(&mut self) -> Result<()> {
        for hash in self.state.undetermined_events.clone() {
            if self.store.get_event(&hash)?.round().is_none() {
                self.assign_round(hash)?;
            }
        }
        Ok(())
    }

    /// Rounds depend on the rounds of both parents. Ancestors without one are handled first,
    /// with an explicit stack so that long chains can't overflow.
    fn assign_round(&mut self, hash: EventHash) -> Result<()> {
        let mut stack = vec![hash];
        while let Some(&top) = stack.last() {
            let event = self.store.get_event(&top)?;
            if event.round().is_some() {
                stack.pop();
                continue;
            }

            let unassigned: Vec<EventHash> = [event.self_parent(), event.other_parent()]
                .into_iter()
                .flatten()
                .filter(|parent| {
                    self.store
                        .get_event(parent)
                        .map(|parent| parent.round().is_none())
                        .unwrap_or(false)
                })
                .collect();
            if !unassigned.is_empty() {
                stack.extend(unassigned);
                continue;
            }

            let mut event = event.clone();
            let root = self.store.get_root(event.creator())?;
            let round = self.compute_round(&event, &root)?;
            let witness = self.is_witness(&event, round, &root)?;
            event.set_round(round, witness)?;
            log::trace!("Event {:?} round {round}, witness: {witness}", top);

            self.store.set_event(event)?;
            self.file_under_round(top, round, witness)?;
            stack.pop();
        }
        Ok(())
    }

    fn file_under_round(&mut self, hash: EventHash, round: i64, witness: bool) -> Result<()> {
        let mut info = match self.store.get_round(round) {
            Ok(info) => info,
            Err(err) if err.is(StoreErrorKind::KeyNotFound) => RoundInfo::default(),
            Err(err) => return Err(err.into()),
        };
        if !info.queued {
            self.state.undecided_rounds.insert(round);
            info.queued = true;
        }
        info.add_event(hash, witness);
        self.store.set_round(round, info)?;
        Ok(())
    }

    fn compute_round(&self, event: &Event, root: &Root) -> Result<i64> {
        let parent = self.parent_round(event, root)?;
        if parent.is_root {
            return Ok(parent.round + 1);
        }

        let mut strongly_seen = 0;
        for witness in self.store.round_witnesses(parent.round) {
            let Ok(witness) = self.store.get_event(&witness) else {
                continue;
            };
            if self.strongly_sees(event, witness) {
                strongly_seen += 1;
            }
        }
        if strongly_seen >= self.super_majority {
            Ok(parent.round + 1)
        } else {
            Ok(parent.round)
        }
    }

    /// The higher of the two parent rounds. Parents replaced by the root take the root's round.
    fn parent_round(&self, event: &Event, root: &Root) -> Result<ParentRound> {
        let self_parent = match event.self_parent() {
            parent if parent == root.x => ParentRound {
                round: root.round,
                is_root: true,
            },
            Some(parent) => ParentRound {
                round: self.round(&parent)?,
                is_root: false,
            },
            None => ParentRound {
                round: -1,
                is_root: false,
            },
        };

        let other_parent = match event.other_parent() {
            Some(parent) if self.store.contains_event(&parent) => ParentRound {
                round: self.round(&parent)?,
                is_root: false,
            },
            parent if parent == root.y => ParentRound {
                round: root.round,
                is_root: true,
            },
            Some(parent) if root.others.get(&event.hash()) == Some(&parent) => ParentRound {
                round: root.round,
                is_root: false,
            },
            _ => ParentRound {
                round: -1,
                is_root: false,
            },
        };

        if self_parent.round < other_parent.round {
            Ok(other_parent)
        } else {
            Ok(self_parent)
        }
    }

    fn is_witness(&self, event: &Event, round: i64, root: &Root) -> Result<bool> {
        if event.self_parent() == root.x && event.other_parent() == root.y {
            return Ok(true);
        }
        let self_parent_round = match event.self_parent() {
            parent if parent == root.x => root.round,
            Some(parent) => self.round(&parent)?,
            None => -1,
        };
        Ok(round > self_parent_round)
    }
}

#[cfg(test)]
mod test {
    use crate::hashgraph::test::{init_graph, play, TestGraph};

    #[test]
    fn test_first_events_are_round_zero_witnesses() {
        let mut graph = init_graph();
        graph.hashgraph.divide_rounds().unwrap();

        for name in ["e0", "e1", "e2"] {
            assert_eq!(graph.hashgraph.round(&graph.hash(name)).unwrap(), 0);
            assert!(graph.hashgraph.witness(&graph.hash(name)).unwrap());
        }
        for name in ["e01", "e20"] {
            assert_eq!(graph.hashgraph.round(&graph.hash(name)).unwrap(), 0);
            assert!(!graph.hashgraph.witness(&graph.hash(name)).unwrap());
        }
        // e12 strongly sees e0 and e1 but not e2
        assert_eq!(graph.hashgraph.round(&graph.hash("e12")).unwrap(), 0);
        assert_eq!(graph.hashgraph.undecided_rounds(), vec![0]);
    }

    /// ```text
    /// e02 |   |
    /// | \ |   |
    /// |  e21  |
    /// |   | \ |
    /// |   |  e12
    /// |   | / |
    /// |  e20  |
    /// | / |   |
    /// e01 |   |
    /// | \ |   |
    /// e0  e1  e2
    /// ```
    fn round_one_graph() -> TestGraph {
        let mut graph = TestGraph::new(3, None);
        graph.insert(play("e0", 0, None, None));
        graph.insert(play("e1", 1, None, None));
        graph.insert(play("e2", 2, None, None));
        graph.insert(play("e01", 0, Some("e0"), Some("e1")));
        graph.insert(play("e20", 2, Some("e2"), Some("e01")));
        graph.insert(play("e12", 1, Some("e1"), Some("e20")));
        graph.insert(play("e21", 2, Some("e20"), Some("e12")));
        graph.insert(play("e02", 0, Some("e01"), Some("e21")));
        graph
    }

    #[test]
    fn test_round_increments_on_supermajority() {
        let mut graph = round_one_graph();
        graph.hashgraph.divide_rounds().unwrap();
        let hg = &graph.hashgraph;

        // e21 doesn't reach e2 through creator 0 yet, e02 does
        assert_eq!(hg.round(&graph.hash("e21")).unwrap(), 0);
        assert!(!hg.witness(&graph.hash("e21")).unwrap());
        assert_eq!(hg.round(&graph.hash("e02")).unwrap(), 1);
        assert!(hg.witness(&graph.hash("e02")).unwrap());
        assert_eq!(hg.store().last_round(), 1);
        assert_eq!(hg.undecided_rounds(), vec![0, 1]);
        assert_eq!(hg.store().round_witnesses(1), vec![graph.hash("e02")]);
    }

    #[test]
    fn test_rounds_never_decrease_along_self_parents() {
        let mut graph = round_one_graph();
        graph.hashgraph.divide_rounds().unwrap();

        let chains = [vec!["e0", "e01", "e02"], vec!["e1", "e12"], vec!["e2", "e20", "e21"]];
        for chain in chains {
            let rounds: Vec<i64> = chain
                .iter()
                .map(|name| graph.hashgraph.round(&graph.hash(name)).unwrap())
                .collect();
            assert!(rounds.windows(2).all(|w| w[0] <= w[1]), "{chain:?}: {rounds:?}");
        }
    }

    #[test]
    fn test_divide_rounds_is_idempotent() {
        let mut graph = round_one_graph();
        graph.hashgraph.divide_rounds().unwrap();
        let round_zero = graph.hashgraph.store().get_round(0).unwrap();

        graph.hashgraph.divide_rounds().unwrap();
        assert_eq!(graph.hashgraph.store().get_round(0).unwrap(), round_zero);
        assert_eq!(round_zero.witnesses().len(), 3);
    }
}

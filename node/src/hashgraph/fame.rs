use std::collections::HashMap;

use crate::hashgraph::event::EventHash;
use crate::hashgraph::{Hashgraph, Result};

/// Votes of later witnesses `(voter, candidate)` on the fame of earlier ones.
type Votes = HashMap<(EventHash, EventHash), bool>;

impl Hashgraph {
    /// Virtual voting on the fame of the witnesses of every undecided round.
    ///
    /// Witnesses of the next round vote yes for the witnesses they strongly see. Witnesses of each
    /// later round adopt the majority vote of the previous round's witnesses they strongly see, and
    /// decide once that majority is a supermajority. Every `coin_round_frequency`-th round nothing is
    /// decided and witnesses without a supermajority flip a coin taken from their signature.
    pub fn decide_fame(&mut self) -> Result<()> {
        let mut votes = Votes::new();
        let mut decided_rounds = vec![];
        let last_round = self.store.last_round();

        for round in self.undecided_rounds() {
            let mut round_info = self.store.get_round(round)?;

            for candidate in round_info.witnesses() {
                if round_info.is_decided(&candidate) {
                    continue;
                }

                'voting: for voting_round in round + 1..=last_round {
                    for voter in self.store.round_witnesses(voting_round) {
                        let (vote, decided) =
                            self.vote(&votes, &voter, &candidate, voting_round - round, voting_round)?;
                        votes.insert((voter, candidate), vote);
                        if decided {
                            log::debug!(
                                "Witness {:?} of round {round} decided, famous: {vote}",
                                candidate
                            );
                            round_info.set_fame(candidate, vote)?;
                            break 'voting;
                        }
                    }
                }
            }

            if round_info.witnesses_decided() {
                decided_rounds.push(round);
                if self.state.last_consensus_round.map_or(true, |last| round > last) {
                    log::debug!("Round {round} decided");
                    self.state.last_consensus_round = Some(round);
                }
            }
            self.store.set_round(round, round_info)?;
        }

        for round in decided_rounds {
            self.state.undecided_rounds.remove(&round);
        }
        Ok(())
    }

    /// Vote of a witness `distance` rounds above the candidate, and whether it decides the
    /// candidate's fame. Coin rounds never decide.
    fn vote(
        &self,
        votes: &Votes,
        voter: &EventHash,
        candidate: &EventHash,
        distance: i64,
        voting_round: i64,
    ) -> Result<(bool, bool)> {
        if distance == 1 {
            return Ok((self.strongly_see(voter, candidate), false));
        }
        let (vote, tally) = self.tally(votes, voter, candidate, voting_round - 1);
        if distance % self.coin_round_frequency != 0 {
            Ok((vote, tally >= self.super_majority))
        } else if tally >= self.super_majority {
            Ok((vote, false))
        } else {
            let coin = self.coin(voter)?;
            log::trace!("Coin round, {:?} votes {coin}", voter);
            Ok((coin, false))
        }
    }

    /// Majority vote of the witnesses of `round` which `voter` strongly sees, and its size.
    /// Ties count as yes.
    fn tally(&self, votes: &Votes, voter: &EventHash, candidate: &EventHash, round: i64) -> (bool, usize) {
        let mut yays = 0;
        let mut nays = 0;
        for witness in self.store.round_witnesses(round) {
            if !self.strongly_see(voter, &witness) {
                continue;
            }
            match votes.get(&(witness, *candidate)) {
                Some(true) => yays += 1,
                Some(false) => nays += 1,
                None => {}
            }
        }
        if yays >= nays {
            (true, yays)
        } else {
            (false, nays)
        }
    }

    /// Low bit of the middle byte of the voter's signature.
    fn coin(&self, voter: &EventHash) -> Result<bool> {
        let signature = self.store.get_event(voter)?.signature().as_bytes();
        Ok(signature
            .get(signature.len() / 2)
            .map_or(false, |byte| byte & 1 == 1))
    }
}

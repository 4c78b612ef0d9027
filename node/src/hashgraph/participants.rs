use std::collections::BTreeMap;

use crate::crypto::PublicKey;

/// The fixed peer set. Ids are small integers, stable for the life of the network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Participants {
    by_pub_key: BTreeMap<PublicKey, usize>,
    by_id: BTreeMap<usize, PublicKey>,
}

impl Participants {
    /// Assigns ids in iteration order.
    pub fn new<I: IntoIterator<Item = PublicKey>>(keys: I) -> Self {
        Self::from_pairs(keys.into_iter().enumerate())
    }

    pub fn from_pairs<I: IntoIterator<Item = (usize, PublicKey)>>(pairs: I) -> Self {
        let mut participants = Participants::default();
        for (id, key) in pairs {
            participants.by_pub_key.insert(key, id);
            participants.by_id.insert(id, key);
        }
        participants
    }

    pub fn id(&self, key: &PublicKey) -> Option<usize> {
        self.by_pub_key.get(key).copied()
    }

    pub fn pub_key(&self, id: usize) -> Option<&PublicKey> {
        self.by_id.get(&id)
    }

    pub fn contains(&self, key: &PublicKey) -> bool {
        self.by_pub_key.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Participants ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &PublicKey)> {
        self.by_id.iter().map(|(id, key)| (*id, key))
    }

    /// Strictly more than two thirds.
    pub fn super_majority(&self) -> usize {
        2 * self.len() / 3 + 1
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hashgraph::event::EventHash;

/// Base from which a participant's events are evaluated when their real ancestry is not stored.
///
/// `x` and `y` are the self parent and other parent of the first event that follows the root,
/// `index` is the index of `x` and `round` its round. `others` maps events of this participant
/// to other parents which are known only by hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    pub x: Option<EventHash>,
    pub y: Option<EventHash>,
    pub index: i64,
    pub round: i64,
    pub others: BTreeMap<EventHash, EventHash>,
}

impl Root {
    /// Root of a participant that hasn't created any events yet.
    pub fn base() -> Self {
        Root {
            x: None,
            y: None,
            index: -1,
            round: -1,
            others: BTreeMap::new(),
        }
    }
}

impl Default for Root {
    fn default() -> Self {
        Root::base()
    }
}

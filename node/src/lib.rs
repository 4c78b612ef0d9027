//! # Hashgraph
//!
//! A hashgraph consensus node. Participants gossip signed events and every node orders the
//! transactions they carry into the same sequence of blocks without exchanging votes.
//!
//! The crate keeps the transport outside: [`NodeHandle`] produces and answers the sync and
//! fast-forward messages, the integrator carries them between nodes and implements
//! [`api::Application`] to receive committed blocks.

pub mod api;
pub(crate) mod block;
pub mod cli;
pub mod config;
pub(crate) mod core;
pub mod crypto;
pub(crate) mod hashgraph;
pub mod logging;
pub(crate) mod storage;
pub(crate) mod utilities;

pub use crate::block::{Block, BlockBody, BlockSignature};
pub use crate::core::builder::NodeStarter;
pub use crate::core::controller::{ConsensusStage, Controller, ControllerError};
pub use crate::core::messages::{
    FastForwardRequest, FastForwardResponse, SyncRequest, SyncResponse,
};
pub use crate::core::node::{Node, NodeHandle};
pub use crate::core::shutdown::ShutdownHandle;
pub use crate::hashgraph::event::{Event, EventHash};
pub use crate::hashgraph::participants::Participants;
pub use crate::hashgraph::round::Fame;
pub use crate::hashgraph::{
    EventBody, Frame, Hashgraph, HashgraphError, Received, Root, RoundInfo, WireEvent,
};
pub use crate::storage::{InmemStore, Store, StoreError, StoreErrorKind};
pub use crate::utilities::encoding::{Decode, Encode};

//! Everything around the hashgraph that makes a node: the sync protocol, serialized access to
//! it and the async loop which drives heartbeats and block delivery.

pub(crate) mod builder;
pub(crate) mod controller;
pub(crate) mod messages;
pub(crate) mod node;
pub(crate) mod shutdown;

//! Requests and responses exchanged between peers. Transport is left to the integrator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hashgraph::{Frame, WireEvent};
use crate::utilities::encoding;
use crate::utilities::encoding::{Decode, Encode};

/// Sent by a node to pull what it is missing. `known` is the sender's last index per participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub from_id: usize,
    pub known: BTreeMap<usize, i64>,
}

/// When `sync_limit` is set, the requester is too far behind and should ask for a frame instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub from_id: usize,
    pub sync_limit: bool,
    pub events: Vec<WireEvent>,
    pub known: BTreeMap<usize, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastForwardRequest {
    pub from_id: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastForwardResponse {
    pub from_id: usize,
    pub frame: Frame,
}

impl Encode for SyncRequest {
    fn encode(&self) -> anyhow::Result<Vec<u8>> {
        encoding::encode(self)
    }
}

impl Decode for SyncRequest {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        encoding::decode(bytes)
    }
}

impl Encode for SyncResponse {
    fn encode(&self) -> anyhow::Result<Vec<u8>> {
        encoding::encode(self)
    }
}

impl Decode for SyncResponse {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        encoding::decode(bytes)
    }
}

impl Encode for FastForwardRequest {
    fn encode(&self) -> anyhow::Result<Vec<u8>> {
        encoding::encode(self)
    }
}

impl Decode for FastForwardRequest {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        encoding::decode(bytes)
    }
}

impl Encode for FastForwardResponse {
    fn encode(&self) -> anyhow::Result<Vec<u8>> {
        encoding::encode(self)
    }
}

impl Decode for FastForwardResponse {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        encoding::decode(bytes)
    }
}

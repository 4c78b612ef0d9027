use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::api::Application;
use crate::block::{Block, BlockSignature};
use crate::core::builder::NodeInfo;
use crate::core::controller::{Controller, ControllerError, Result};
use crate::core::messages::{FastForwardRequest, FastForwardResponse, SyncRequest, SyncResponse};
use crate::core::shutdown::{Shutdown, ShutdownHandle, ShutdownManager};
use crate::hashgraph::event::EventHash;

/// Shared access to a node's controller.
///
/// Answering peers only needs a read lock, so several requests can be served at once. Anything
/// that inserts events or runs consensus takes the write lock for the whole cycle.
#[derive(Clone)]
pub struct NodeHandle {
    controller: Arc<RwLock<Controller>>,
    sync_limit: usize,
    /// Stops the node loop
    pub shutdown: ShutdownHandle,
}

impl NodeHandle {
    pub(crate) fn new(controller: Controller, sync_limit: usize, shutdown: ShutdownHandle) -> Self {
        NodeHandle {
            controller: Arc::new(RwLock::new(controller)),
            sync_limit,
            shutdown,
        }
    }

    pub fn id(&self) -> usize {
        self.controller.read().id()
    }

    pub fn known_events(&self) -> BTreeMap<usize, i64> {
        self.controller.read().known_events()
    }

    /// Request to send to a peer to pull the events this node is missing.
    pub fn sync_request(&self) -> SyncRequest {
        let controller = self.controller.read();
        SyncRequest {
            from_id: controller.id(),
            known: controller.known_events(),
        }
    }

    pub fn process_sync_request(&self, request: &SyncRequest) -> Result<SyncResponse> {
        log::trace!("Sync request from {}", request.from_id);
        self.controller
            .read()
            .process_sync_request(request, self.sync_limit)
    }

    /// Inserts the peer's events and runs consensus. Fails with `SyncLimit` when the peer
    /// answered that this node should fast-forward instead.
    pub fn process_sync_response(&self, response: SyncResponse) -> Result<()> {
        if response.sync_limit {
            return Err(ControllerError::SyncLimit(response.from_id));
        }
        log::trace!(
            "Sync response from {} with {} events",
            response.from_id,
            response.events.len()
        );
        self.controller
            .write()
            .sync_and_run_consensus(response.events)
    }

    pub fn fast_forward_request(&self) -> FastForwardRequest {
        FastForwardRequest {
            from_id: self.controller.read().id(),
        }
    }

    pub fn process_fast_forward_request(
        &self,
        request: &FastForwardRequest,
    ) -> Result<FastForwardResponse> {
        self.controller.read().process_fast_forward_request(request)
    }

    pub fn process_fast_forward_response(&self, response: FastForwardResponse) -> Result<()> {
        log::info!(
            "Fast-forwarding to round {} from node {}",
            response.frame.round,
            response.from_id
        );
        self.controller.write().fast_forward(&response.frame)
    }

    pub fn submit_transaction(&self, transaction: Vec<u8>) {
        self.controller.write().add_transactions(vec![transaction]);
    }

    /// Flushes the pool into a self event and runs consensus.
    pub fn heartbeat(&self) -> Result<()> {
        let mut controller = self.controller.write();
        if !controller.need_gossip() {
            return Ok(());
        }
        controller.add_self_event()?;
        controller.run_consensus()
    }

    /// Signs a committed block and queues the signature for gossip.
    pub fn sign_block(&self, block: Block) -> Result<BlockSignature> {
        let mut controller = self.controller.write();
        let signature = controller.sign_block(block)?;
        controller.add_block_signature(signature.clone());
        Ok(signature)
    }

    pub fn consensus_events(&self) -> Vec<EventHash> {
        self.controller.read().consensus_events()
    }

    pub fn consensus_events_count(&self) -> usize {
        self.controller.read().consensus_events_count()
    }

    pub fn last_consensus_round(&self) -> Option<i64> {
        self.controller.read().last_consensus_round()
    }

    pub fn last_block_index(&self) -> Option<u64> {
        self.controller.read().last_block_index()
    }

    pub fn get_block(&self, index: u64) -> Result<Block> {
        Ok(self.controller.read().hashgraph().store().get_block(index)?)
    }
}

pub struct Node<A: Application> {
    pub(crate) node_info: NodeInfo,

    pub(crate) handle: NodeHandle,

    /// Receives the blocks agreed on by the hashgraph, in order.
    pub(crate) commit_rcv: Option<UnboundedReceiver<Block>>,

    pub(crate) application: Arc<A>,

    pub(crate) shutdown_manager: Option<ShutdownManager>,
}

impl<A: Application + 'static> Node<A> {
    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    /// Main loop of the node.
    /// 1. Every heartbeat, pending transactions are packed into an event and consensus runs.
    /// 2. Committed blocks are handed to the application by a separate task, then signed.
    /// 3. Stops when the shutdown handle is used.
    pub async fn run(mut self) -> anyhow::Result<()> {
        log::info!("Starting node {}", self.node_info);

        let mut shutdown_manager = self
            .shutdown_manager
            .take()
            .ok_or_else(|| anyhow::anyhow!("Node already started"))?;
        let commit_rcv = self
            .commit_rcv
            .take()
            .ok_or_else(|| anyhow::anyhow!("Node already started"))?;

        let delivery = tokio::spawn(deliver_blocks(
            self.application.clone(),
            self.handle.clone(),
            commit_rcv,
            shutdown_manager.subscribe(),
        ));
        shutdown_manager.add_handle(delivery);

        let mut heartbeat = tokio::time::interval(self.node_info.heartbeat_interval);
        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if let Err(err) = self.handle.heartbeat() {
                        log::error!("Heartbeat failed: {err}");
                    }
                }

                _ = shutdown_manager.external_shutdown.recv() => {
                    log::info!("Shutting down node {}", self.node_info.id);
                    shutdown_manager.stop().await;
                    break;
                }
            }
        }
        Ok(())
    }
}

async fn deliver_blocks<A: Application>(
    application: Arc<A>,
    handle: NodeHandle,
    mut commit_rcv: UnboundedReceiver<Block>,
    mut shutdown: Shutdown,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            block = commit_rcv.recv() => {
                let Some(block) = block else {
                    log::info!("Commit channel closed");
                    break;
                };
                if let Err(err) = deliver_block(application.as_ref(), &handle, block) {
                    log::error!("Error delivering block: {err}");
                }
            }
            _ = shutdown.shutdown_signal_rcv.recv() => {
                log::info!("Block delivery stopped");
                break;
            }
        }
    }
    Ok(())
}

fn deliver_block<A: Application>(
    application: &A,
    handle: &NodeHandle,
    block: Block,
) -> anyhow::Result<()> {
    log::debug!("Delivering block {block}");
    let state_hash = application.commit_block(&block)?;
    log::trace!(
        "Block {} committed, state hash {}",
        block.index(),
        crate::utilities::to_hex(state_hash)
    );
    let signature = handle.sign_block(block)?;
    log::trace!("Block {} signed by {}", signature.index, signature.validator);
    Ok(())
}

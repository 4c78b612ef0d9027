use std::fmt::Display;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::sync::mpsc;

use crate::{
    api::Application,
    config::Configuration,
    core::{
        controller::Controller,
        node::{Node, NodeHandle},
        shutdown::ShutdownManager,
    },
    crypto::{Keypair, PublicKey},
    hashgraph::participants::Participants,
    storage::InmemStore,
};

#[derive(Clone)]
pub(crate) struct NodeInfo {
    pub(crate) id: usize,
    pub(crate) public_key: PublicKey,
    pub(crate) keypair: Arc<Keypair>,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) initial_config: Configuration,
}

impl NodeInfo {
    pub(crate) fn new(config: Configuration) -> anyhow::Result<Self> {
        let keypair = Arc::new(config.keypair()?);
        let public_key = keypair.public_key();
        if config.node.heartbeat_interval_ms == 0 {
            anyhow::bail!("Heartbeat interval must be positive");
        }

        let info = Self {
            id: config.node.id,
            public_key,
            keypair,
            heartbeat_interval: Duration::from_millis(config.node.heartbeat_interval_ms),
            initial_config: config,
        };
        Ok(info)
    }
}

impl Display for NodeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "NodeInfo {{ id: {}, public_key: {}, heartbeat_interval: {:?} }}",
            self.id, self.public_key, self.heartbeat_interval
        )
    }
}

pub struct NodeStarter<A: Application> {
    node_info: NodeInfo,
    participants: Participants,
    application: Option<A>,
}

impl<A> NodeStarter<A>
where
    A: Application + 'static,
{
    /// Validates the configuration. Nothing is allocated or spawned yet.
    pub fn new(config: Configuration) -> anyhow::Result<Self> {
        let node_info = NodeInfo::new(config.clone())?;
        let participants = config.participants()?;

        match participants.pub_key(node_info.id) {
            Some(key) if *key == node_info.public_key => {}
            Some(key) => anyhow::bail!(
                "Participant {} has key {key}, but the node key is {}",
                node_info.id,
                node_info.public_key
            ),
            None => anyhow::bail!("Node id {} is not a participant", node_info.id),
        }

        Ok(NodeStarter {
            node_info,
            participants,
            application: None,
        })
    }

    pub fn with_application(self, application: A) -> NodeStarter<A> {
        Self {
            application: Some(application),
            ..self
        }
    }

    /// Creates the store and the node's initial event.
    pub fn init_tasks(self) -> anyhow::Result<Node<A>> {
        info!("Initializing node {}...", self.node_info);
        let Some(application) = self.application else {
            anyhow::bail!("Application not set");
        };

        let config = &self.node_info.initial_config;
        let cache_size = NonZeroUsize::new(config.store.cache_size)
            .ok_or_else(|| anyhow::anyhow!("Cache size must be positive"))?;
        let store = InmemStore::new(self.participants.clone(), cache_size);

        let (commit_tx, commit_rcv) = mpsc::unbounded_channel();
        let mut controller = Controller::new(
            self.node_info.id,
            self.node_info.keypair.clone(),
            self.participants,
            Box::new(store),
            Some(commit_tx),
            config.consensus.coin_round_frequency,
        );
        controller.init()?;

        let (shutdown_manager, shutdown_handle) = ShutdownManager::init();
        let handle = NodeHandle::new(controller, config.consensus.sync_limit, shutdown_handle);

        Ok(Node {
            node_info: self.node_info,
            handle,
            commit_rcv: Some(commit_rcv),
            application: Arc::new(application),
            shutdown_manager: Some(shutdown_manager),
        })
    }
}

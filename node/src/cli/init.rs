use std::path::PathBuf;

use clap::Parser;

use crate::config::{
    Configuration, ConsensusConfiguration, NodeConfiguration, ParticipantSetting,
    StoreConfiguration, DEFAULT_CACHE_SIZE, DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_SYNC_LIMIT,
};
use crate::crypto::Keypair;

/// Generates keys and one configuration file per node of a new cluster.
#[derive(Debug, Clone, Parser)]
pub struct InitCmd {
    #[clap(long, default_value = "cluster")]
    pub cluster_name: String,
    #[clap(long, default_value_t = 4)]
    pub nodes: usize,
    /// Defaults to `~/.hashgraph/<cluster name>`.
    #[clap(long)]
    pub output_dir: Option<PathBuf>,
    #[clap(long, default_value_t = DEFAULT_HEARTBEAT_INTERVAL_MS)]
    pub heartbeat_interval_ms: u64,
    #[clap(long, default_value_t = DEFAULT_CACHE_SIZE)]
    pub cache_size: usize,
    #[clap(long, default_value_t = DEFAULT_SYNC_LIMIT)]
    pub sync_limit: usize,
    #[clap(long)]
    pub coin_round_frequency: Option<usize>,
}

impl InitCmd {
    pub fn execute(self) -> anyhow::Result<()> {
        if self.nodes == 0 {
            anyhow::bail!("A cluster needs at least one node");
        }
        let path = match &self.output_dir {
            Some(dir) => dir.clone(),
            None => Configuration::root_dir()?.join(&self.cluster_name),
        };
        if path.exists() {
            anyhow::bail!("Configuration directory already exists: {path:?}");
        }
        println!("Creating cluster configuration in: {path:?}");
        std::fs::create_dir_all(&path)?;

        for (id, configuration) in self.configurations().into_iter().enumerate() {
            let file = path.join(format!("node{id}.toml"));
            configuration.try_write(&file)?;
            println!("Node {id}: {file:?}");
        }
        Ok(())
    }

    pub(crate) fn configurations(&self) -> Vec<Configuration> {
        let keys: Vec<Keypair> = (0..self.nodes).map(|_| Keypair::generate(None)).collect();
        let participants: Vec<ParticipantSetting> = keys
            .iter()
            .enumerate()
            .map(|(id, key)| ParticipantSetting {
                id,
                public_key: key.public_key().to_base58(),
            })
            .collect();

        keys.iter()
            .enumerate()
            .map(|(id, key)| Configuration {
                node: NodeConfiguration {
                    id,
                    private_key: key.to_base58(),
                    heartbeat_interval_ms: self.heartbeat_interval_ms,
                },
                participants: participants.clone(),
                store: StoreConfiguration {
                    cache_size: self.cache_size,
                },
                consensus: ConsensusConfiguration {
                    sync_limit: self.sync_limit,
                    coin_round_frequency: self.coin_round_frequency,
                },
            })
            .collect()
    }
}

use std::time::Duration;

use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::Serialize;

use crate::api::InmemApplication;
use crate::cli::init::InitCmd;
use crate::config::{DEFAULT_CACHE_SIZE, DEFAULT_HEARTBEAT_INTERVAL_MS};
use crate::core::builder::NodeStarter;
use crate::core::controller::ControllerError;
use crate::core::node::NodeHandle;
use crate::hashgraph::event::EventHash;
use crate::logging::pretty_json;
use crate::utilities::to_hex;

/// Runs a cluster in this process, with random pairwise syncs instead of a network.
#[derive(Debug, Clone, Parser)]
pub struct SimulateCmd {
    #[clap(long, default_value_t = 4)]
    pub nodes: usize,
    /// Number of pairwise syncs, each preceded by one new transaction on the pulling node.
    #[clap(long, default_value_t = 200)]
    pub syncs: usize,
    #[clap(long)]
    pub seed: Option<u64>,
    #[clap(long, default_value_t = 1000)]
    pub sync_limit: usize,
    #[clap(long)]
    pub coin_round_frequency: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub syncs: usize,
    /// Nodes that fell behind the sync limit and were reset from a frame.
    pub fast_forwarded: Vec<usize>,
    pub consensus_events: Vec<usize>,
    pub last_consensus_round: Vec<Option<i64>>,
    pub committed_blocks: Vec<usize>,
    pub state_hashes: Vec<String>,
    pub agreed: bool,
}

impl SimulateCmd {
    pub async fn execute(self) -> anyhow::Result<()> {
        let report = self.run().await?;
        println!("{}", pretty_json(&report));
        if !report.agreed {
            anyhow::bail!("Nodes disagree on the consensus order");
        }
        println!("All nodes agree");
        Ok(())
    }

    pub(crate) async fn run(&self) -> anyhow::Result<SimulationReport> {
        if self.nodes < 2 {
            anyhow::bail!("A simulation needs at least two nodes");
        }
        let init = InitCmd {
            cluster_name: "simulation".to_string(),
            nodes: self.nodes,
            output_dir: None,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            cache_size: DEFAULT_CACHE_SIZE,
            sync_limit: self.sync_limit,
            coin_round_frequency: self.coin_round_frequency,
        };

        let mut handles = vec![];
        let mut applications = vec![];
        let mut running = vec![];
        for configuration in init.configurations() {
            let application = InmemApplication::new();
            let node = NodeStarter::new(configuration)?
                .with_application(application.clone())
                .init_tasks()?;
            handles.push(node.handle());
            applications.push(application);
            running.push(tokio::spawn(node.run()));
        }

        let mut rng = match self.seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        };
        let mut fast_forwarded = vec![];
        for step in 0..self.syncs {
            let to = rng.gen_range(0..self.nodes);
            let mut from = rng.gen_range(0..self.nodes - 1);
            if from >= to {
                from += 1;
            }
            handles[to].submit_transaction(format!("node{to} tx{step}").into_bytes());
            if pull(&handles, from, to)? {
                fast_forwarded.push(to);
            }
            // lets heartbeats and block delivery run
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(5 * DEFAULT_HEARTBEAT_INTERVAL_MS)).await;

        let agreed = agree(&handles, &applications, &fast_forwarded);
        let report = SimulationReport {
            syncs: self.syncs,
            fast_forwarded,
            consensus_events: handles.iter().map(NodeHandle::consensus_events_count).collect(),
            last_consensus_round: handles.iter().map(NodeHandle::last_consensus_round).collect(),
            committed_blocks: applications.iter().map(|app| app.state_hashes().len()).collect(),
            state_hashes: applications
                .iter()
                .map(|app| to_hex(app.state_hash()))
                .collect(),
            agreed,
        };

        for handle in &handles {
            handle.shutdown.clone().shutdown();
        }
        for node in running {
            node.await??;
        }
        Ok(report)
    }
}

/// One sync where `to` pulls from `from`. Returns true when `to` had to fast-forward.
fn pull(handles: &[NodeHandle], from: usize, to: usize) -> anyhow::Result<bool> {
    let request = handles[to].sync_request();
    let response = handles[from].process_sync_request(&request)?;
    match handles[to].process_sync_response(response) {
        Ok(()) => Ok(false),
        Err(ControllerError::SyncLimit(peer)) => {
            log::info!("Node {to} is too far behind node {peer}, fast-forwarding");
            let request = handles[to].fast_forward_request();
            let response = handles[peer].process_fast_forward_request(&request)?;
            handles[to].process_fast_forward_response(response)?;
            Ok(true)
        }
        Err(err) => Err(err.into()),
    }
}

/// Compares the nodes that kept their full history: consensus events on the range every pair has
/// in its window, and application state after every block both have committed.
fn agree(
    handles: &[NodeHandle],
    applications: &[InmemApplication],
    fast_forwarded: &[usize],
) -> bool {
    let complete: Vec<usize> = (0..handles.len())
        .filter(|id| !fast_forwarded.contains(id))
        .collect();

    let windows: Vec<(Vec<EventHash>, usize)> = complete
        .iter()
        .map(|id| {
            (
                handles[*id].consensus_events(),
                handles[*id].consensus_events_count(),
            )
        })
        .collect();
    for pair in windows.windows(2) {
        if !windows_agree(&pair[0], &pair[1]) {
            return false;
        }
    }

    let state_hashes: Vec<_> = complete
        .iter()
        .map(|id| applications[*id].state_hashes())
        .collect();
    state_hashes.windows(2).all(|pair| {
        let common = pair[0].len().min(pair[1].len());
        pair[0][..common] == pair[1][..common]
    })
}

/// Each window holds the last events of a sequence of `total` consensus events.
fn windows_agree(left: &(Vec<EventHash>, usize), right: &(Vec<EventHash>, usize)) -> bool {
    let (left_events, left_total) = left;
    let (right_events, right_total) = right;
    let left_start = left_total - left_events.len();
    let right_start = right_total - right_events.len();

    let start = left_start.max(right_start);
    let end = (*left_total).min(*right_total);
    if start >= end {
        return true;
    }
    left_events[start - left_start..end - left_start]
        == right_events[start - right_start..end - right_start]
}

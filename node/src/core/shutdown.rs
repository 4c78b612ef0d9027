use log::info;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

pub(crate) struct ShutdownManager {
    pub(crate) shutdown_tx: broadcast::Sender<()>,
    pub(crate) _shutdown_rcv: broadcast::Receiver<()>,
    pub(crate) external_shutdown: mpsc::UnboundedReceiver<()>,
    handles: Vec<JoinHandle<anyhow::Result<()>>>,
}

pub(crate) struct Shutdown {
    pub(crate) shutdown_signal_rcv: broadcast::Receiver<()>,
}

#[derive(Clone)]
pub struct ShutdownHandle {
    pub(crate) external_shutdown: mpsc::UnboundedSender<()>,
    pub(crate) shutdown_started: bool,
}

impl ShutdownHandle {
    /// Asks the node to stop. The node loop then signals its tasks and waits for them.
    pub fn shutdown(&mut self) {
        if self.shutdown_started {
            return;
        }
        self.shutdown_started = true;
        if self.external_shutdown.send(()).is_err() {
            log::warn!("Node already stopped");
        }
    }
}

impl ShutdownManager {
    pub(crate) fn init() -> (ShutdownManager, ShutdownHandle) {
        let (shutdown_tx, shutdown_rcv) = broadcast::channel(1);
        let (external_tx, external_rcv) = mpsc::unbounded_channel();
        let shutdown_handle = ShutdownHandle {
            external_shutdown: external_tx,
            shutdown_started: false,
        };
        let manager = Self {
            shutdown_tx,
            _shutdown_rcv: shutdown_rcv,
            external_shutdown: external_rcv,
            handles: vec![],
        };
        (manager, shutdown_handle)
    }

    pub(crate) async fn stop(self) {
        info!("Starting node shutdown");
        if self.shutdown_tx.send(()).is_err() {
            log::warn!("No task is listening for shutdown");
        }
        info!("Waiting for tasks to finish");
        for handle in self.handles {
            match handle.await {
                Ok(Ok(())) => info!("Task finished successfully"),
                Ok(Err(err)) => info!("Task finished with error: {err}"),
                Err(err) => log::error!("Task panicked or was cancelled: {err}"),
            }
        }
    }

    pub(crate) fn subscribe(&self) -> Shutdown {
        let shutdown = self.shutdown_tx.subscribe();
        Shutdown {
            shutdown_signal_rcv: shutdown,
        }
    }

    pub(crate) fn add_handle(&mut self, handle: JoinHandle<anyhow::Result<()>>) {
        self.handles.push(handle);
    }
}

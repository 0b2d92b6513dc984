use crate::{NodeError, Signal};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Sending half of a node's input channel, tagged with the node id.
///
/// Holding an outlet does not keep the node alive or own it; it only allows
/// signals to be queued on its channel.
#[derive(Debug, Clone)]
pub struct Outlet {
    id: String,
    tx: mpsc::Sender<Signal>,
}

impl Outlet {
    pub fn new(id: impl Into<String>, tx: mpsc::Sender<Signal>) -> Self {
        Self { id: id.into(), tx }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queues a signal, waiting as long as it takes.
    pub async fn send(&self, signal: Signal) -> Result<(), NodeError> {
        self.tx
            .send(signal)
            .await
            .map_err(|_| NodeError::Disconnected(self.id.clone()))
    }

    /// Queues a signal, giving up at `deadline` or when `cancel` fires.
    pub async fn send_until(
        &self,
        signal: Signal,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), NodeError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NodeError::Cancelled),
            sent = tokio::time::timeout_at(deadline, self.tx.send(signal)) => match sent {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(NodeError::Disconnected(self.id.clone())),
                Err(_) => Err(NodeError::SendTimeout {
                    node: self.id.clone(),
                    reason: "deadline elapsed".to_string(),
                }),
            },
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Core trait that all processing nodes implement.
///
/// Each node owns one input channel drained by its own task; `process_signal`
/// is what that task runs for every received signal.
#[async_trait]
pub trait Node: Send + Sync {
    fn id(&self) -> &str;

    /// Type identifier (e.g. "worker.llm", "control.branch")
    fn node_type(&self) -> &str;

    /// Handle for queueing signals on this node's input channel.
    fn outlet(&self) -> Outlet;

    /// Appends a downstream outlet. Delivery follows connect order.
    fn connect_outlet(&self, outlet: Outlet);

    /// Appends a downstream node.
    fn connect(&self, target: &dyn Node) {
        self.connect_outlet(target.outlet());
    }

    fn connections(&self) -> Vec<Outlet>;

    async fn process_signal(&self, signal: Signal);
}

/// Connects each node to the next one in `chain`.
pub fn connect_chain(chain: &[&dyn Node]) {
    for pair in chain.windows(2) {
        pair[0].connect(pair[1]);
    }
}

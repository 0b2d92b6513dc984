use crate::StateManager;
use relaycore::NodeError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Waits for an explicit set of nodes to report, bounded by a timeout.
pub struct Coordinator {
    state: Arc<StateManager>,
    timeout: Duration,
    cancel_on_timeout: bool,
}

impl Coordinator {
    pub fn new(state: Arc<StateManager>, timeout: Duration) -> Self {
        Self {
            state,
            timeout,
            cancel_on_timeout: false,
        }
    }

    /// Complete the workflow when the wait times out.
    pub fn cancel_on_timeout(mut self, cancel: bool) -> Self {
        self.cancel_on_timeout = cancel;
        self
    }

    /// Returns once every node in `nodes` has reported at least once.
    ///
    /// The first recorded failure among them is returned as an error. If the
    /// workflow completes before all of them reported, the wait ends with
    /// `Cancelled`.
    pub async fn wait_for_completion(&self, nodes: &[&str]) -> Result<(), NodeError> {
        let deadline = Instant::now() + self.timeout;
        let mut changes = self.state.subscribe();
        let shutdown = self.state.shutdown_token();

        loop {
            if let Some(err) = self.first_failure(nodes) {
                return Err(err);
            }
            if self.all_reported(nodes) {
                info!(nodes = ?nodes, "coordinated nodes reported");
                return Ok(());
            }
            if shutdown.is_cancelled() {
                return Err(NodeError::Cancelled);
            }

            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        return Err(NodeError::Cancelled);
                    }
                }
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(nodes = ?nodes, timeout = ?self.timeout, "coordination timed out");
                    if self.cancel_on_timeout {
                        self.state.complete();
                    }
                    return Err(NodeError::Timeout {
                        millis: self.timeout.as_millis() as u64,
                    });
                }
            }
        }
    }

    fn all_reported(&self, nodes: &[&str]) -> bool {
        nodes
            .iter()
            .all(|id| self.state.get_state(id).completed > 0)
    }

    fn first_failure(&self, nodes: &[&str]) -> Option<NodeError> {
        nodes.iter().find_map(|id| {
            let state = self.state.get_state(id);
            if state.failures == 0 {
                return None;
            }
            let reason = state.last_error.unwrap_or_default();
            Some(NodeError::ExecutionFailed(format!("{id}: {reason}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycore::{Carrier, Signal, Status};

    fn success(node: &str) -> Signal {
        let mut sig = Signal::new(node, Carrier::empty());
        sig.status = Status::Success;
        sig
    }

    #[tokio::test]
    async fn returns_when_all_nodes_reported() {
        let state = Arc::new(StateManager::new());
        let coordinator = Coordinator::new(state.clone(), Duration::from_secs(1));

        let reporter = {
            let state = state.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                state.update_state(&success("a"));
                tokio::time::sleep(Duration::from_millis(10)).await;
                state.update_state(&success("b"));
            })
        };

        coordinator.wait_for_completion(&["a", "b"]).await.unwrap();
        reporter.await.unwrap();
    }

    #[tokio::test]
    async fn times_out_and_cancels() {
        let state = Arc::new(StateManager::new());
        let coordinator =
            Coordinator::new(state.clone(), Duration::from_millis(50)).cancel_on_timeout(true);

        let err = coordinator.wait_for_completion(&["never"]).await.unwrap_err();
        assert_eq!(err, NodeError::Timeout { millis: 50 });
        assert!(state.is_complete());
    }

    #[tokio::test]
    async fn reports_first_failure() {
        let state = Arc::new(StateManager::new());
        let mut failed = Signal::new("a", Carrier::empty());
        failed.mark_failed(&NodeError::Configuration("no model".into()));
        state.update_state(&failed);

        let err = Coordinator::new(state, Duration::from_secs(1))
            .wait_for_completion(&["a"])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            NodeError::ExecutionFailed("a: configuration error: no model".into())
        );
    }
}

use chrono::Utc;
use relaycore::{EventBus, ExecutionEvent, Signal, Status};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Per-node counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub completed: u64,
    /// Reports that carried an error.
    pub failures: u64,
    /// Latest observed status, `Unknown` when the node never reported.
    pub status: Status,
    pub last_error: Option<String>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            completed: 0,
            failures: 0,
            status: Status::Unknown,
            last_error: None,
        }
    }
}

/// Tracks completion per node and broadcasts workflow shutdown.
///
/// Shutdown is a single cancellation token: `complete` cancels it once and
/// every handle returned by `register` observes it. Calling `complete` again
/// is a no-op.
pub struct StateManager {
    states: Mutex<HashMap<String, State>>,
    wait_ids: Mutex<HashSet<String>>,
    shutdown: CancellationToken,
    completed: AtomicBool,
    revision: watch::Sender<u64>,
    events: Option<EventBus>,
}

impl StateManager {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            states: Mutex::new(HashMap::new()),
            wait_ids: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
            completed: AtomicBool::new(false),
            revision,
            events: None,
        }
    }

    /// Emits `WorkflowCompleted` on the bus when the workflow completes.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Shutdown handle for one node pump.
    pub fn register(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Records one report from `signal.node_id`.
    ///
    /// Completes the workflow when someone is waiting for that node.
    pub fn update_state(&self, signal: &Signal) {
        let waited = {
            let mut states = lock(&self.states);
            let state = states.entry(signal.node_id.clone()).or_default();
            state.completed += 1;
            if !signal.err.is_empty() {
                state.failures += 1;
                state.last_error = Some(signal.err.clone());
            }
            state.status = signal.status;
            lock(&self.wait_ids).contains(&signal.node_id)
        };

        debug!(node_id = %signal.node_id, status = %signal.status, "state updated");
        self.revision.send_modify(|rev| *rev += 1);

        if waited {
            self.complete();
        }
    }

    /// Broadcasts completion to every registered handle and waiter.
    pub fn complete(&self) {
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("workflow completed");
        self.shutdown.cancel();
        self.revision.send_modify(|rev| *rev += 1);
        if let Some(bus) = &self.events {
            bus.emit(ExecutionEvent::WorkflowCompleted {
                timestamp: Utc::now(),
            });
        }
    }

    pub fn is_complete(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Waits until the workflow completes.
    ///
    /// With `Some(id)` the first report from that node completes the
    /// workflow; a node that already reported completes it immediately.
    /// With `None` only an explicit `complete` (a failure, an interactive
    /// quit, a driver) ends the wait.
    pub async fn wait_for(&self, node_id: Option<&str>) {
        if let Some(id) = node_id {
            lock(&self.wait_ids).insert(id.to_string());
            let reported = lock(&self.states)
                .get(id)
                .map(|s| s.completed > 0)
                .unwrap_or(false);
            if reported {
                self.complete();
            }
        }
        self.shutdown.cancelled().await;
    }

    /// Snapshot for one node. Nodes that never reported get `Unknown`.
    pub fn get_state(&self, node_id: &str) -> State {
        lock(&self.states).get(node_id).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> HashMap<String, State> {
        lock(&self.states).clone()
    }

    /// Receiver bumped on every report and on completion.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycore::{Carrier, NodeError};
    use std::sync::Arc;
    use std::time::Duration;

    fn report(node: &str, status: Status) -> Signal {
        let mut sig = Signal::new(node, Carrier::empty());
        sig.status = status;
        sig
    }

    #[test]
    fn never_reported_node_is_unknown() {
        let sm = StateManager::new();
        assert_eq!(sm.get_state("ghost"), State::default());
        assert_eq!(sm.get_state("ghost").status, Status::Unknown);
    }

    #[test]
    fn counts_completions_and_failures() {
        let sm = StateManager::new();
        sm.update_state(&report("a", Status::Success));

        let mut failed = report("a", Status::InProcess);
        failed.mark_failed(&NodeError::ExecutionFailed("boom".into()));
        sm.update_state(&failed);

        let state = sm.get_state("a");
        assert_eq!(state.completed, 2);
        assert_eq!(state.failures, 1);
        assert_eq!(state.status, Status::Fail);
        assert_eq!(state.last_error.as_deref(), Some("execution failed: boom"));
    }

    #[test]
    fn complete_is_idempotent() {
        let sm = StateManager::new();
        let handle = sm.register();
        sm.complete();
        sm.complete();
        assert!(handle.is_cancelled());
        assert!(sm.is_complete());
    }

    #[tokio::test]
    async fn wait_for_node_returns_on_report() {
        let sm = Arc::new(StateManager::new());
        let waiter = {
            let sm = sm.clone();
            tokio::spawn(async move { sm.wait_for(Some("sink")).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        sm.update_state(&report("other", Status::Success));
        assert!(!sm.is_complete());
        sm.update_state(&report("sink", Status::Success));

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finished")
            .unwrap();
        assert!(sm.is_complete());
    }

    #[tokio::test]
    async fn wait_for_already_reported_node_returns_immediately() {
        let sm = StateManager::new();
        sm.update_state(&report("sink", Status::Success));
        tokio::time::timeout(Duration::from_millis(100), sm.wait_for(Some("sink")))
            .await
            .expect("returned without another report");
    }

    #[tokio::test]
    async fn wait_for_any_returns_on_complete() {
        let sm = Arc::new(StateManager::new());
        let waiter = {
            let sm = sm.clone();
            tokio::spawn(async move { sm.wait_for(None).await })
        };
        sm.complete();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finished")
            .unwrap();
    }

    #[tokio::test]
    async fn complete_emits_workflow_event_once() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let sm = StateManager::new().with_events(bus);
        sm.complete();
        sm.complete();

        assert!(matches!(
            rx.try_recv(),
            Ok(ExecutionEvent::WorkflowCompleted { .. })
        ));
        assert!(rx.try_recv().is_err());
    }
}

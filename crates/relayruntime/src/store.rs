use relaycore::{ContextManager, DataCarrier, HistoryManager, Payload, Signal};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// In-memory context store keyed by node id.
#[derive(Default)]
pub struct SimpleContextManager {
    entries: RwLock<HashMap<String, Payload>>,
}

impl SimpleContextManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContextManager for SimpleContextManager {
    fn set_context(&self, id: &str, data: Payload) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), data);
    }

    fn get_context(&self, id: &str) -> Option<Payload> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn remove_context(&self, id: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }
}

/// In-memory append-only signal log.
#[derive(Default)]
pub struct SimpleHistoryManager {
    log: RwLock<Vec<Signal>>,
}

impl SimpleHistoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.log.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryManager for SimpleHistoryManager {
    fn add_history(&self, signal: Signal) {
        self.log
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(signal.archived());
    }

    fn history(&self) -> Vec<Signal> {
        self.log.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn history_by_id(&self, node_id: &str) -> Vec<Signal> {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.node_id == node_id)
            .cloned()
            .collect()
    }

    /// Drops consecutive entries with the same node id and task text.
    fn compress(&self) {
        self.log
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .dedup_by(|later, earlier| {
                later.node_id == earlier.node_id && later.task.text() == earlier.task.text()
            });
    }
}

/// Signal addressed to `node_id` with fresh context and history stores.
pub fn new_signal(node_id: impl Into<String>, task: Payload) -> Signal {
    Signal::new(node_id, task)
        .with_context(Arc::new(SimpleContextManager::new()))
        .with_history(Arc::new(SimpleHistoryManager::new()))
}

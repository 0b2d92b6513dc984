use crate::carrier::{Carrier, DataCarrier, Payload};
use crate::store::{ContextManager, HistoryManager};
use crate::NodeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Well-known meta keys used by the control-flow nodes.
pub mod keys {
    /// Batch identifier shared by every child of one partition operation.
    pub const BATCH_ID: &str = "batch-id";
    /// Child node identifier a partition chunk was dispatched to.
    pub const TASK_ID: &str = "task-id";
    /// Position of a chunk in the partition output.
    pub const PART_INDEX: &str = "part-index";
    /// Prefix for per-loop iteration counters (`loop-iterations:<loop id>`).
    pub const LOOP_ITERATIONS: &str = "loop-iterations";

    /// Key holding an enclosing batch's `key` tag while the inner batch
    /// `batch_id` is in flight.
    pub fn saved(key: &str, batch_id: &str) -> String {
        format!("{key}@{batch_id}")
    }
}

/// Lifecycle marker of a signal within one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    #[default]
    Pending,
    InProcess,
    Success,
    Fail,
    /// Reported by the state manager for nodes that never reported.
    Unknown,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Success | Status::Fail)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProcess => "in-process",
            Status::Success => "success",
            Status::Fail => "fail",
            Status::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered key/value tag attached to a signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub key: String,
    pub value: String,
}

impl Meta {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The unit of work passed between nodes.
///
/// A signal is owned by exactly one node at a time; sending it over a
/// channel hands ownership to the receiver. The context and history stores
/// are shared by every signal derived from the same originating signal.
#[derive(Clone)]
pub struct Signal {
    pub node_id: String,
    pub from_node_id: Option<String>,
    pub task: Payload,
    pub result: Option<Payload>,
    pub status: Status,
    pub err: String,
    pub meta: Vec<Meta>,
    pub context: Option<Arc<dyn ContextManager>>,
    pub history: Option<Arc<dyn HistoryManager>>,
}

impl Signal {
    pub fn new(node_id: impl Into<String>, task: Payload) -> Self {
        Self {
            node_id: node_id.into(),
            from_node_id: None,
            task,
            result: None,
            status: Status::Pending,
            err: String::new(),
            meta: Vec::new(),
            context: None,
            history: None,
        }
    }

    pub fn with_context(mut self, context: Arc<dyn ContextManager>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryManager>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_meta(key, value);
        self
    }

    /// Child signal for another node: same tags and stores, fresh lifecycle.
    pub fn derive(&self, node_id: impl Into<String>, task: Payload) -> Signal {
        Signal {
            node_id: node_id.into(),
            from_node_id: Some(self.node_id.clone()),
            task,
            result: None,
            status: Status::Pending,
            err: String::new(),
            meta: self.meta.clone(),
            context: self.context.clone(),
            history: self.history.clone(),
        }
    }

    pub fn task_text(&self) -> String {
        self.task.text()
    }

    pub fn result_text(&self) -> Option<String> {
        self.result.as_ref().map(|r| r.text())
    }

    pub fn set_result(&mut self, result: Payload) {
        self.result = Some(result);
    }

    /// Passes the task through as this node's result.
    pub fn pass_through(&mut self) {
        self.result = Some(self.task.clone());
    }

    pub fn is_failed(&self) -> bool {
        self.status == Status::Fail || !self.err.is_empty()
    }

    /// `pending -> in-process`. Terminal statuses are left alone.
    pub fn mark_in_process(&mut self) {
        if !self.status.is_terminal() {
            self.status = Status::InProcess;
        }
    }

    pub fn mark_success(&mut self) {
        if self.status != Status::Fail {
            self.status = Status::Success;
        }
    }

    pub fn mark_failed(&mut self, err: &NodeError) {
        self.status = Status::Fail;
        self.err = err.to_string();
    }

    /// Hands the signal over to the next hop.
    ///
    /// The pre-handoff signal is archived into history, the result becomes
    /// the new task and the result is cleared.
    pub fn prepare_for_next(&mut self) {
        if let Some(history) = &self.history {
            history.add_history(self.archived());
        }
        self.task = self.result.take().unwrap_or_else(Carrier::empty);
        self.status = Status::Pending;
    }

    /// Copy without the shared stores, suitable for storing in history.
    pub fn archived(&self) -> Signal {
        Signal {
            context: None,
            history: None,
            ..self.clone()
        }
    }

    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|m| m.key == key)
            .map(|m| m.value.as_str())
    }

    /// Replaces the first entry with `key`, or appends a new one.
    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.meta.iter_mut().find(|m| m.key == key) {
            Some(existing) => existing.value = value,
            None => self.meta.push(Meta { key, value }),
        }
    }

    pub fn remove_meta(&mut self, key: &str) {
        self.meta.retain(|m| m.key != key);
    }

    pub fn filter_meta_key(&self, key: &str) -> Vec<&Meta> {
        self.meta.iter().filter(|m| m.key == key).collect()
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("node_id", &self.node_id)
            .field("from_node_id", &self.from_node_id)
            .field("task", &self.task)
            .field("result", &self.result)
            .field("status", &self.status)
            .field("err", &self.err)
            .field("meta", &self.meta)
            .field("context", &self.context.is_some())
            .field("history", &self.history.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_for_next_moves_result_into_task() {
        let mut sig = Signal::new("a", Carrier::from_text("question"));
        sig.mark_in_process();
        sig.set_result(Carrier::from_text("answer"));
        sig.mark_success();

        sig.prepare_for_next();

        assert_eq!(sig.task_text(), "answer");
        assert!(sig.result.is_none());
        assert_eq!(sig.status, Status::Pending);
    }

    #[test]
    fn prepare_for_next_without_result_leaves_empty_task() {
        let mut sig = Signal::new("a", Carrier::from_text("question"));
        sig.prepare_for_next();
        assert_eq!(sig.task_text(), "");
    }

    #[test]
    fn terminal_status_is_not_reset() {
        let mut sig = Signal::new("a", Carrier::empty());
        sig.mark_in_process();
        sig.mark_failed(&NodeError::MissingId);
        sig.mark_in_process();
        sig.mark_success();
        assert_eq!(sig.status, Status::Fail);
        assert_eq!(sig.err, "invalid signal: missing ID");
    }

    #[test]
    fn set_meta_replaces_existing_key() {
        let mut sig = Signal::new("a", Carrier::empty())
            .with_meta("k", "1")
            .with_meta("other", "x");
        sig.set_meta("k", "2");
        assert_eq!(sig.meta_value("k"), Some("2"));
        assert_eq!(sig.meta.len(), 2);
        assert_eq!(sig.meta[0].key, "k");

        sig.remove_meta("k");
        assert!(sig.meta_value("k").is_none());
    }

    #[test]
    fn derive_keeps_tags_and_resets_lifecycle() {
        let mut parent = Signal::new("p", Carrier::from_text("whole")).with_meta("batch-id", "b1");
        parent.mark_in_process();
        parent.err = "boom".into();

        let child = parent.derive("c", Carrier::from_text("part"));
        assert_eq!(child.node_id, "c");
        assert_eq!(child.from_node_id.as_deref(), Some("p"));
        assert_eq!(child.status, Status::Pending);
        assert!(child.err.is_empty());
        assert_eq!(child.meta_value("batch-id"), Some("b1"));
    }
}

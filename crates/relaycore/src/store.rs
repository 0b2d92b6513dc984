use crate::carrier::Payload;
use crate::signal::Signal;

/// Per-node contextual memory shared by every node of a workflow.
pub trait ContextManager: Send + Sync {
    fn set_context(&self, id: &str, data: Payload);

    fn get_context(&self, id: &str) -> Option<Payload>;

    fn remove_context(&self, id: &str);
}

/// Append-only log of signals as they were handed between nodes.
pub trait HistoryManager: Send + Sync {
    fn add_history(&self, signal: Signal);

    fn history(&self) -> Vec<Signal>;

    fn history_by_id(&self, node_id: &str) -> Vec<Signal>;

    /// Shrinks the log. Implementations decide what is safe to drop.
    fn compress(&self) {}
}

use crate::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted while signals move through a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    SignalReceived {
        node_id: String,
        node_type: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        node_id: String,
        status: Status,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        node_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    SignalSent {
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },
    NodeEvent {
        node_id: String,
        event: NodeEvent,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        timestamp: DateTime<Utc>,
    },
}

/// Free-form events a node reports about itself
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum NodeEvent {
    Info { message: String },
    Warning { message: String },
}

/// Event emitter bound to one node
#[derive(Clone)]
pub struct EventEmitter {
    node_id: String,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(node_id: impl Into<String>, sender: broadcast::Sender<ExecutionEvent>) -> Self {
        Self {
            node_id: node_id.into(),
            sender,
        }
    }

    fn send(&self, event: ExecutionEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn emit(&self, event: NodeEvent) {
        self.send(ExecutionEvent::NodeEvent {
            node_id: self.node_id.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(NodeEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(NodeEvent::Warning {
            message: message.into(),
        });
    }

    pub fn received(&self, node_type: &str) {
        self.send(ExecutionEvent::SignalReceived {
            node_id: self.node_id.clone(),
            node_type: node_type.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn completed(&self, status: Status) {
        self.send(ExecutionEvent::NodeCompleted {
            node_id: self.node_id.clone(),
            status,
            timestamp: Utc::now(),
        });
    }

    pub fn failed(&self, error: impl Into<String>) {
        self.send(ExecutionEvent::NodeFailed {
            node_id: self.node_id.clone(),
            error: error.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn sent(&self, to: impl Into<String>) {
        self.send(ExecutionEvent::SignalSent {
            from: self.node_id.clone(),
            to: to.into(),
            timestamp: Utc::now(),
        });
    }
}

/// Process-wide event bus
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, node_id: impl Into<String>) -> EventEmitter {
        EventEmitter::new(node_id, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

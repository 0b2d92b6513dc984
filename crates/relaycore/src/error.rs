use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while a node processes a single signal.
///
/// Every variant that reaches a node's top-level processing function ends in
/// `NodeBase::fail`, which is terminal for the signal's path.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("invalid signal: missing ID")]
    MissingId,

    #[error("rate limit exceeded for node {0}")]
    RateLimited(String),

    #[error("rate limit exceeded, could not recover")]
    RateLimitExhausted,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("hook failed: {0}")]
    Hook(String),

    #[error("guidance failed: {0}")]
    Guidance(String),

    #[error("context timeout or cancellation while sending signal to node {node}: {reason}")]
    SendTimeout { node: String, reason: String },

    #[error("node {0} is no longer receiving signals")]
    Disconnected(String),

    #[error("timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("workflow cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::Io(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Cyclic dependency detected")]
    CyclicDependency,

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Unknown node kind: {0}")]
    UnknownNodeKind(String),

    #[error("Invalid config for node '{node}': {reason}")]
    InvalidConfig { node: String, reason: String },
}

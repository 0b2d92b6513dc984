use crate::signal::Signal;
use crate::NodeError;

/// Signal-to-signal transform run before a worker's main action,
/// typically to turn the task into a model prompt.
pub trait Guidance: Send + Sync {
    fn generate(&self, signal: Signal, context: &str) -> Result<Signal, NodeError>;
}

/// What a node should do with an error raised by its collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    Retry,
    Ignore,
    Fail,
    NotAnError,
}

/// Recovery policy consulted by nodes that support custom error handling.
pub trait ErrorGuidance: Send + Sync {
    fn retries(&self) -> u32;

    fn action(&self, err: &NodeError) -> ErrorAction;
}

/// Retries collaborator failures a fixed number of times, fails on anything else.
#[derive(Debug, Clone, Copy)]
pub struct RetryGuidance {
    pub retries: u32,
}

impl RetryGuidance {
    pub fn new(retries: u32) -> Self {
        Self { retries }
    }
}

impl ErrorGuidance for RetryGuidance {
    fn retries(&self) -> u32 {
        self.retries
    }

    fn action(&self, err: &NodeError) -> ErrorAction {
        match err {
            NodeError::ExecutionFailed(_) | NodeError::Timeout { .. } | NodeError::Io(_) => {
                ErrorAction::Retry
            }
            _ => ErrorAction::Fail,
        }
    }
}

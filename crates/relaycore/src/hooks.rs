use crate::signal::Signal;
use crate::NodeError;
use std::sync::Arc;

/// Extension points run inside a node's pre- and post-processing.
pub trait Hooks: Send + Sync {
    fn before_action(&self, signal: Signal) -> Result<Signal, NodeError>;

    fn after_action(&self, signal: Signal) -> Result<Signal, NodeError>;
}

pub type HookFn = Arc<dyn Fn(Signal) -> Result<Signal, NodeError> + Send + Sync>;

/// Hooks built from optional closures. A missing closure passes the signal through.
#[derive(Clone, Default)]
pub struct SimpleHooks {
    before: Option<HookFn>,
    after: Option<HookFn>,
}

impl SimpleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before<F>(mut self, f: F) -> Self
    where
        F: Fn(Signal) -> Result<Signal, NodeError> + Send + Sync + 'static,
    {
        self.before = Some(Arc::new(f));
        self
    }

    pub fn after<F>(mut self, f: F) -> Self
    where
        F: Fn(Signal) -> Result<Signal, NodeError> + Send + Sync + 'static,
    {
        self.after = Some(Arc::new(f));
        self
    }
}

impl Hooks for SimpleHooks {
    fn before_action(&self, signal: Signal) -> Result<Signal, NodeError> {
        match &self.before {
            Some(f) => f(signal),
            None => Ok(signal),
        }
    }

    fn after_action(&self, signal: Signal) -> Result<Signal, NodeError> {
        match &self.after {
            Some(f) => f(signal),
            None => Ok(signal),
        }
    }
}

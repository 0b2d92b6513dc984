//! Core abstractions for the relay engine
//!
//! This crate provides the signal data model and the traits every other
//! component depends on: nodes, payloads, hooks, guidance, rate limiting,
//! shared stores and the language-model boundary.

mod carrier;
mod error;
pub mod events;
mod guidance;
mod hooks;
pub mod llm;
mod node;
mod resource;
mod signal;
mod store;
mod workflow;

pub use carrier::{Carrier, DataCarrier, Payload};
pub use error::{FlowError, NodeError, WorkflowError};
pub use events::*;
pub use guidance::{ErrorAction, ErrorGuidance, Guidance, RetryGuidance};
pub use hooks::{HookFn, Hooks, SimpleHooks};
pub use llm::{Llm, Message, Model, Role};
pub use node::{connect_chain, Node, Outlet};
pub use resource::RateLimiter;
pub use signal::{keys, Meta, Signal, Status};
pub use store::{ContextManager, HistoryManager};
pub use workflow::{Connection, NodeSpec, Workflow, WorkflowSettings};

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, FlowError>;

//! Signal execution runtime
//!
//! This crate provides the shared machinery every node runs on: completion
//! tracking, rate limiting, the context and history stores, the node base
//! behavior with its task pump, and the registry that builds workflows from
//! their JSON definitions.

mod base;
mod builder;
mod config;
mod coordinator;
mod registry;
mod resource;
mod runtime;
mod state;
mod store;

pub use base::{spawn_pump, NodeBase, NodeOptions};
pub use builder::{ExecutionHandle, ExecutionResult, WorkflowBuilder};
pub use config::RuntimeConfig;
pub use coordinator::Coordinator;
pub use registry::{BuildContext, ConfigField, NodeFactory, NodeMetadata, NodeRegistry};
pub use resource::SimpleResourceManager;
pub use runtime::Runtime;
pub use state::{State, StateManager};
pub use store::{new_signal, SimpleContextManager, SimpleHistoryManager};

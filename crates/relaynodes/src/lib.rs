//! Built-in nodes
//!
//! Workers, control flow (partition/integrate, branch, loop) and the IO
//! boundary nodes, plus the factories that build them from a workflow file.

mod branch;
mod condition;
mod integrator;
mod interactive;
mod llm;
mod loop_node;
mod partition;
mod partitioner;
mod reader;
mod transform;
mod writer;

pub use branch::{Branch, BranchNode, BranchNodeFactory};
pub use condition::{ConditionFn, ConditionSpec};
pub use integrator::{Group, IntegratorNode};
pub use interactive::{InteractiveNode, InteractiveNodeFactory, LineSource, DEFAULT_PROMPT, QUIT_COMMAND};
pub use llm::LlmNode;
pub use loop_node::{LoopBuilder, LoopNode, LoopNodeFactory};
pub use partition::{
    chunk_chars, split_halves, split_paragraphs, split_sections, split_sentences,
    IntegrateFn, IntegrationStrategy, PartitionFn, PartitionStrategy, DEFAULT_MAX_CHARS,
};
pub use partitioner::{ChildFactory, Collector, PartitionNodeFactory, PartitionerConfig, PartitionerNode};
pub use reader::{ByteSource, ReaderNode, ReaderNodeFactory};
pub use transform::{TransformFn, TransformNode, TransformNodeFactory, TransformOp};
pub use writer::{ByteSink, WriterNode, WriterNodeFactory};

use relayruntime::NodeRegistry;
use std::sync::Arc;

/// Register every built-in factory with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(TransformNodeFactory));
    registry.register(Arc::new(PartitionNodeFactory));
    registry.register(Arc::new(BranchNodeFactory));
    registry.register(Arc::new(LoopNodeFactory));
    registry.register(Arc::new(ReaderNodeFactory));
    registry.register(Arc::new(WriterNodeFactory));
    registry.register(Arc::new(InteractiveNodeFactory));
}

use crate::{NodeOptions, Runtime};
use relaycore::{Node, NodeSpec, WorkflowError};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating node instances from a workflow definition
pub trait NodeFactory: Send + Sync {
    /// Create a started node for `spec`. Nodes named by `references` are
    /// already built and reachable through `ctx`.
    fn create(&self, spec: &NodeSpec, ctx: &BuildContext<'_>) -> Result<Arc<dyn Node>, WorkflowError>;

    /// Kind identifier used in workflow definitions
    fn kind(&self) -> &str;

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }

    /// Ids of other nodes this node routes to outside its connections
    /// (branch targets, a loop's start node).
    fn references(&self, _spec: &NodeSpec) -> Vec<String> {
        Vec::new()
    }

    /// Checks the config without building anything.
    fn validate(&self, _spec: &NodeSpec) -> Result<(), WorkflowError> {
        Ok(())
    }
}

/// Metadata about a node kind
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub config: Vec<ConfigField>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            config: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigField {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl ConfigField {
    pub fn required(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, description)
        }
    }
}

/// What a factory sees while a workflow is being built.
pub struct BuildContext<'a> {
    runtime: &'a Runtime,
    nodes: &'a HashMap<String, Arc<dyn Node>>,
}

impl<'a> BuildContext<'a> {
    pub fn new(runtime: &'a Runtime, nodes: &'a HashMap<String, Arc<dyn Node>>) -> Self {
        Self { runtime, nodes }
    }

    pub fn runtime(&self) -> &Runtime {
        self.runtime
    }

    /// A node built earlier in the same workflow.
    pub fn node(&self, id: &str) -> Result<Arc<dyn Node>, WorkflowError> {
        self.nodes
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))
    }

    /// Options carrying the spec's id.
    pub fn options(&self, spec: &NodeSpec) -> NodeOptions {
        NodeOptions::new().with_id(spec.id.clone())
    }
}

/// Registry of available node kinds
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a node factory
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let kind = factory.kind().to_string();
        tracing::debug!("Registering node kind: {}", kind);
        self.factories.insert(kind, factory);
    }

    pub fn get(&self, kind: &str) -> Result<&Arc<dyn NodeFactory>, WorkflowError> {
        self.factories
            .get(kind)
            .ok_or_else(|| WorkflowError::UnknownNodeKind(kind.to_string()))
    }

    /// Create a node instance from its spec
    pub fn create_node(
        &self,
        spec: &NodeSpec,
        ctx: &BuildContext<'_>,
    ) -> Result<Arc<dyn Node>, WorkflowError> {
        self.get(&spec.kind)?.create(spec, ctx)
    }

    /// All registered kinds, sorted
    pub fn list_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn get_metadata(&self, kind: &str) -> Option<NodeMetadata> {
        self.factories.get(kind).map(|f| f.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

use async_trait::async_trait;
use relaycore::{Carrier, Node, NodeError, NodeSpec, Outlet, Signal, WorkflowError};
use relayruntime::{
    spawn_pump, BuildContext, ConfigField, NodeBase, NodeFactory, NodeMetadata, NodeOptions,
    Runtime,
};
use std::sync::Arc;

/// Text function a transform node applies to its task.
pub type TransformFn = Arc<dyn Fn(&str) -> Result<String, NodeError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformOp {
    Upper,
    Lower,
    Trim,
    Reverse,
    Echo,
}

impl TransformOp {
    pub const NAMES: &'static [&'static str] = &["upper", "lower", "trim", "reverse", "echo"];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "upper" => Some(Self::Upper),
            "lower" => Some(Self::Lower),
            "trim" => Some(Self::Trim),
            "reverse" => Some(Self::Reverse),
            "echo" => Some(Self::Echo),
            _ => None,
        }
    }

    pub fn apply(self, text: &str) -> String {
        match self {
            Self::Upper => text.to_uppercase(),
            Self::Lower => text.to_lowercase(),
            Self::Trim => text.trim().to_string(),
            Self::Reverse => text.chars().rev().collect(),
            Self::Echo => text.to_string(),
        }
    }

    pub(crate) fn from_spec(spec: &NodeSpec) -> Result<Self, WorkflowError> {
        let name = spec.config_str("op").unwrap_or("echo");
        Self::parse(name).ok_or_else(|| WorkflowError::InvalidConfig {
            node: spec.id.clone(),
            reason: format!("unknown op '{}', expected one of {:?}", name, Self::NAMES),
        })
    }
}

/// Worker whose collaborator is a plain text function.
pub struct TransformNode {
    base: NodeBase,
    transform: TransformFn,
}

impl TransformNode {
    pub fn new(op: TransformOp, options: NodeOptions, runtime: &Runtime) -> Arc<Self> {
        Self::from_fn(move |text: &str| Ok(op.apply(text)), options, runtime)
    }

    pub fn from_fn<F>(f: F, options: NodeOptions, runtime: &Runtime) -> Arc<Self>
    where
        F: Fn(&str) -> Result<String, NodeError> + Send + Sync + 'static,
    {
        let (base, rx) = NodeBase::new("worker.transform", options, runtime);
        let shutdown = base.shutdown();
        let node = Arc::new(Self {
            base,
            transform: Arc::new(f),
        });
        spawn_pump(node.clone(), rx, shutdown);
        node
    }

    async fn handle(&self, sig: &mut Signal) -> Result<(), NodeError> {
        self.base.pre_process(sig).await?;

        let transform = &self.transform;
        let text = sig.task_text();
        let text = text.as_str();
        let result = self
            .base
            .recover(|| async move { transform(text).map(Carrier::from_text) })
            .await?;

        match result {
            Some(payload) => sig.set_result(payload),
            None => sig.pass_through(),
        }
        sig.mark_success();

        self.base.post_process(sig)?;
        self.base.send_to_connected(sig).await
    }
}

#[async_trait]
impl Node for TransformNode {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn node_type(&self) -> &str {
        self.base.node_type()
    }

    fn outlet(&self) -> Outlet {
        self.base.outlet()
    }

    fn connect_outlet(&self, outlet: Outlet) {
        self.base.connect_outlet(outlet)
    }

    fn connections(&self) -> Vec<Outlet> {
        self.base.connections()
    }

    async fn process_signal(&self, mut sig: Signal) {
        let outcome = self.handle(&mut sig).await;
        self.base.settle(sig, outcome);
    }
}

pub struct TransformNodeFactory;

impl NodeFactory for TransformNodeFactory {
    fn create(&self, spec: &NodeSpec, ctx: &BuildContext<'_>) -> Result<Arc<dyn Node>, WorkflowError> {
        let op = TransformOp::from_spec(spec)?;
        Ok(TransformNode::new(op, ctx.options(spec), ctx.runtime()))
    }

    fn kind(&self) -> &str {
        "transform"
    }

    fn validate(&self, spec: &NodeSpec) -> Result<(), WorkflowError> {
        TransformOp::from_spec(spec).map(|_| ())
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Apply a text function to the task".to_string(),
            category: "worker".to_string(),
            config: vec![ConfigField::optional(
                "op",
                "upper, lower, trim, reverse or echo (default)",
            )],
        }
    }
}

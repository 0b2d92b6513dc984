use crate::condition::{ConditionFn, ConditionSpec};
use async_trait::async_trait;
use relaycore::{Node, NodeError, NodeSpec, Outlet, Signal, WorkflowError};
use relayruntime::{
    spawn_pump, BuildContext, ConfigField, NodeBase, NodeFactory, NodeMetadata, NodeOptions,
    Runtime,
};
use std::sync::Arc;
use tracing::debug;

/// One routing rule of a branch node.
#[derive(Clone)]
pub struct Branch {
    target: Outlet,
    condition: ConditionFn,
}

impl Branch {
    pub fn new<F>(target: &dyn Node, condition: F) -> Self
    where
        F: Fn(&Signal) -> bool + Send + Sync + 'static,
    {
        Self::with_condition(target, Arc::new(condition))
    }

    pub fn with_condition(target: &dyn Node, condition: ConditionFn) -> Self {
        Self {
            target: target.outlet(),
            condition,
        }
    }
}

/// Routes each signal to the target of the first matching rule, or to the
/// connected nodes when nothing matches.
pub struct BranchNode {
    base: NodeBase,
    branches: Vec<Branch>,
}

impl BranchNode {
    pub fn new(branches: Vec<Branch>, options: NodeOptions, runtime: &Runtime) -> Arc<Self> {
        let (base, rx) = NodeBase::new("control.branch", options, runtime);
        let shutdown = base.shutdown();
        let node = Arc::new(Self { base, branches });
        spawn_pump(node.clone(), rx, shutdown);
        node
    }

    async fn handle(&self, sig: &mut Signal) -> Result<(), NodeError> {
        self.base.pre_process(sig).await?;
        sig.pass_through();
        sig.mark_success();
        self.base.post_process(sig)?;

        let current: &Signal = sig;
        match self.branches.iter().find(|b| (b.condition)(current)) {
            Some(branch) => {
                debug!(node_id = %self.base.id(), target = %branch.target.id(), "branch taken");
                self.base
                    .send_to(std::slice::from_ref(&branch.target), current)
                    .await
            }
            None => self.base.send_to_connected(current).await,
        }
    }
}

#[async_trait]
impl Node for BranchNode {
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

/// Reads `branches: [{"target": id, "when": condition}, ...]`.
pub struct BranchNodeFactory;

impl BranchNodeFactory {
    fn rules(spec: &NodeSpec) -> Result<Vec<(String, ConditionSpec)>, WorkflowError> {
        let invalid = |reason: &str| WorkflowError::InvalidConfig {
            node: spec.id.clone(),
            reason: reason.to_string(),
        };
        let Some(list) = spec.config.get("branches") else {
            return Ok(Vec::new());
        };
        let list = list
            .as_array()
            .ok_or_else(|| invalid("'branches' must be an array"))?;

        list.iter()
            .map(|rule| -> Result<(String, ConditionSpec), WorkflowError> {
                let target = rule
                    .get("target")
                    .and_then(|t| t.as_str())
                    .ok_or_else(|| invalid("every branch needs a 'target'"))?;
                let when = rule
                    .get("when")
                    .ok_or_else(|| invalid("every branch needs a 'when' condition"))?;
                Ok((target.to_string(), ConditionSpec::parse(&spec.id, when)?))
            })
            .collect()
    }
}

impl NodeFactory for BranchNodeFactory {
    fn create(&self, spec: &NodeSpec, ctx: &BuildContext<'_>) -> Result<Arc<dyn Node>, WorkflowError> {
        let branches = Self::rules(spec)?
            .into_iter()
            .map(|(target, condition)| -> Result<Branch, WorkflowError> {
                let target = ctx.node(&target)?;
                Ok(Branch::with_condition(target.as_ref(), condition.into_fn()))
            })
            .collect::<Result<Vec<_>, WorkflowError>>()?;
        Ok(BranchNode::new(branches, ctx.options(spec), ctx.runtime()))
    }

    fn kind(&self) -> &str {
        "branch"
    }

    fn references(&self, spec: &NodeSpec) -> Vec<String> {
        Self::rules(spec)
            .map(|rules| rules.into_iter().map(|(target, _)| target).collect())
            .unwrap_or_default()
    }

    fn validate(&self, spec: &NodeSpec) -> Result<(), WorkflowError> {
        Self::rules(spec).map(|_| ())
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Route to the first branch whose condition matches".to_string(),
            category: "control".to_string(),
            config: vec![ConfigField::required(
                "branches",
                "[{\"target\": id, \"when\": {\"type\": \"contains\", \"value\": ...}}]",
            )],
        }
    }
}

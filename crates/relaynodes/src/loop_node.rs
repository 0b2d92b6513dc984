use crate::condition::{ConditionFn, ConditionSpec};
use async_trait::async_trait;
use relaycore::{keys, Node, NodeError, NodeSpec, Outlet, Signal, WorkflowError};
use relayruntime::{
    spawn_pump, BuildContext, ConfigField, NodeBase, NodeFactory, NodeMetadata, NodeOptions,
    Runtime,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Sends signals back to a start node until a condition holds.
///
/// Every signal is also forwarded to the connected nodes, whether or not it
/// loops. Without a condition every signal loops, so set `max_iterations`
/// unless something else ends the workflow.
pub struct LoopNode {
    base: NodeBase,
    start: Outlet,
    condition: Option<ConditionFn>,
    max_iterations: Option<u32>,
}

impl LoopNode {
    pub fn new(start: &dyn Node, options: NodeOptions, runtime: &Runtime) -> LoopBuilder {
        LoopBuilder {
            start: start.outlet(),
            options,
            runtime: runtime.clone(),
            condition: None,
            max_iterations: None,
        }
    }

    fn counter_key(&self) -> String {
        format!("{}:{}", keys::LOOP_ITERATIONS, self.base.id())
    }

    async fn handle(&self, sig: &mut Signal) -> Result<(), NodeError> {
        self.base.pre_process(sig).await?;
        sig.pass_through();
        sig.mark_success();
        self.base.post_process(sig)?;

        let done = match &self.condition {
            Some(condition) => condition(&*sig),
            None => false,
        };

        if !done {
            let key = self.counter_key();
            let iteration = sig
                .meta_value(&key)
                .and_then(|n| n.parse::<u32>().ok())
                .unwrap_or(0)
                + 1;

            match self.max_iterations {
                Some(max) if iteration > max => {
                    warn!(node_id = %self.base.id(), max, "iteration limit reached, not looping");
                    self.base
                        .events()
                        .warn(format!("iteration limit {max} reached, not looping"));
                }
                _ => {
                    sig.set_meta(key, iteration.to_string());
                    debug!(node_id = %self.base.id(), iteration, "looping back");
                    self.base
                        .send_to(std::slice::from_ref(&self.start), sig)
                        .await?;
                }
            }
        }

        self.base.send_to_connected(sig).await
    }
}

/// Finishes configuring a [`LoopNode`] before it starts.
pub struct LoopBuilder {
    start: Outlet,
    options: NodeOptions,
    runtime: Runtime,
    condition: Option<ConditionFn>,
    max_iterations: Option<u32>,
}

impl LoopBuilder {
    /// Stop looping once `condition` holds.
    pub fn until<F>(self, condition: F) -> Self
    where
        F: Fn(&Signal) -> bool + Send + Sync + 'static,
    {
        self.until_fn(Arc::new(condition))
    }

    pub fn until_fn(mut self, condition: ConditionFn) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn start(self) -> Arc<LoopNode> {
        let (base, rx) = NodeBase::new("control.loop", self.options, &self.runtime);
        let shutdown = base.shutdown();
        let node = Arc::new(LoopNode {
            base,
            start: self.start,
            condition: self.condition,
            max_iterations: self.max_iterations,
        });
        spawn_pump(node.clone(), rx, shutdown);
        node
    }
}

#[async_trait]
impl Node for LoopNode {
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

/// Reads `start`, an optional `until` condition and `max_iterations`.
pub struct LoopNodeFactory;

impl LoopNodeFactory {
    fn start_id(spec: &NodeSpec) -> Result<&str, WorkflowError> {
        spec.config_str("start")
            .ok_or_else(|| WorkflowError::InvalidConfig {
                node: spec.id.clone(),
                reason: "missing 'start' node".to_string(),
            })
    }

    fn condition(spec: &NodeSpec) -> Result<Option<ConditionSpec>, WorkflowError> {
        spec.config
            .get("until")
            .map(|value| ConditionSpec::parse(&spec.id, value))
            .transpose()
    }
}

impl NodeFactory for LoopNodeFactory {
    fn create(&self, spec: &NodeSpec, ctx: &BuildContext<'_>) -> Result<Arc<dyn Node>, WorkflowError> {
        let start = ctx.node(Self::start_id(spec)?)?;
        let mut builder = LoopNode::new(start.as_ref(), ctx.options(spec), ctx.runtime());
        if let Some(condition) = Self::condition(spec)? {
            builder = builder.until_fn(condition.into_fn());
        }
        if let Some(max) = spec.config_u64("max_iterations") {
            builder = builder.max_iterations(max.min(u32::MAX as u64) as u32);
        }
        Ok(builder.start())
    }

    fn kind(&self) -> &str {
        "loop"
    }

    fn references(&self, spec: &NodeSpec) -> Vec<String> {
        Self::start_id(spec)
            .map(|id| vec![id.to_string()])
            .unwrap_or_default()
    }

    fn validate(&self, spec: &NodeSpec) -> Result<(), WorkflowError> {
        Self::start_id(spec)?;
        Self::condition(spec)?;
        Ok(())
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Send signals back to a start node until a condition holds".to_string(),
            category: "control".to_string(),
            config: vec![
                ConfigField::required("start", "node the signal loops back to"),
                ConfigField::optional("until", "condition that ends the loop"),
                ConfigField::optional("max_iterations", "loop-backs allowed per signal"),
            ],
        }
    }
}

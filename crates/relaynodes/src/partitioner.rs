use crate::integrator::{Group, IntegratorNode};
use crate::partition::{IntegrateFn, IntegrationStrategy, PartitionFn, PartitionStrategy};
use crate::transform::{TransformNode, TransformOp};
use async_trait::async_trait;
use relaycore::{keys, Carrier, Node, NodeError, NodeSpec, Outlet, Signal, WorkflowError};
use relayruntime::{
    spawn_pump, BuildContext, ConfigField, NodeBase, NodeFactory, NodeMetadata, NodeOptions,
    Runtime,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Creates `n` started child nodes, one per part.
///
/// The options carry the batch's shutdown handle. Children built from them
/// stop once their batch has been merged.
pub type ChildFactory =
    Arc<dyn Fn(usize, &NodeOptions) -> Result<Vec<Arc<dyn Node>>, NodeError> + Send + Sync>;

const TAGS: [&str; 3] = [keys::BATCH_ID, keys::TASK_ID, keys::PART_INDEX];

/// Where children deliver their results.
#[derive(Clone)]
pub enum Collector {
    /// A cooperating integrator node. Dispatch does not wait for results.
    Integrator(Arc<IntegratorNode>),
    /// Collect every result here and merge with the function before forwarding.
    Inline(IntegrateFn),
}

#[derive(Clone, Default)]
pub struct PartitionerConfig {
    partition: Option<PartitionFn>,
    children: Option<ChildFactory>,
    collector: Option<Collector>,
}

impl PartitionerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn partition(mut self, partition: PartitionFn) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn children(mut self, factory: ChildFactory) -> Self {
        self.children = Some(factory);
        self
    }

    pub fn integrator(mut self, node: Arc<IntegratorNode>) -> Self {
        self.collector = Some(Collector::Integrator(node));
        self
    }

    pub fn merge(mut self, integrate: IntegrateFn) -> Self {
        self.collector = Some(Collector::Inline(integrate));
        self
    }
}

/// Fan-out node: splits its task, hands each part to a fresh child node and
/// tags the parts so they can be correlated again.
pub struct PartitionerNode {
    base: NodeBase,
    config: PartitionerConfig,
}

impl PartitionerNode {
    pub fn new(config: PartitionerConfig, options: NodeOptions, runtime: &Runtime) -> Arc<Self> {
        let (base, rx) = NodeBase::new("control.partitioner", options, runtime);
        let shutdown = base.shutdown();
        let node = Arc::new(Self { base, config });
        spawn_pump(node.clone(), rx, shutdown);
        node
    }

    async fn handle(&self, sig: &mut Signal) -> Result<(), NodeError> {
        let (Some(partition), Some(children), Some(collector)) = (
            &self.config.partition,
            &self.config.children,
            &self.config.collector,
        ) else {
            return Err(NodeError::Configuration(
                "partition function, child factory and collector are required".to_string(),
            ));
        };

        self.base.pre_process(sig).await?;

        let parts = partition(sig.task_text().as_str())?;
        let batch = self.base.shutdown().child_token();
        let guard = batch.clone().drop_guard();
        let nodes = children(parts.len(), &NodeOptions::new().with_shutdown(batch.clone()))?;
        if nodes.len() != parts.len() {
            return Err(NodeError::Configuration(format!(
                "child factory returned {} nodes for {} parts",
                nodes.len(),
                parts.len()
            )));
        }
        let group = Group::new(
            self.base.id(),
            nodes.iter().map(|n| n.id().to_string()).collect(),
        );
        debug!(node_id = %self.base.id(), batch_id = %group.batch_id, parts = parts.len(), "partitioned");

        match collector {
            Collector::Integrator(integrator) => {
                if parts.is_empty() {
                    warn!(node_id = %self.base.id(), "nothing to partition");
                } else {
                    for child in &nodes {
                        child.connect(integrator.as_ref());
                    }
                    integrator.add_batch(group.clone(), batch);
                    self.dispatch(sig, &parts, &nodes, &group).await?;
                    // The integrator stops the children after merging.
                    drop(guard.disarm());
                }
                sig.pass_through();
            }
            Collector::Inline(integrate) => {
                let (tx, rx) = mpsc::channel(parts.len().max(1));
                let outlet = Outlet::new(format!("{}/collector", self.base.id()), tx);
                for child in &nodes {
                    child.connect_outlet(outlet.clone());
                }
                drop(outlet);

                self.dispatch(sig, &parts, &nodes, &group).await?;
                let results = self.collect(rx, parts.len(), sig).await?;
                sig.set_result(Carrier::from_text(integrate(results.as_slice())?));
            }
        }
        sig.mark_success();

        self.base.post_process(sig)?;
        self.base.send_to_connected(sig).await
    }

    async fn dispatch(
        &self,
        sig: &Signal,
        parts: &[String],
        nodes: &[Arc<dyn Node>],
        group: &Group,
    ) -> Result<(), NodeError> {
        for (index, (part, child)) in parts.iter().zip(nodes).enumerate() {
            let mut child_sig = sig.derive(child.id(), Carrier::from_text(part.clone()));
            child_sig.from_node_id = Some(self.base.id().to_string());
            for key in TAGS {
                if let Some(outer) = sig.meta_value(key) {
                    child_sig.set_meta(keys::saved(key, &group.batch_id), outer);
                }
            }
            child_sig.set_meta(keys::BATCH_ID, group.batch_id.clone());
            child_sig.set_meta(keys::TASK_ID, child.id());
            child_sig.set_meta(keys::PART_INDEX, index.to_string());
            self.base.deliver(&child.outlet(), child_sig).await?;
        }
        Ok(())
    }

    /// Waits for `expected` results and returns their texts in part order.
    async fn collect(
        &self,
        mut rx: mpsc::Receiver<Signal>,
        expected: usize,
        sig: &Signal,
    ) -> Result<Vec<String>, NodeError> {
        let shutdown = self.base.shutdown();
        let mut received = Vec::with_capacity(expected);

        while received.len() < expected {
            let part = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(NodeError::Cancelled),
                part = rx.recv() => part,
            };
            match part {
                Some(part) => received.push(part),
                None => return Err(NodeError::Disconnected(format!("{}/collector", self.base.id()))),
            }
        }

        received.sort_by_key(|part: &Signal| {
            part.meta_value(keys::PART_INDEX)
                .and_then(|idx| idx.parse::<usize>().ok())
                .unwrap_or(usize::MAX)
        });
        if let Some(history) = &sig.history {
            for part in &received {
                history.add_history(part.archived());
            }
        }
        Ok(received.iter().map(|part| part.task_text()).collect())
    }
}

#[async_trait]
impl Node for PartitionerNode {
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

/// Builds an inline partitioner whose children are transform workers.
pub struct PartitionNodeFactory;

impl NodeFactory for PartitionNodeFactory {
    fn create(&self, spec: &NodeSpec, ctx: &BuildContext<'_>) -> Result<Arc<dyn Node>, WorkflowError> {
        let strategy = PartitionStrategy::from_spec(spec)?;
        let merge = IntegrationStrategy::from_spec(spec)?;
        let op = TransformOp::from_spec(spec)?;

        let runtime = ctx.runtime().clone();
        let children: ChildFactory = Arc::new(
            move |n: usize, options: &NodeOptions| -> Result<Vec<Arc<dyn Node>>, NodeError> {
                Ok((0..n)
                    .map(|_| TransformNode::new(op, options.clone(), &runtime) as Arc<dyn Node>)
                    .collect())
            },
        );

        let config = PartitionerConfig::new()
            .partition(strategy.into_fn())
            .children(children)
            .merge(merge.into_fn());
        Ok(PartitionerNode::new(config, ctx.options(spec), ctx.runtime()))
    }

    fn kind(&self) -> &str {
        "partition"
    }

    fn validate(&self, spec: &NodeSpec) -> Result<(), WorkflowError> {
        PartitionStrategy::from_spec(spec)?;
        IntegrationStrategy::from_spec(spec)?;
        TransformOp::from_spec(spec)?;
        Ok(())
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Split the task, transform every part concurrently, merge the results"
                .to_string(),
            category: "control".to_string(),
            config: vec![
                ConfigField::optional(
                    "strategy",
                    "paragraph (default), sentence, section, halves or fixed",
                ),
                ConfigField::optional("max_chars", "paragraph chunk limit (default 1000)"),
                ConfigField::optional("group", "sentences per part (default 3)"),
                ConfigField::optional("size", "characters per part for fixed"),
                ConfigField::optional("op", "transform applied to every part (default echo)"),
                ConfigField::optional("merge", "lines (default) or concat"),
            ],
        }
    }
}

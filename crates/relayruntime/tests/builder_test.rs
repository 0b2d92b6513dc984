use async_trait::async_trait;
use relaycore::{
    Carrier, FlowError, Node, NodeError, NodeSpec, Outlet, Signal, Workflow, WorkflowError,
};
use relayruntime::{
    spawn_pump, BuildContext, NodeBase, NodeFactory, NodeOptions, NodeRegistry, Runtime,
    WorkflowBuilder,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Appends its own id to the task.
struct TagNode {
    base: NodeBase,
}

impl TagNode {
    fn start(options: NodeOptions, runtime: &Runtime) -> Arc<Self> {
        let (base, rx) = NodeBase::new("test.tag", options, runtime);
        let shutdown = base.shutdown();
        let node = Arc::new(Self { base });
        spawn_pump(node.clone(), rx, shutdown);
        node
    }

    async fn handle(&self, sig: &mut Signal) -> Result<(), NodeError> {
        self.base.pre_process(sig).await?;
        let tagged = format!("{}>{}", sig.task_text(), self.base.id());
        sig.set_result(Carrier::from_text(tagged));
        sig.mark_success();
        self.base.post_process(sig)?;
        self.base.send_to_connected(sig).await
    }
}

#[async_trait]
impl Node for TagNode {
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

struct TagFactory;

impl NodeFactory for TagFactory {
    fn create(&self, spec: &NodeSpec, ctx: &BuildContext<'_>) -> Result<Arc<dyn Node>, WorkflowError> {
        Ok(TagNode::start(ctx.options(spec), ctx.runtime()))
    }

    fn kind(&self) -> &str {
        "tag"
    }
}

/// Tag node that also names another node through its config.
struct PointerFactory;

impl NodeFactory for PointerFactory {
    fn create(&self, spec: &NodeSpec, ctx: &BuildContext<'_>) -> Result<Arc<dyn Node>, WorkflowError> {
        for target in self.references(spec) {
            ctx.node(&target)?;
        }
        Ok(TagNode::start(ctx.options(spec), ctx.runtime()))
    }

    fn kind(&self) -> &str {
        "pointer"
    }

    fn references(&self, spec: &NodeSpec) -> Vec<String> {
        spec.config_str("target").map(str::to_string).into_iter().collect()
    }
}

fn registry() -> NodeRegistry {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(TagFactory));
    registry.register(Arc::new(PointerFactory));
    registry
}

fn chain(ids: &[&str]) -> Workflow {
    let mut wf = Workflow::new("chain", ids[0]);
    for id in ids {
        wf.add_node(NodeSpec::new(*id, "tag"));
    }
    for pair in ids.windows(2) {
        wf.connect(pair[0], pair[1]);
    }
    wf
}

#[test]
fn validate_returns_a_build_order() {
    let registry = registry();
    let order = WorkflowBuilder::new(&registry)
        .validate(&chain(&["a", "b", "c"]))
        .unwrap();
    assert_eq!(order.len(), 3);
}

#[test]
fn referenced_nodes_are_built_first() {
    let registry = registry();
    let mut wf = chain(&["a", "b"]);
    wf.add_node(NodeSpec::new("p", "pointer").with_config("target", "b"));
    wf.connect("b", "p");

    let order = WorkflowBuilder::new(&registry).validate(&wf).unwrap();
    let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
    assert!(pos("b") < pos("p"));
}

#[test]
fn rejects_broken_definitions() {
    let registry = registry();
    let builder = WorkflowBuilder::new(&registry);

    let empty = Workflow::new("empty", "a");
    assert!(matches!(builder.validate(&empty), Err(WorkflowError::Invalid(_))));

    let mut unknown = chain(&["a"]);
    unknown.add_node(NodeSpec::new("b", "teleport"));
    assert!(matches!(
        builder.validate(&unknown),
        Err(WorkflowError::UnknownNodeKind(kind)) if kind == "teleport"
    ));

    let mut duplicate = chain(&["a"]);
    duplicate.add_node(NodeSpec::new("a", "tag"));
    assert!(matches!(builder.validate(&duplicate), Err(WorkflowError::DuplicateNode(_))));

    let mut missing_start = chain(&["a"]);
    missing_start.start = "nowhere".to_string();
    assert!(matches!(builder.validate(&missing_start), Err(WorkflowError::NodeNotFound(_))));

    let mut cyclic = chain(&["a", "b"]);
    cyclic.connect("b", "a");
    assert!(matches!(builder.validate(&cyclic), Err(WorkflowError::CyclicDependency)));

    let mut dangling = chain(&["a"]);
    dangling.add_node(NodeSpec::new("p", "pointer").with_config("target", "ghost"));
    assert!(matches!(
        builder.validate(&dangling),
        Err(WorkflowError::NodeNotFound(id)) if id == "ghost"
    ));
}

#[test]
fn workflow_loads_from_json() {
    let registry = registry();
    let wf: Workflow = serde_json::from_value(json!({
        "name": "from json",
        "start": "a",
        "finish": "b",
        "nodes": [{"id": "a", "kind": "tag"}, {"id": "b", "kind": "tag"}],
        "connections": [{"from": "a", "to": "b"}],
        "settings": {"send_timeout_ms": 500}
    }))
    .unwrap();
    assert!(WorkflowBuilder::new(&registry).validate(&wf).is_ok());
}

#[tokio::test]
async fn run_ends_at_the_single_sink() {
    let registry = registry();
    let runtime = Runtime::new();
    let handle = WorkflowBuilder::new(&registry)
        .build(&chain(&["a", "b", "c"]), &runtime)
        .unwrap();
    assert_eq!(handle.finish(), Some("c"));

    let result = handle
        .run(Carrier::from_text("go"), Duration::from_secs(2))
        .await
        .unwrap();
    assert!(result.is_success());
    assert_eq!(result.states["c"].completed, 1);
    assert!(runtime.state().is_complete());
}

#[tokio::test]
async fn run_without_a_finish_times_out() {
    let registry = registry();
    let runtime = Runtime::new();
    let mut wf = chain(&["a", "b"]);
    wf.add_node(NodeSpec::new("c", "tag"));
    wf.connect("a", "c");

    let handle = WorkflowBuilder::new(&registry).build(&wf, &runtime).unwrap();
    assert_eq!(handle.finish(), None);

    let err = handle
        .run(Carrier::from_text("go"), Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Node(NodeError::Timeout { millis: 200 })));
    assert!(runtime.state().is_complete());
}

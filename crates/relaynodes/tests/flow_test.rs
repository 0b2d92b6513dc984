use async_trait::async_trait;
use relaycore::{
    keys, Carrier, ExecutionEvent, HistoryManager, Llm, Message, Model, Node, NodeError,
    NodeEvent, Outlet, RetryGuidance, Signal, SimpleHooks, Status,
};
use relaynodes::{
    Branch, BranchNode, ChildFactory, Group, InteractiveNode, IntegrationStrategy, IntegratorNode,
    LlmNode, LoopNode, PartitionStrategy, PartitionerConfig, PartitionerNode, ReaderNode,
    TransformNode, TransformOp, WriterNode,
};
use relayruntime::{new_signal, NodeOptions, Runtime};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

/// Uppercases the last message. Prompts starting with 'a' answer slowly so
/// the first part of a batch finishes last.
struct SlowUpper;

#[async_trait]
impl Llm for SlowUpper {
    fn model(&self) -> &str {
        "upper"
    }

    async fn chat(&self, messages: &[Message]) -> Result<Message, NodeError> {
        let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        if prompt.starts_with('a') {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(Message::assistant(prompt.to_uppercase()))
    }

    async fn generate_response(&self, info: &str, instruction: &str) -> Result<String, NodeError> {
        Ok(format!("{instruction}: {info}").to_uppercase())
    }

    async fn gen_embed(&self, text: &str) -> Result<Vec<f32>, NodeError> {
        Ok(vec![text.len() as f32])
    }

    async fn available_models(&self) -> Result<Vec<Model>, NodeError> {
        Ok(vec![Model {
            name: "upper".to_string(),
            ..Model::default()
        }])
    }
}

/// Fails the first `failures` calls, then echoes.
struct Flaky {
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl Llm for Flaky {
    fn model(&self) -> &str {
        "flaky"
    }

    async fn chat(&self, messages: &[Message]) -> Result<Message, NodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(NodeError::ExecutionFailed("model unavailable".to_string()));
        }
        let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(Message::assistant(prompt))
    }

    async fn generate_response(&self, info: &str, _instruction: &str) -> Result<String, NodeError> {
        Ok(info.to_string())
    }

    async fn gen_embed(&self, _text: &str) -> Result<Vec<f32>, NodeError> {
        Ok(Vec::new())
    }

    async fn available_models(&self) -> Result<Vec<Model>, NodeError> {
        Ok(Vec::new())
    }
}

fn sink(id: &str) -> (Outlet, mpsc::Receiver<Signal>) {
    let (tx, rx) = mpsc::channel(16);
    (Outlet::new(id, tx), rx)
}

async fn recv(rx: &mut mpsc::Receiver<Signal>) -> Signal {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a signal")
        .expect("channel closed")
}

async fn assert_quiet(rx: &mut mpsc::Receiver<Signal>) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err(), "unexpected signal");
}

fn id(id: &str) -> NodeOptions {
    NodeOptions::new().with_id(id)
}

fn slow_children(runtime: &Runtime) -> ChildFactory {
    let runtime = runtime.clone();
    Arc::new(
        move |n: usize, options: &NodeOptions| -> Result<Vec<Arc<dyn Node>>, NodeError> {
            Ok((0..n)
                .map(|_| LlmNode::new(Arc::new(SlowUpper), options.clone(), &runtime) as Arc<dyn Node>)
                .collect())
        },
    )
}

/// Like `slow_children`, keeping an outlet of every child it builds.
fn recorded_children(runtime: &Runtime, built: Arc<Mutex<Vec<Outlet>>>) -> ChildFactory {
    let inner = slow_children(runtime);
    Arc::new(
        move |n: usize, options: &NodeOptions| -> Result<Vec<Arc<dyn Node>>, NodeError> {
            let nodes = inner(n, options)?;
            built.lock().unwrap().extend(nodes.iter().map(|node| node.outlet()));
            Ok(nodes)
        },
    )
}

/// Warning messages emitted by `node` so far.
fn warnings(
    events: &mut tokio::sync::broadcast::Receiver<ExecutionEvent>,
    node: &str,
) -> Vec<String> {
    let mut found = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::NodeEvent {
            node_id,
            event: NodeEvent::Warning { message },
            ..
        } = event
        {
            if node_id == node {
                found.push(message);
            }
        }
    }
    found
}

#[tokio::test]
async fn inline_partition_merges_in_part_order() {
    let runtime = Runtime::new();
    let config = PartitionerConfig::new()
        .partition(PartitionStrategy::Halves.into_fn())
        .children(slow_children(&runtime))
        .merge(IntegrationStrategy::Concat.into_fn());
    let partitioner = PartitionerNode::new(config, id("split"), &runtime);
    let (outlet, mut rx) = sink("out");
    partitioner.connect_outlet(outlet);

    partitioner
        .outlet()
        .send(new_signal("split", Carrier::from_text("aaaabbbb")))
        .await
        .unwrap();

    let merged = recv(&mut rx).await;
    assert_eq!(merged.task_text(), "AAAABBBB");
    assert_eq!(merged.from_node_id.as_deref(), Some("split"));
}

#[tokio::test]
async fn integrator_waits_for_the_whole_batch() {
    let runtime = Runtime::new();
    let integrator = IntegratorNode::new(IntegrationStrategy::Concat.into_fn(), id("join"), &runtime);
    let (outlet, mut rx) = sink("out");
    integrator.connect_outlet(outlet);

    let config = PartitionerConfig::new()
        .partition(PartitionStrategy::Halves.into_fn())
        .children(slow_children(&runtime))
        .integrator(integrator.clone());
    let partitioner = PartitionerNode::new(config, id("split"), &runtime);

    partitioner
        .outlet()
        .send(new_signal("split", Carrier::from_text("aaaabbbb")))
        .await
        .unwrap();

    let merged = recv(&mut rx).await;
    assert_eq!(merged.task_text(), "AAAABBBB");
    assert!(merged.meta_value(keys::BATCH_ID).is_none());
    assert!(merged.meta_value(keys::PART_INDEX).is_none());
    assert_eq!(integrator.pending_batches(), 0);
    assert_quiet(&mut rx).await;

    let history = merged.history.as_ref().unwrap().history_by_id("join");
    let parts: Vec<String> = history
        .iter()
        .filter(|entry| entry.result.is_none())
        .map(|entry| entry.task_text())
        .collect();
    assert_eq!(parts, ["AAAA", "BBBB"]);
}

#[tokio::test]
async fn nested_batch_keeps_the_outer_tags() {
    let runtime = Runtime::new();
    let outer = IntegratorNode::new(IntegrationStrategy::Concat.into_fn(), id("outer-join"), &runtime);
    let (outlet, mut rx) = sink("out");
    outer.connect_outlet(outlet);
    let group = Group::new("outer", vec!["left".to_string(), "right".to_string()]);
    outer.add_group(group.clone());

    let inner = |name: &str| {
        let join = IntegratorNode::new(
            IntegrationStrategy::Concat.into_fn(),
            id(&format!("{name}-join")),
            &runtime,
        );
        join.connect(outer.as_ref());
        let config = PartitionerConfig::new()
            .partition(PartitionStrategy::Halves.into_fn())
            .children(slow_children(&runtime))
            .integrator(join);
        PartitionerNode::new(config, id(name), &runtime)
    };
    let (left, right) = (inner("left"), inner("right"));

    for (node, text, index) in [(&left, "aabb", "0"), (&right, "ccdd", "1")] {
        let sig = new_signal(node.id(), Carrier::from_text(text))
            .with_meta(keys::BATCH_ID, group.batch_id.clone())
            .with_meta(keys::TASK_ID, node.id())
            .with_meta(keys::PART_INDEX, index);
        node.outlet().send(sig).await.unwrap();
    }

    let merged = recv(&mut rx).await;
    assert_eq!(merged.task_text(), "AABBCCDD");
    assert_eq!(outer.pending_batches(), 0);
    assert!(merged.meta.iter().all(|m| !m.key.contains('@')), "{:?}", merged.meta);
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn partitioner_without_children_fails() {
    let runtime = Runtime::new();
    let config = PartitionerConfig::new().partition(PartitionStrategy::Halves.into_fn());
    let partitioner = PartitionerNode::new(config, id("split"), &runtime);
    let (outlet, mut rx) = sink("out");
    partitioner.connect_outlet(outlet);

    partitioner
        .outlet()
        .send(new_signal("split", Carrier::from_text("aaaabbbb")))
        .await
        .unwrap();

    assert_quiet(&mut rx).await;
    assert_eq!(runtime.state().get_state("split").failures, 1);
    assert!(runtime.state().is_complete());
}

#[tokio::test]
async fn inline_children_stop_after_the_merge() {
    let runtime = Runtime::new();
    let built = Arc::new(Mutex::new(Vec::new()));
    let config = PartitionerConfig::new()
        .partition(PartitionStrategy::Halves.into_fn())
        .children(recorded_children(&runtime, built.clone()))
        .merge(IntegrationStrategy::Concat.into_fn());
    let partitioner = PartitionerNode::new(config, id("split"), &runtime);
    let (outlet, mut rx) = sink("out");
    partitioner.connect_outlet(outlet);

    partitioner
        .outlet()
        .send(new_signal("split", Carrier::from_text("aaaabbbb")))
        .await
        .unwrap();
    assert_eq!(recv(&mut rx).await.task_text(), "AAAABBBB");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let built = built.lock().unwrap();
    assert_eq!(built.len(), 2);
    assert!(built.iter().all(Outlet::is_closed));
    assert!(!partitioner.outlet().is_closed());
    assert!(!runtime.state().is_complete());
}

#[tokio::test]
async fn integrated_children_stop_after_the_merge() {
    let runtime = Runtime::new();
    let integrator = IntegratorNode::new(IntegrationStrategy::Concat.into_fn(), id("join"), &runtime);
    let (outlet, mut rx) = sink("out");
    integrator.connect_outlet(outlet);
    let built = Arc::new(Mutex::new(Vec::new()));
    let config = PartitionerConfig::new()
        .partition(PartitionStrategy::Halves.into_fn())
        .children(recorded_children(&runtime, built.clone()))
        .integrator(integrator.clone());
    let partitioner = PartitionerNode::new(config, id("split"), &runtime);

    partitioner
        .outlet()
        .send(new_signal("split", Carrier::from_text("aaaabbbb")))
        .await
        .unwrap();
    assert_eq!(recv(&mut rx).await.task_text(), "AAAABBBB");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let built = built.lock().unwrap();
    assert_eq!(built.len(), 2);
    assert!(built.iter().all(Outlet::is_closed));
    assert!(!integrator.outlet().is_closed());
}

#[tokio::test]
async fn integrator_passes_unbatched_signals_through() {
    let runtime = Runtime::new();
    let integrator = IntegratorNode::new(IntegrationStrategy::Lines.into_fn(), id("join"), &runtime);
    let (outlet, mut rx) = sink("out");
    integrator.connect_outlet(outlet);

    integrator
        .outlet()
        .send(new_signal("join", Carrier::from_text("solo")))
        .await
        .unwrap();

    assert_eq!(recv(&mut rx).await.task_text(), "solo");
}

#[tokio::test]
async fn branch_takes_the_first_match_only() {
    let runtime = Runtime::new();
    let (a, mut rx_a) = sink("a");
    let (b, mut rx_b) = sink("b");
    let (c, mut rx_c) = sink("c");
    let target = |outlet: Outlet| TransformNode::new(TransformOp::Echo, id(outlet.id()), &runtime);
    let (node_a, node_b, node_c) = (target(a.clone()), target(b.clone()), target(c.clone()));
    node_a.connect_outlet(a);
    node_b.connect_outlet(b);
    node_c.connect_outlet(c);

    let branch = BranchNode::new(
        vec![
            Branch::new(node_a.as_ref(), |_| false),
            Branch::new(node_b.as_ref(), |_| true),
            Branch::new(node_c.as_ref(), |_| true),
        ],
        id("route"),
        &runtime,
    );
    branch
        .outlet()
        .send(new_signal("route", Carrier::from_text("x")))
        .await
        .unwrap();

    assert_eq!(recv(&mut rx_b).await.task_text(), "x");
    assert_quiet(&mut rx_a).await;
    assert_quiet(&mut rx_c).await;
}

#[tokio::test]
async fn branch_without_a_match_uses_connections() {
    let runtime = Runtime::new();
    let (fallback, mut rx) = sink("fallback");
    let (other, mut rx_other) = sink("other");
    let target = TransformNode::new(TransformOp::Echo, id("other"), &runtime);
    target.connect_outlet(other);

    let branch = BranchNode::new(
        vec![Branch::new(target.as_ref(), |sig| sig.task_text() == "never")],
        id("route"),
        &runtime,
    );
    branch.connect_outlet(fallback);
    branch
        .outlet()
        .send(new_signal("route", Carrier::from_text("x")))
        .await
        .unwrap();

    assert_eq!(recv(&mut rx).await.task_text(), "x");
    assert_quiet(&mut rx_other).await;
}

fn count(sig: &Signal) -> u32 {
    sig.meta_value("count").and_then(|c| c.parse().ok()).unwrap_or(0)
}

#[tokio::test]
async fn loop_runs_until_the_condition_holds() {
    let runtime = Runtime::new();
    let body = TransformNode::new(TransformOp::Echo, id("body"), &runtime);
    let hooks = SimpleHooks::new().after(|mut sig| {
        let next = count(&sig) + 1;
        sig.set_meta("count", next.to_string());
        Ok(sig)
    });
    let looper = LoopNode::new(body.as_ref(), id("again").with_hooks(hooks), &runtime)
        .until(|sig| count(sig) >= 3)
        .start();
    body.connect(looper.as_ref());
    let (outlet, mut rx) = sink("out");
    looper.connect_outlet(outlet);

    body.outlet()
        .send(new_signal("body", Carrier::from_text("x")))
        .await
        .unwrap();

    for expected in 1..=3 {
        assert_eq!(count(&recv(&mut rx).await), expected);
    }
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn loop_stops_at_max_iterations() {
    let runtime = Runtime::new();
    let body = TransformNode::new(TransformOp::Echo, id("body"), &runtime);
    let mut events = runtime.subscribe_events();
    let looper = LoopNode::new(body.as_ref(), id("again"), &runtime)
        .max_iterations(2)
        .start();
    body.connect(looper.as_ref());
    let (outlet, mut rx) = sink("out");
    looper.connect_outlet(outlet);

    body.outlet()
        .send(new_signal("body", Carrier::from_text("x")))
        .await
        .unwrap();

    for _ in 0..3 {
        recv(&mut rx).await;
    }
    assert_quiet(&mut rx).await;
    assert_eq!(
        warnings(&mut events, "again"),
        ["iteration limit 2 reached, not looping"]
    );
}

#[tokio::test]
async fn llm_worker_stores_the_reply() {
    let runtime = Runtime::new();
    let worker = LlmNode::new(Arc::new(SlowUpper), id("model"), &runtime);
    let (outlet, mut rx) = sink("out");
    worker.connect_outlet(outlet);

    worker
        .outlet()
        .send(new_signal("model", Carrier::from_text("hello")))
        .await
        .unwrap();

    assert_eq!(recv(&mut rx).await.task_text(), "HELLO");
    assert_eq!(runtime.state().get_state("model").status, Status::Success);
}

#[tokio::test]
async fn llm_worker_retries_under_error_guidance() {
    let runtime = Runtime::new();
    let llm = Arc::new(Flaky {
        failures: 2,
        calls: AtomicU32::new(0),
    });
    let mut events = runtime.subscribe_events();
    let options = id("model").with_error_guidance(RetryGuidance::new(2));
    let worker = LlmNode::new(llm.clone(), options, &runtime);
    let (outlet, mut rx) = sink("out");
    worker.connect_outlet(outlet);

    worker
        .outlet()
        .send(new_signal("model", Carrier::from_text("ping")))
        .await
        .unwrap();

    assert_eq!(recv(&mut rx).await.task_text(), "ping");
    assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    assert_eq!(runtime.state().get_state("model").failures, 0);
    assert_eq!(warnings(&mut events, "model").len(), 2);
}

#[tokio::test]
async fn llm_worker_fails_once_retries_run_out() {
    let runtime = Runtime::new();
    let llm = Arc::new(Flaky {
        failures: 5,
        calls: AtomicU32::new(0),
    });
    let options = id("model").with_error_guidance(RetryGuidance::new(1));
    let worker = LlmNode::new(llm, options, &runtime);
    let (outlet, mut rx) = sink("out");
    worker.connect_outlet(outlet);

    worker
        .outlet()
        .send(new_signal("model", Carrier::from_text("ping")))
        .await
        .unwrap();

    assert_quiet(&mut rx).await;
    assert_eq!(runtime.state().get_state("model").failures, 1);
    assert!(runtime.state().is_complete());
}

#[tokio::test]
async fn reader_turns_input_into_the_task() {
    let runtime = Runtime::new();
    let reader = ReaderNode::new(&b"line one\nline two"[..], id("in"), &runtime);
    let (outlet, mut rx) = sink("out");
    reader.connect_outlet(outlet);

    reader
        .outlet()
        .send(new_signal("in", Carrier::empty()))
        .await
        .unwrap();

    assert_eq!(recv(&mut rx).await.task_text(), "line one\nline two");
}

#[tokio::test]
async fn writer_prints_and_passes_through() {
    let runtime = Runtime::new();
    let (written, mut readback) = tokio::io::duplex(256);
    let writer = WriterNode::new(written, id("print"), &runtime);
    let (outlet, mut rx) = sink("out");
    writer.connect_outlet(outlet);

    writer
        .outlet()
        .send(new_signal("print", Carrier::from_text("done")))
        .await
        .unwrap();

    assert_eq!(recv(&mut rx).await.task_text(), "done");
    let mut buf = [0u8; 5];
    readback.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"done\n");
}

#[tokio::test]
async fn interactive_reads_until_quit() {
    let runtime = Runtime::new();
    let input: &'static [u8] = b"what is rust\n/quit\n";
    let ask = InteractiveNode::with_prompt(input, tokio::io::sink(), "> ", id("ask"), &runtime);
    let (outlet, mut rx) = sink("out");
    ask.connect_outlet(outlet);

    ask.outlet().send(new_signal("ask", Carrier::empty())).await.unwrap();
    assert_eq!(recv(&mut rx).await.task_text(), "what is rust");
    assert!(!runtime.state().is_complete());

    ask.outlet().send(new_signal("ask", Carrier::empty())).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), runtime.state().wait_for(None))
        .await
        .expect("quit should complete the workflow");
    assert_eq!(runtime.state().get_state("ask").failures, 0);
}

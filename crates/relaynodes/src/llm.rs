use async_trait::async_trait;
use relaycore::{Carrier, Llm, Message, Node, NodeError, Outlet, Signal};
use relayruntime::{spawn_pump, NodeBase, NodeOptions, Runtime};
use std::sync::Arc;
use tracing::debug;

/// Worker that sends its task to a language model as one user message and
/// stores the reply as its result.
///
/// Guidance, when configured, rewrites the signal first using this node's
/// context entry.
pub struct LlmNode {
    base: NodeBase,
    llm: Arc<dyn Llm>,
}

impl LlmNode {
    pub fn new(llm: Arc<dyn Llm>, options: NodeOptions, runtime: &Runtime) -> Arc<Self> {
        let (base, rx) = NodeBase::new("worker.llm", options, runtime);
        let shutdown = base.shutdown();
        let node = Arc::new(Self { base, llm });
        spawn_pump(node.clone(), rx, shutdown);
        node
    }

    async fn handle(&self, sig: &mut Signal) -> Result<(), NodeError> {
        self.base.pre_process(sig).await?;
        self.base.apply_guidance(sig)?;

        let llm = &self.llm;
        let prompt = sig.task_text();
        debug!(node_id = %self.base.id(), model = %llm.model(), "calling model");
        let reply = self
            .base
            .recover(|| {
                let messages = vec![Message::user(prompt.clone())];
                async move {
                    let reply = llm.chat(&messages).await?;
                    Ok::<_, NodeError>(Carrier::from_text(reply.content))
                }
            })
            .await?;

        match reply {
            Some(payload) => sig.set_result(payload),
            None => sig.pass_through(),
        }
        sig.mark_success();

        self.base.post_process(sig)?;
        self.base.send_to_connected(sig).await
    }
}

#[async_trait]
impl Node for LlmNode {
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

use crate::writer::ByteSink;
use async_trait::async_trait;
use relaycore::{Carrier, Node, NodeError, NodeSpec, Outlet, Signal, WorkflowError};
use relayruntime::{
    spawn_pump, BuildContext, ConfigField, NodeBase, NodeFactory, NodeMetadata, NodeOptions,
    Runtime,
};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::Mutex;
use tracing::info;

pub const QUIT_COMMAND: &str = "/quit";
pub const DEFAULT_PROMPT: &str = "\nEnter your question (type /quit to stop): ";

pub type LineSource = Box<dyn AsyncBufRead + Send + Unpin>;

/// Asks the user for the next task on every signal.
///
/// Typing `/quit`, or closing the input, completes the whole workflow.
pub struct InteractiveNode {
    base: NodeBase,
    prompt: String,
    lines: Mutex<Lines<LineSource>>,
    out: Mutex<ByteSink>,
}

impl InteractiveNode {
    pub fn new<R, W>(input: R, output: W, options: NodeOptions, runtime: &Runtime) -> Arc<Self>
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_prompt(input, output, DEFAULT_PROMPT, options, runtime)
    }

    pub fn with_prompt<R, W>(
        input: R,
        output: W,
        prompt: impl Into<String>,
        options: NodeOptions,
        runtime: &Runtime,
    ) -> Arc<Self>
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (base, rx) = NodeBase::new("io.interactive", options, runtime);
        let shutdown = base.shutdown();
        let source: LineSource = Box::new(input);
        let node = Arc::new(Self {
            base,
            prompt: prompt.into(),
            lines: Mutex::new(source.lines()),
            out: Mutex::new(Box::new(output)),
        });
        spawn_pump(node.clone(), rx, shutdown);
        node
    }

    async fn handle(&self, sig: &mut Signal) -> Result<(), NodeError> {
        self.base.pre_process(sig).await?;

        {
            let mut out = self.out.lock().await;
            out.write_all(self.prompt.as_bytes()).await?;
            out.flush().await?;
        }
        let line = self.lines.lock().await.next_line().await?;

        let query = match line.as_deref().map(str::trim) {
            None | Some(QUIT_COMMAND) => {
                info!(node_id = %self.base.id(), "user quit");
                self.base.runtime().complete();
                return Ok(());
            }
            Some(query) => query.to_string(),
        };

        sig.set_result(Carrier::from_text(query));
        sig.mark_success();

        self.base.post_process(sig)?;
        self.base.send_to_connected(sig).await
    }
}

#[async_trait]
impl Node for InteractiveNode {
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

/// Prompts on stdout and reads stdin.
pub struct InteractiveNodeFactory;

impl NodeFactory for InteractiveNodeFactory {
    fn create(&self, spec: &NodeSpec, ctx: &BuildContext<'_>) -> Result<Arc<dyn Node>, WorkflowError> {
        let prompt = spec.config_str("prompt").unwrap_or(DEFAULT_PROMPT);
        Ok(InteractiveNode::with_prompt(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            prompt,
            ctx.options(spec),
            ctx.runtime(),
        ))
    }

    fn kind(&self) -> &str {
        "interactive"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Ask the user for the next task; /quit ends the workflow".to_string(),
            category: "io".to_string(),
            config: vec![ConfigField::optional("prompt", "text shown before reading a line")],
        }
    }
}

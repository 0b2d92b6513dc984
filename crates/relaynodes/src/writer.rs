use async_trait::async_trait;
use relaycore::{Node, NodeError, NodeSpec, Outlet, Signal, WorkflowError};
use relayruntime::{
    spawn_pump, BuildContext, ConfigField, NodeBase, NodeFactory, NodeMetadata, NodeOptions,
    Runtime,
};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

pub type ByteSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Output boundary: writes each task to a sink, one per line, and passes it on.
pub struct WriterNode {
    base: NodeBase,
    sink: Mutex<ByteSink>,
}

impl WriterNode {
    pub fn new<W>(sink: W, options: NodeOptions, runtime: &Runtime) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (base, rx) = NodeBase::new("io.writer", options, runtime);
        let shutdown = base.shutdown();
        let node = Arc::new(Self {
            base,
            sink: Mutex::new(Box::new(sink)),
        });
        spawn_pump(node.clone(), rx, shutdown);
        node
    }

    async fn handle(&self, sig: &mut Signal) -> Result<(), NodeError> {
        self.base.pre_process(sig).await?;

        let mut text = sig.task_text();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        {
            let mut sink = self.sink.lock().await;
            sink.write_all(text.as_bytes()).await?;
            sink.flush().await?;
        }
        sig.pass_through();
        sig.mark_success();

        self.base.post_process(sig)?;
        self.base.send_to_connected(sig).await
    }
}

#[async_trait]
impl Node for WriterNode {
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

/// Writes to the file at `path` (truncated), or stdout without one.
pub struct WriterNodeFactory;

impl NodeFactory for WriterNodeFactory {
    fn create(&self, spec: &NodeSpec, ctx: &BuildContext<'_>) -> Result<Arc<dyn Node>, WorkflowError> {
        let sink: ByteSink = match spec.config_str("path") {
            Some(path) => {
                let file = std::fs::File::create(path).map_err(|e| WorkflowError::InvalidConfig {
                    node: spec.id.clone(),
                    reason: format!("cannot create '{path}': {e}"),
                })?;
                Box::new(tokio::fs::File::from_std(file))
            }
            None => Box::new(tokio::io::stdout()),
        };
        Ok(WriterNode::new(sink, ctx.options(spec), ctx.runtime()))
    }

    fn kind(&self) -> &str {
        "writer"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Write the task to a file or stdout".to_string(),
            category: "io".to_string(),
            config: vec![ConfigField::optional("path", "file to write (default stdout)")],
        }
    }
}

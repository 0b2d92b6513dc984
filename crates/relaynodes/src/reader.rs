use async_trait::async_trait;
use relaycore::{Carrier, Node, NodeError, NodeSpec, Outlet, Signal, WorkflowError};
use relayruntime::{
    spawn_pump, BuildContext, ConfigField, NodeBase, NodeFactory, NodeMetadata, NodeOptions,
    Runtime,
};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;

pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

/// Input boundary: drains a byte source into the signal's result.
///
/// The source is read to its end on every signal, so a second signal sees
/// only what arrived since.
pub struct ReaderNode {
    base: NodeBase,
    source: Mutex<ByteSource>,
}

impl ReaderNode {
    pub fn new<R>(source: R, options: NodeOptions, runtime: &Runtime) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (base, rx) = NodeBase::new("io.reader", options, runtime);
        let shutdown = base.shutdown();
        let node = Arc::new(Self {
            base,
            source: Mutex::new(Box::new(source)),
        });
        spawn_pump(node.clone(), rx, shutdown);
        node
    }

    async fn handle(&self, sig: &mut Signal) -> Result<(), NodeError> {
        self.base.pre_process(sig).await?;

        let mut bytes = Vec::new();
        self.source.lock().await.read_to_end(&mut bytes).await?;
        sig.set_result(Carrier::from_text(String::from_utf8_lossy(&bytes)));
        sig.mark_success();

        self.base.post_process(sig)?;
        self.base.send_to_connected(sig).await
    }
}

#[async_trait]
impl Node for ReaderNode {
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

/// Reads the file at `path`, or stdin without one.
pub struct ReaderNodeFactory;

impl NodeFactory for ReaderNodeFactory {
    fn create(&self, spec: &NodeSpec, ctx: &BuildContext<'_>) -> Result<Arc<dyn Node>, WorkflowError> {
        let source: ByteSource = match spec.config_str("path") {
            Some(path) => {
                let file = std::fs::File::open(path).map_err(|e| WorkflowError::InvalidConfig {
                    node: spec.id.clone(),
                    reason: format!("cannot open '{path}': {e}"),
                })?;
                Box::new(tokio::fs::File::from_std(file))
            }
            None => Box::new(tokio::io::stdin()),
        };
        Ok(ReaderNode::new(source, ctx.options(spec), ctx.runtime()))
    }

    fn kind(&self) -> &str {
        "reader"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Read a file or stdin into the signal".to_string(),
            category: "io".to_string(),
            config: vec![ConfigField::optional("path", "file to read (default stdin)")],
        }
    }
}

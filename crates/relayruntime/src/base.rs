use crate::Runtime;
use relaycore::{
    DataCarrier, ErrorAction, ErrorGuidance, EventEmitter, Guidance, Hooks, Node, NodeError,
    Outlet, Payload, Signal,
};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Per-node configuration. A missing id gets a random v4 UUID.
#[derive(Clone, Default)]
pub struct NodeOptions {
    pub id: Option<String>,
    pub hooks: Option<Arc<dyn Hooks>>,
    pub guidance: Option<Arc<dyn Guidance>>,
    pub error_guidance: Option<Arc<dyn ErrorGuidance>>,
    /// Parent of the node's shutdown handle. Without one the node lives
    /// until the workflow completes.
    pub shutdown: Option<CancellationToken>,
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_hooks(mut self, hooks: impl Hooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    pub fn with_guidance(mut self, guidance: impl Guidance + 'static) -> Self {
        self.guidance = Some(Arc::new(guidance));
        self
    }

    pub fn with_error_guidance(mut self, guidance: impl ErrorGuidance + 'static) -> Self {
        self.error_guidance = Some(Arc::new(guidance));
        self
    }

    /// Stop the node when `parent` is cancelled. `parent` should itself
    /// descend from the workflow's handle so completion still reaches it.
    pub fn with_shutdown(mut self, parent: CancellationToken) -> Self {
        self.shutdown = Some(parent);
        self
    }
}

/// Behavior shared by every concrete node: wiring, the pre/post pipeline,
/// downstream delivery and failure reporting.
pub struct NodeBase {
    id: String,
    node_type: &'static str,
    tx: mpsc::Sender<Signal>,
    connections: RwLock<Vec<Outlet>>,
    hooks: Option<Arc<dyn Hooks>>,
    guidance: Option<Arc<dyn Guidance>>,
    error_guidance: Option<Arc<dyn ErrorGuidance>>,
    runtime: Runtime,
    shutdown: CancellationToken,
    events: EventEmitter,
}

impl NodeBase {
    /// Returns the base and the receiving half of its input channel, which
    /// the caller hands to [`spawn_pump`].
    pub fn new(
        node_type: &'static str,
        options: NodeOptions,
        runtime: &Runtime,
    ) -> (Self, mpsc::Receiver<Signal>) {
        let id = options
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let (tx, rx) = mpsc::channel(runtime.config().input_buffer.max(1));
        let events = runtime.event_bus().create_emitter(id.clone());

        let base = Self {
            id,
            node_type,
            tx,
            connections: RwLock::new(Vec::new()),
            hooks: options.hooks,
            guidance: options.guidance,
            error_guidance: options.error_guidance,
            runtime: runtime.clone(),
            shutdown: match options.shutdown {
                Some(parent) => parent.child_token(),
                None => runtime.state().register(),
            },
            events,
        };
        (base, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node_type(&self) -> &str {
        self.node_type
    }

    pub fn outlet(&self) -> Outlet {
        Outlet::new(self.id.clone(), self.tx.clone())
    }

    pub fn connect_outlet(&self, outlet: Outlet) {
        debug!(node_id = %self.id, target = %outlet.id(), "connected");
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(outlet);
    }

    pub fn connections(&self) -> Vec<Outlet> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn shutdown(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Validates the signal, waits out the rate limiter and runs the before-hook.
    pub async fn pre_process(&self, sig: &mut Signal) -> Result<(), NodeError> {
        if sig.node_id.is_empty() {
            return Err(NodeError::MissingId);
        }
        debug!(node_id = %self.id, from = ?sig.from_node_id, "signal received");
        self.events.received(self.node_type);

        self.acquire_capacity(sig).await?;
        sig.mark_in_process();

        if let Some(hooks) = &self.hooks {
            *sig = hooks.before_action(sig.clone())?;
        }
        Ok(())
    }

    async fn acquire_capacity(&self, sig: &Signal) -> Result<(), NodeError> {
        let Some(limiter) = self.runtime.limiter() else {
            return Ok(());
        };
        let config = self.runtime.config();

        // Attempts count from zero: 0, 1, 4, ... units of backoff.
        for attempt in 0..config.rate_limit_retries {
            let Err(err) = limiter.rate_limit(sig) else {
                return Ok(());
            };
            let backoff = config.backoff_unit * attempt * attempt;
            warn!(node_id = %self.id, attempt, ?backoff, "{}", err);
            self.events.warn(format!("{err}, retrying in {backoff:?}"));
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(NodeError::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
        }

        limiter
            .rate_limit(sig)
            .map_err(|_| NodeError::RateLimitExhausted)
    }

    /// Runs the after-hook and reports to the state manager.
    pub fn post_process(&self, sig: &mut Signal) -> Result<(), NodeError> {
        if let Some(hooks) = &self.hooks {
            *sig = hooks.after_action(sig.clone())?;
        }
        self.runtime.state().update_state(sig);
        self.events.completed(sig.status);
        Ok(())
    }

    /// Rewrites the signal through the configured guidance, feeding it this
    /// node's context entry (empty when absent).
    pub fn apply_guidance(&self, sig: &mut Signal) -> Result<(), NodeError> {
        let Some(guidance) = &self.guidance else {
            return Ok(());
        };
        let context = sig
            .context
            .as_ref()
            .and_then(|ctx| ctx.get_context(&self.id))
            .map(|payload| payload.text())
            .unwrap_or_default();
        *sig = guidance.generate(sig.clone(), &context)?;
        Ok(())
    }

    /// Runs `action` under the node's error guidance.
    ///
    /// `Ok(None)` means the error was ignored and the caller should pass the
    /// task through. Without error guidance every error is returned.
    pub async fn recover<F, Fut>(&self, mut action: F) -> Result<Option<Payload>, NodeError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<Payload, NodeError>> + Send,
    {
        let mut attempt = 0;
        loop {
            let err = match action().await {
                Ok(result) => return Ok(Some(result)),
                Err(err) => err,
            };
            let Some(guidance) = &self.error_guidance else {
                return Err(err);
            };
            match guidance.action(&err) {
                ErrorAction::Retry if attempt < guidance.retries() => {
                    attempt += 1;
                    warn!(node_id = %self.id, attempt, error = %err, "retrying");
                    self.events.warn(format!("retry {attempt} after error: {err}"));
                }
                ErrorAction::Retry | ErrorAction::Fail => return Err(err),
                ErrorAction::Ignore => {
                    warn!(node_id = %self.id, error = %err, "ignoring error");
                    self.events.warn(format!("ignored error: {err}"));
                    return Ok(None);
                }
                ErrorAction::NotAnError => {
                    debug!(node_id = %self.id, error = %err, "not treated as an error");
                    self.events.info(format!("not treated as an error: {err}"));
                    return Ok(None);
                }
            }
        }
    }

    /// Hands the signal to every connected node.
    pub async fn send_to_connected(&self, sig: &Signal) -> Result<(), NodeError> {
        let outlets = self.connections();
        self.send_to(&outlets, sig).await
    }

    /// Hands the signal to `outlets` in order.
    ///
    /// The result becomes each receiver's task. All sends share one deadline
    /// and also give up when the workflow shuts down; signals already
    /// delivered stay delivered.
    pub async fn send_to(&self, outlets: &[Outlet], sig: &Signal) -> Result<(), NodeError> {
        if outlets.is_empty() {
            debug!(node_id = %self.id, "no downstream nodes");
            return Ok(());
        }

        let deadline = Instant::now() + self.runtime.config().send_timeout;
        let mut next = sig.clone();
        next.prepare_for_next();

        for outlet in outlets {
            let mut out = next.clone();
            out.node_id = outlet.id().to_string();
            out.from_node_id = Some(self.id.clone());

            debug!(node_id = %self.id, to = %outlet.id(), "sending signal");
            outlet.send_until(out, deadline, &self.shutdown).await?;
            self.events.sent(outlet.id());
        }
        Ok(())
    }

    /// Queues `sig` on one outlet unchanged, bounded by the send timeout.
    pub async fn deliver(&self, outlet: &Outlet, sig: Signal) -> Result<(), NodeError> {
        let deadline = Instant::now() + self.runtime.config().send_timeout;
        outlet.send_until(sig, deadline, &self.shutdown).await?;
        self.events.sent(outlet.id());
        Ok(())
    }

    /// Marks the signal failed, reports it and completes the workflow.
    pub fn fail(&self, mut sig: Signal, err: NodeError) {
        error!(node_id = %self.id, error = %err, "signal failed");
        if sig.node_id.is_empty() {
            sig.node_id = self.id.clone();
        }
        sig.mark_failed(&err);
        self.runtime.state().update_state(&sig);
        self.events.failed(err.to_string());
        self.runtime.state().complete();
    }

    /// Routes the outcome of one `process_signal` call.
    ///
    /// Shutdown while delivering is not a failure of this node.
    pub fn settle(&self, sig: Signal, outcome: Result<(), NodeError>) {
        match outcome {
            Ok(()) => {}
            Err(NodeError::Cancelled) => {
                debug!(node_id = %self.id, "workflow shut down while processing")
            }
            Err(err) => self.fail(sig, err),
        }
    }
}

/// Starts the task draining a node's input channel.
///
/// Signals are processed one at a time in arrival order until the shutdown
/// handle fires.
pub fn spawn_pump<N>(
    node: Arc<N>,
    mut rx: mpsc::Receiver<Signal>,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    N: Node + ?Sized + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!(node_id = %node.id(), "shutting down");
                    break;
                }
                received = rx.recv() => match received {
                    Some(sig) => node.process_signal(sig).await,
                    None => break,
                },
            }
        }
    })
}

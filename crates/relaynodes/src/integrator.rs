use crate::partition::IntegrateFn;
use async_trait::async_trait;
use relaycore::{keys, Carrier, Node, NodeError, Outlet, Signal};
use relayruntime::{spawn_pump, NodeBase, NodeOptions, Runtime};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Correlation record for one partition operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub originator_id: String,
    pub batch_id: String,
    /// Ids of the child nodes the parts were dispatched to.
    pub task_ids: Vec<String>,
}

impl Group {
    /// Group with a fresh batch id.
    pub fn new(originator_id: impl Into<String>, task_ids: Vec<String>) -> Self {
        Self {
            originator_id: originator_id.into(),
            batch_id: Uuid::new_v4().to_string(),
            task_ids,
        }
    }
}

struct Batch {
    group: Group,
    parts: Vec<Signal>,
    done: Option<CancellationToken>,
}

enum Arrival {
    Unbatched,
    Waiting,
    Complete(Batch),
}

/// Fan-in node: buffers the results of a registered batch and forwards one
/// merged signal once every part arrived.
///
/// Parts may arrive in any order; they are merged by `part-index`. Signals
/// that do not belong to a registered batch pass straight through.
pub struct IntegratorNode {
    base: NodeBase,
    integrate: IntegrateFn,
    batches: Mutex<HashMap<String, Batch>>,
}

impl IntegratorNode {
    pub fn new(integrate: IntegrateFn, options: NodeOptions, runtime: &Runtime) -> Arc<Self> {
        let (base, rx) = NodeBase::new("control.integrator", options, runtime);
        let shutdown = base.shutdown();
        let node = Arc::new(Self {
            base,
            integrate,
            batches: Mutex::new(HashMap::new()),
        });
        spawn_pump(node.clone(), rx, shutdown);
        node
    }

    /// Registers a batch. Must happen before any of its parts are dispatched.
    pub fn add_group(&self, group: Group) {
        self.insert(group, None);
    }

    /// Like [`add_group`](Self::add_group), and cancels `done` once the
    /// batch is merged.
    pub fn add_batch(&self, group: Group, done: CancellationToken) {
        self.insert(group, Some(done));
    }

    fn insert(&self, group: Group, done: Option<CancellationToken>) {
        debug!(
            node_id = %self.base.id(),
            batch_id = %group.batch_id,
            parts = group.task_ids.len(),
            "batch registered"
        );
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                group.batch_id.clone(),
                Batch {
                    group,
                    parts: Vec::new(),
                    done,
                },
            );
    }

    /// Batches registered and not yet merged.
    pub fn pending_batches(&self) -> usize {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn buffer(&self, sig: &Signal) -> Arrival {
        let Some(batch_id) = sig.meta_value(keys::BATCH_ID) else {
            return Arrival::Unbatched;
        };
        let mut batches = self.batches.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(batch) = batches.get_mut(batch_id) else {
            return Arrival::Unbatched;
        };

        let task_id = sig.meta_value(keys::TASK_ID);
        if batch
            .parts
            .iter()
            .any(|part| part.meta_value(keys::TASK_ID) == task_id)
        {
            warn!(node_id = %self.base.id(), batch_id, ?task_id, "duplicate part dropped");
            return Arrival::Waiting;
        }
        batch.parts.push(sig.clone());

        if batch.parts.len() < batch.group.task_ids.len() {
            return Arrival::Waiting;
        }
        match batches.remove(batch_id) {
            Some(batch) => Arrival::Complete(batch),
            None => Arrival::Waiting,
        }
    }

    async fn handle(&self, sig: &mut Signal) -> Result<(), NodeError> {
        self.base.pre_process(sig).await?;

        match self.buffer(sig) {
            Arrival::Unbatched => sig.pass_through(),
            Arrival::Waiting => return Ok(()),
            Arrival::Complete(batch) => self.merge(sig, batch)?,
        }
        sig.mark_success();

        self.base.post_process(sig)?;
        self.base.send_to_connected(sig).await
    }

    fn merge(&self, sig: &mut Signal, batch: Batch) -> Result<(), NodeError> {
        if let Some(done) = &batch.done {
            done.cancel();
        }
        let mut parts = batch.parts;
        parts.sort_by_key(part_index);

        if let Some(history) = &sig.history {
            for part in &parts {
                history.add_history(part.archived());
            }
        }

        let texts: Vec<String> = parts.iter().map(|part| part.task_text()).collect();
        let merged = (self.integrate)(texts.as_slice())?;
        debug!(
            node_id = %self.base.id(),
            batch_id = %batch.group.batch_id,
            originator = %batch.group.originator_id,
            "batch merged"
        );

        sig.set_result(Carrier::from_text(merged));
        // Put back the tags of an enclosing batch, if any.
        for key in [keys::BATCH_ID, keys::TASK_ID, keys::PART_INDEX] {
            sig.remove_meta(key);
            let saved = keys::saved(key, &batch.group.batch_id);
            if let Some(outer) = sig.meta_value(&saved).map(str::to_string) {
                sig.remove_meta(&saved);
                sig.set_meta(key, outer);
            }
        }
        Ok(())
    }
}

fn part_index(sig: &Signal) -> usize {
    sig.meta_value(keys::PART_INDEX)
        .and_then(|idx| idx.parse().ok())
        .unwrap_or(usize::MAX)
}

#[async_trait]
impl Node for IntegratorNode {
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

use crate::registry::{BuildContext, NodeRegistry};
use crate::{new_signal, Runtime, State};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use relaycore::{FlowError, Node, NodeError, Payload, Workflow, WorkflowError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Validates workflow definitions and turns them into running nodes.
pub struct WorkflowBuilder<'a> {
    registry: &'a NodeRegistry,
}

impl<'a> WorkflowBuilder<'a> {
    pub fn new(registry: &'a NodeRegistry) -> Self {
        Self { registry }
    }

    /// Checks the definition and returns the order nodes must be built in.
    ///
    /// Connections must form a DAG; loops go through a loop node's start
    /// reference instead of a connection.
    pub fn validate(&self, workflow: &Workflow) -> Result<Vec<String>, WorkflowError> {
        if workflow.nodes.is_empty() {
            return Err(WorkflowError::Invalid("workflow has no nodes".to_string()));
        }

        let mut seen = HashSet::new();
        for spec in &workflow.nodes {
            if !seen.insert(spec.id.as_str()) {
                return Err(WorkflowError::DuplicateNode(spec.id.clone()));
            }
            self.registry.get(&spec.kind)?.validate(spec)?;
        }

        for id in std::iter::once(&workflow.start).chain(workflow.finish.as_ref()) {
            if !seen.contains(id.as_str()) {
                return Err(WorkflowError::NodeNotFound(id.clone()));
            }
        }

        let edges: Vec<(&str, &str)> = workflow
            .connections
            .iter()
            .map(|c| (c.from.as_str(), c.to.as_str()))
            .collect();
        check_acyclic(workflow, &edges)?;

        // A referenced node is built before the node holding the reference.
        let mut references = Vec::new();
        for spec in &workflow.nodes {
            for target in self.registry.get(&spec.kind)?.references(spec) {
                references.push((target, spec.id.clone()));
            }
        }
        let reference_edges: Vec<(&str, &str)> = references
            .iter()
            .map(|(from, to)| (from.as_str(), to.as_str()))
            .collect();
        check_acyclic(workflow, &reference_edges)
    }

    /// Builds and wires every node of `workflow` against `runtime`.
    pub fn build(&self, workflow: &Workflow, runtime: &Runtime) -> Result<ExecutionHandle, WorkflowError> {
        let order = self.validate(workflow)?;
        let mut nodes: HashMap<String, Arc<dyn Node>> = HashMap::new();

        for id in order {
            let spec = workflow
                .find_node(&id)
                .ok_or_else(|| WorkflowError::NodeNotFound(id.clone()))?;
            let node = {
                let ctx = BuildContext::new(runtime, &nodes);
                self.registry.create_node(spec, &ctx)?
            };
            nodes.insert(id, node);
        }

        for conn in &workflow.connections {
            let from = nodes
                .get(&conn.from)
                .ok_or_else(|| WorkflowError::NodeNotFound(conn.from.clone()))?;
            let to = nodes
                .get(&conn.to)
                .ok_or_else(|| WorkflowError::NodeNotFound(conn.to.clone()))?;
            from.connect(to.as_ref());
        }

        let finish = match &workflow.finish {
            Some(id) => Some(id.clone()),
            None => self.single_sink(workflow),
        };
        info!(workflow = %workflow.name, nodes = nodes.len(), finish = ?finish, "workflow built");

        Ok(ExecutionHandle {
            name: workflow.name.clone(),
            nodes,
            start: workflow.start.clone(),
            finish,
            runtime: runtime.clone(),
        })
    }

    /// The only node with neither outgoing connections nor references.
    fn single_sink(&self, workflow: &Workflow) -> Option<String> {
        let sources: HashSet<&str> = workflow.connections.iter().map(|c| c.from.as_str()).collect();
        let mut sinks = workflow.nodes.iter().filter(|spec| {
            let routes_elsewhere = self
                .registry
                .get(&spec.kind)
                .map(|f| !f.references(spec).is_empty())
                .unwrap_or(false);
            !sources.contains(spec.id.as_str()) && !routes_elsewhere
        });
        match (sinks.next(), sinks.next()) {
            (Some(only), None) => Some(only.id.clone()),
            _ => None,
        }
    }
}

fn check_acyclic(workflow: &Workflow, edges: &[(&str, &str)]) -> Result<Vec<String>, WorkflowError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();

    for spec in &workflow.nodes {
        index.insert(spec.id.as_str(), graph.add_node(spec.id.as_str()));
    }

    for (from, to) in edges {
        let from_idx = index
            .get(from)
            .ok_or_else(|| WorkflowError::NodeNotFound(from.to_string()))?;
        let to_idx = index
            .get(to)
            .ok_or_else(|| WorkflowError::NodeNotFound(to.to_string()))?;
        graph.add_edge(*from_idx, *to_idx, ());
    }

    let sorted = toposort(&graph, None).map_err(|_| WorkflowError::CyclicDependency)?;
    Ok(sorted.into_iter().map(|idx| graph[idx].to_string()).collect())
}

/// A built workflow whose nodes are running and waiting for input.
pub struct ExecutionHandle {
    name: String,
    nodes: HashMap<String, Arc<dyn Node>>,
    start: String,
    finish: Option<String>,
    runtime: Runtime,
}

impl ExecutionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self, id: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.get(id)
    }

    pub fn finish(&self) -> Option<&str> {
        self.finish.as_deref()
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Sends a fresh signal carrying `task` to the start node.
    pub async fn inject(&self, task: Payload) -> Result<(), NodeError> {
        let start = self
            .nodes
            .get(&self.start)
            .ok_or_else(|| NodeError::Disconnected(self.start.clone()))?;
        start.outlet().send(new_signal(self.start.clone(), task)).await
    }

    /// Injects `task` and waits for the finish node, or for any explicit
    /// completion when there is none.
    pub async fn run(&self, task: Payload, timeout: Duration) -> Result<ExecutionResult, FlowError> {
        let started = Instant::now();
        self.inject(task).await?;

        let state = self.runtime.state();
        if tokio::time::timeout(timeout, state.wait_for(self.finish.as_deref()))
            .await
            .is_err()
        {
            warn!(workflow = %self.name, ?timeout, "workflow timed out");
            state.complete();
            return Err(NodeError::Timeout {
                millis: timeout.as_millis() as u64,
            }
            .into());
        }

        Ok(ExecutionResult {
            states: state.snapshot(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Result of a workflow run
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub states: HashMap<String, State>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.states.values().all(|s| s.failures == 0)
    }

    /// `(node id, last error)` for every node that failed, sorted by id.
    pub fn failures(&self) -> Vec<(String, String)> {
        let mut failed: Vec<(String, String)> = self
            .states
            .iter()
            .filter(|(_, s)| s.failures > 0)
            .map(|(id, s)| (id.clone(), s.last_error.clone().unwrap_or_default()))
            .collect();
        failed.sort();
        failed
    }
}

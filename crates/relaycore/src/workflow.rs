use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declarative workflow definition, loadable from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Node the initial signal is injected into.
    pub start: String,
    /// Node whose first report ends the run. Defaults to the only node
    /// with no outgoing edges, if there is exactly one.
    #[serde(default)]
    pub finish: Option<String>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

impl Workflow {
    pub fn new(name: impl Into<String>, start: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            start: start.into(),
            finish: None,
            nodes: Vec::new(),
            connections: Vec::new(),
            settings: WorkflowSettings::default(),
        }
    }

    pub fn add_node(&mut self, node: NodeSpec) -> String {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn connect(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.connections.push(Connection {
            from: from.into(),
            to: to.into(),
        });
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Node specification in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            name: None,
            config: HashMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(|v| v.as_u64())
    }
}

/// Directed edge between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub from: String,
    pub to: String,
}

/// Per-workflow overrides of the runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSettings {
    #[serde(default)]
    pub send_timeout_ms: Option<u64>,
    #[serde(default)]
    pub input_buffer: Option<usize>,
    #[serde(default)]
    pub requests_per_second: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_definition() {
        let json = r#"{
            "name": "echo",
            "start": "in",
            "nodes": [
                {"id": "in", "kind": "transform", "config": {"op": "upper"}},
                {"id": "out", "kind": "writer"}
            ],
            "connections": [{"from": "in", "to": "out"}]
        }"#;
        let wf: Workflow = serde_json::from_str(json).unwrap();
        assert_eq!(wf.nodes.len(), 2);
        assert_eq!(wf.find_node("in").unwrap().config_str("op"), Some("upper"));
        assert!(wf.finish.is_none());
        assert!(wf.settings.send_timeout_ms.is_none());
    }
}

use relaycore::{Signal, WorkflowError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Predicate over a signal, used for routing decisions.
pub type ConditionFn = Arc<dyn Fn(&Signal) -> bool + Send + Sync>;

/// Conditions that can be written in a workflow definition.
///
/// Text conditions test the signal's task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionSpec {
    Contains { value: String },
    Equals { value: String },
    Empty,
    NotEmpty,
    MetaEquals { key: String, value: String },
}

impl ConditionSpec {
    pub fn parse(node: &str, value: &serde_json::Value) -> Result<Self, WorkflowError> {
        serde_json::from_value(value.clone()).map_err(|e| WorkflowError::InvalidConfig {
            node: node.to_string(),
            reason: format!("invalid condition: {e}"),
        })
    }

    pub fn evaluate(&self, sig: &Signal) -> bool {
        match self {
            Self::Contains { value } => sig.task_text().contains(value.as_str()),
            Self::Equals { value } => sig.task_text() == *value,
            Self::Empty => sig.task_text().trim().is_empty(),
            Self::NotEmpty => !sig.task_text().trim().is_empty(),
            Self::MetaEquals { key, value } => sig.meta_value(key) == Some(value.as_str()),
        }
    }

    pub fn into_fn(self) -> ConditionFn {
        Arc::new(move |sig: &Signal| self.evaluate(sig))
    }
}

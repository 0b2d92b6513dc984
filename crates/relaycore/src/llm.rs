//! Boundary contract for language-model collaborators.
//!
//! Provider clients live outside this workspace; worker nodes only see this trait.

use crate::NodeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Model description as reported by a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub size: i64,
    pub format: String,
    pub family: String,
    pub parameters: String,
    pub quantization: String,
}

#[async_trait]
pub trait Llm: Send + Sync {
    /// Name of the model requests are sent to.
    fn model(&self) -> &str;

    async fn chat(&self, messages: &[Message]) -> Result<Message, NodeError>;

    async fn generate_response(&self, info: &str, instruction: &str) -> Result<String, NodeError>;

    async fn gen_embed(&self, text: &str) -> Result<Vec<f32>, NodeError>;

    async fn available_models(&self) -> Result<Vec<Model>, NodeError>;
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Payload abstraction carried by a signal.
///
/// The engine never looks inside a payload beyond these accessors, so callers
/// are free to plug in their own types.
pub trait DataCarrier: fmt::Debug + Send + Sync {
    /// Textual form of the payload.
    fn text(&self) -> String;

    /// JSON encoding of the payload.
    fn json(&self) -> Vec<u8>;

    /// Embedding vector, if the payload has one.
    fn vector(&self) -> Option<&[f32]> {
        None
    }
}

/// Shared handle to a payload. Cloning a signal only bumps the refcount.
pub type Payload = Arc<dyn DataCarrier>;

/// Built-in payload type covering text, JSON and vectors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value")]
pub enum Carrier {
    Text(String),
    Json(serde_json::Value),
    Vector(Vec<f32>),
}

impl Carrier {
    pub fn from_text(s: impl Into<String>) -> Payload {
        Arc::new(Carrier::Text(s.into()))
    }

    pub fn empty() -> Payload {
        Arc::new(Carrier::Text(String::new()))
    }

    pub fn from_json(value: serde_json::Value) -> Payload {
        Arc::new(Carrier::Json(value))
    }

    pub fn from_vector(v: Vec<f32>) -> Payload {
        Arc::new(Carrier::Vector(v))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Carrier::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Carrier::Text(s) => s.is_empty(),
            Carrier::Json(j) => j.is_null(),
            Carrier::Vector(v) => v.is_empty(),
        }
    }
}

impl DataCarrier for Carrier {
    fn text(&self) -> String {
        match self {
            Carrier::Text(s) => s.clone(),
            Carrier::Json(j) => j.to_string(),
            Carrier::Vector(v) => format!("{:?}", v),
        }
    }

    fn json(&self) -> Vec<u8> {
        let encoded = match self {
            Carrier::Text(s) => serde_json::to_vec(s),
            Carrier::Json(j) => serde_json::to_vec(j),
            Carrier::Vector(v) => serde_json::to_vec(v),
        };
        encoded.unwrap_or_default()
    }

    fn vector(&self) -> Option<&[f32]> {
        match self {
            Carrier::Vector(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

impl From<String> for Carrier {
    fn from(s: String) -> Self {
        Carrier::Text(s)
    }
}

impl From<&str> for Carrier {
    fn from(s: &str) -> Self {
        Carrier::Text(s.to_string())
    }
}

impl From<serde_json::Value> for Carrier {
    fn from(j: serde_json::Value) -> Self {
        Carrier::Json(j)
    }
}

impl From<Vec<f32>> for Carrier {
    fn from(v: Vec<f32>) -> Self {
        Carrier::Vector(v)
    }
}

//! Ways to split a task into parts and merge the parts' results back.

use relaycore::{NodeError, NodeSpec, WorkflowError};
use std::sync::Arc;

/// Splits a task's text into independent parts.
pub type PartitionFn = Arc<dyn Fn(&str) -> Result<Vec<String>, NodeError> + Send + Sync>;

/// Merges the parts' results, given in part order.
pub type IntegrateFn = Arc<dyn Fn(&[String]) -> Result<String, NodeError> + Send + Sync>;

/// Character limit per chunk for the paragraph strategy.
pub const DEFAULT_MAX_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionStrategy {
    /// Split on blank lines, then cut paragraphs longer than `max_chars`.
    Paragraphs { max_chars: usize },
    /// Groups of `group` sentences split on ". ".
    Sentences { group: usize },
    /// Split before every "# " heading that starts a line.
    Sections,
    /// Two halves by character count.
    Halves,
    /// Chunks of `size` characters.
    Fixed { size: usize },
}

impl PartitionStrategy {
    pub const NAMES: &'static [&'static str] = &["paragraph", "sentence", "section", "halves", "fixed"];

    /// Reads `strategy` plus its parameters (`max_chars`, `group`, `size`).
    pub fn from_spec(spec: &NodeSpec) -> Result<Self, WorkflowError> {
        let invalid = |reason: String| WorkflowError::InvalidConfig {
            node: spec.id.clone(),
            reason,
        };
        let name = spec.config_str("strategy").unwrap_or("paragraph");
        let positive = |key: &str, default: usize| -> Result<usize, WorkflowError> {
            match spec.config_u64(key) {
                None => Ok(default),
                Some(0) => Err(invalid(format!("'{key}' must be positive"))),
                Some(n) => Ok(n as usize),
            }
        };

        match name {
            "paragraph" => Ok(Self::Paragraphs {
                max_chars: positive("max_chars", DEFAULT_MAX_CHARS)?,
            }),
            "sentence" => Ok(Self::Sentences {
                group: positive("group", 3)?,
            }),
            "section" => Ok(Self::Sections),
            "halves" => Ok(Self::Halves),
            "fixed" => Ok(Self::Fixed {
                size: positive("size", DEFAULT_MAX_CHARS)?,
            }),
            other => Err(invalid(format!("unknown partition strategy '{other}'"))),
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        match *self {
            Self::Paragraphs { max_chars } => split_paragraphs(text, max_chars),
            Self::Sentences { group } => split_sentences(text, group),
            Self::Sections => split_sections(text),
            Self::Halves => split_halves(text),
            Self::Fixed { size } => chunk_chars(text, size),
        }
    }

    pub fn into_fn(self) -> PartitionFn {
        Arc::new(move |text: &str| -> Result<Vec<String>, NodeError> { Ok(self.split(text)) })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationStrategy {
    /// Join with newlines.
    Lines,
    /// Plain concatenation.
    Concat,
}

impl IntegrationStrategy {
    pub fn from_spec(spec: &NodeSpec) -> Result<Self, WorkflowError> {
        match spec.config_str("merge").unwrap_or("lines") {
            "lines" => Ok(Self::Lines),
            "concat" => Ok(Self::Concat),
            other => Err(WorkflowError::InvalidConfig {
                node: spec.id.clone(),
                reason: format!("unknown merge strategy '{other}'"),
            }),
        }
    }

    pub fn join(&self, parts: &[String]) -> String {
        match self {
            Self::Lines => parts.join("\n"),
            Self::Concat => parts.concat(),
        }
    }

    pub fn into_fn(self) -> IntegrateFn {
        Arc::new(move |parts: &[String]| -> Result<String, NodeError> { Ok(self.join(parts)) })
    }
}

pub fn split_paragraphs(text: &str, max_chars: usize) -> Vec<String> {
    text.split("\n\n")
        .flat_map(|paragraph| {
            if paragraph.chars().count() > max_chars {
                chunk_chars(paragraph, max_chars)
            } else {
                vec![paragraph.to_string()]
            }
        })
        .collect()
}

pub fn split_sentences(text: &str, group: usize) -> Vec<String> {
    let sentences: Vec<&str> = text.split(". ").collect();
    sentences
        .chunks(group.max(1))
        .map(|chunk| chunk.join(". "))
        .collect()
}

pub fn split_sections(text: &str) -> Vec<String> {
    text.split("\n# ")
        .enumerate()
        .map(|(i, section)| {
            if i == 0 {
                section.to_string()
            } else {
                format!("# {section}")
            }
        })
        .collect()
}

pub fn split_halves(text: &str) -> Vec<String> {
    let mid = text.chars().count() / 2;
    let at = text
        .char_indices()
        .nth(mid)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    let (first, second) = text.split_at(at);
    vec![first.to_string(), second.to_string()]
}

/// Cuts `text` into pieces of at most `size` characters.
pub fn chunk_chars(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

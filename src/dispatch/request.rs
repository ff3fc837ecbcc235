//! Dispatch requests and payload normalization.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dispatch::strategy::{ConfigOverrides, Mode};

/// One turn of a chat transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// The payload shapes callers may hand the dispatcher.
#[derive(Debug, Clone)]
pub enum RequestPayload {
    /// A plain prompt or query.
    Text(String),
    /// A chat transcript; the last user turn is the effective input.
    Messages(Vec<ChatTurn>),
    /// A structured map with `content` and optional `file_path`,
    /// `file_paths`, `workspace` fields.
    Structured(serde_json::Value),
}

impl RequestPayload {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }
}

/// A dispatch request.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Mode override; `None` uses the dispatcher's current mode.
    pub mode: Option<Mode>,
    pub payload: RequestPayload,
    pub overrides: ConfigOverrides,
}

impl DispatchRequest {
    pub fn new(mode: Mode, payload: RequestPayload) -> Self {
        Self {
            mode: Some(mode),
            payload,
            overrides: ConfigOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Payload reduced to the shape workers consume.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NormalizedInput {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

/// Reduce any payload shape to a `NormalizedInput`.
///
/// Message lists contribute their last user turn; structured maps their
/// `content` field. An empty extraction is replaced by a single space so
/// downstream prompt building never sees an empty string.
pub fn normalize(payload: &RequestPayload) -> NormalizedInput {
    let mut input = match payload {
        RequestPayload::Text(text) => NormalizedInput {
            text: text.clone(),
            ..Default::default()
        },
        RequestPayload::Messages(turns) => {
            let text = turns
                .iter()
                .rev()
                .find(|t| t.role == "user" && !t.content.is_empty())
                .map(|t| t.content.clone())
                .unwrap_or_default();
            NormalizedInput {
                text,
                ..Default::default()
            }
        }
        RequestPayload::Structured(map) => {
            let text = map
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let file = map
                .get("file_path")
                .and_then(|v| v.as_str())
                .map(PathBuf::from);
            let files = map
                .get("file_paths")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str())
                        .map(PathBuf::from)
                        .collect()
                })
                .unwrap_or_default();
            let workspace = map
                .get("workspace")
                .and_then(|v| v.as_str())
                .map(String::from);
            NormalizedInput {
                text,
                file,
                files,
                workspace,
            }
        }
    };

    if input.text.trim().is_empty() {
        debug!("Empty input after normalization, substituting a single space");
        input.text = " ".to_string();
    }
    input
}

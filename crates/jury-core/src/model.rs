//! Model client abstraction.
//!
//! The engine never talks to a provider directly. An external factory hands
//! it a [`ModelRegistry`] of [`ModelClient`]s keyed by model ID; transport,
//! auth and timeouts are the client's concern.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::ModelError;

/// A callable model identified by a string ID.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Stable model identifier.
    fn id(&self) -> &str;

    /// Send `prompt` and return the raw structured reply.
    ///
    /// A client that enforces a deadline reports it as
    /// [`ModelError::Timeout`].
    async fn invoke(&self, prompt: &str) -> Result<serde_json::Value, ModelError>;

    /// Embed `texts`. Clients without an embedding endpoint keep the default.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        let _ = texts;
        Err(ModelError::Unsupported {
            model_id: self.id().to_string(),
            operation: "embed".to_string(),
        })
    }
}

/// Parse a raw model reply into the expected response shape.
///
/// Structured replies are decoded directly. Text replies are decoded as JSON,
/// tolerating a surrounding Markdown code fence.
pub fn parse_response<T: DeserializeOwned>(
    model_id: &str,
    raw: serde_json::Value,
) -> Result<T, ModelError> {
    let text = match &raw {
        serde_json::Value::String(s) => Some(s.clone()),
        _ => None,
    };

    match serde_json::from_value::<T>(raw) {
        Ok(value) => Ok(value),
        Err(direct) => match text {
            Some(text) => serde_json::from_str::<T>(strip_code_fence(&text)).map_err(|e| {
                ModelError::Parse {
                    model_id: model_id.to_string(),
                    message: e.to_string(),
                }
            }),
            None => Err(ModelError::Parse {
                model_id: model_id.to_string(),
                message: direct.to_string(),
            }),
        },
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Static set of model clients keyed by model ID.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    clients: HashMap<String, Arc<dyn ModelClient>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under its own ID, replacing any previous one.
    pub fn register(&mut self, client: Arc<dyn ModelClient>) {
        self.clients.insert(client.id().to_string(), client);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.register(client);
        self
    }

    pub fn get(&self, model_id: &str) -> Option<Arc<dyn ModelClient>> {
        self.clients.get(model_id).cloned()
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.clients.contains_key(model_id)
    }

    /// Registered IDs, sorted for deterministic iteration.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clients.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.ids())
            .finish()
    }
}

impl FromIterator<Arc<dyn ModelClient>> for ModelRegistry {
    fn from_iter<I: IntoIterator<Item = Arc<dyn ModelClient>>>(iter: I) -> Self {
        let mut registry = ModelRegistry::new();
        for client in iter {
            registry.register(client);
        }
        registry
    }
}

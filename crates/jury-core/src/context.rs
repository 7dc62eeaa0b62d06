//! Execution contexts handed to listeners.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::result::{ModelResult, Scored};

/// Metadata for one multi-model dispatch, built before any model runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchExecutionContext {
    pub metric_name: String,
    pub model_ids: Vec<String>,
    pub prompt: String,
}

impl BatchExecutionContext {
    pub fn new(
        metric_name: impl Into<String>,
        model_ids: Vec<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            metric_name: metric_name.into(),
            model_ids,
            prompt: prompt.into(),
        }
    }
}

/// Metadata for a single model invocation within a batch.
///
/// Every construction mints a fresh execution ID, so a retried call gets a
/// new ID. `started_at` is fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelExecutionContext {
    execution_id: Uuid,
    model_id: String,
    metric_name: String,
    prompt: String,
    started_at: DateTime<Utc>,
    metadata: BTreeMap<String, serde_json::Value>,
}

impl ModelExecutionContext {
    pub fn new(
        model_id: impl Into<String>,
        metric_name: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            model_id: model_id.into(),
            metric_name: metric_name.into(),
            prompt: prompt.into(),
            started_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Return a copy carrying one more metadata entry. `self` is unchanged.
    pub fn with_metadata(&self, key: impl Into<String>, value: serde_json::Value) -> Self {
        let mut next = self.clone();
        next.metadata.insert(key.into(), value);
        next
    }

    /// Return a copy carrying every entry of `extra` (later keys win).
    pub fn with_metadata_map(&self, extra: &BTreeMap<String, serde_json::Value>) -> Self {
        let mut next = self.clone();
        next.metadata
            .extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        next
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }
}

/// Per-model payload of the `after_execution` callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelExecutionResult {
    pub context: ModelExecutionContext,
    pub result: ModelResult<Scored<()>>,
}

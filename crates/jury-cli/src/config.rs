//! Panel configuration files.
//!
//! A panel file lists scripted judge models and the executor tunables. JSON
//! and TOML are both accepted, chosen by file extension:
//!
//! ```toml
//! [executor]
//! max_concurrency = 4
//! default_aggregator = { type = "median" }
//!
//! [[models]]
//! id = "judge-a"
//! delay_ms = 120
//! behavior = { type = "reply", value = { score = 0.8 } }
//! ```

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use jury_core::{ExecutorConfig, ModelRegistry, ScriptedModelSpec};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JuryConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    pub models: Vec<ScriptedModelSpec>,
}

impl JuryConfig {
    /// Read and validate a panel file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;

        let config: JuryConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&raw)
                .with_context(|| format!("Invalid TOML in {}", path.display()))?,
            Some("json") | None => serde_json::from_str(&raw)
                .with_context(|| format!("Invalid JSON in {}", path.display()))?,
            Some(other) => bail!("Unsupported config extension '.{other}' (use .json or .toml)"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            bail!("Config declares no models");
        }
        let mut seen = HashSet::new();
        for model in &self.models {
            if !seen.insert(model.id.as_str()) {
                bail!("Duplicate model id '{}'", model.id);
            }
        }
        self.executor
            .validate()
            .context("Invalid executor settings")?;
        Ok(())
    }

    /// Model IDs in declaration order.
    pub fn model_ids(&self) -> Vec<String> {
        self.models.iter().map(|m| m.id.clone()).collect()
    }

    pub fn registry(&self) -> ModelRegistry {
        self.models
            .iter()
            .map(|spec| spec.build().into_client())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jury_core::{ScoreAggregator, ScriptedBehavior};
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_toml_panel() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "panel.toml",
            r#"
[executor]
max_concurrency = 2
default_aggregator = { type = "consensus", tolerance = 0.2 }

[[models]]
id = "judge-a"
delay_ms = 50
behavior = { type = "reply", value = { score = 0.8 } }

[[models]]
id = "judge-b"
behavior = { type = "fail", message = "quota exhausted" }
"#,
        );

        let config = JuryConfig::load(&path).unwrap();
        assert_eq!(config.executor.max_concurrency, Some(2));
        assert_eq!(
            config.executor.default_aggregator,
            ScoreAggregator::consensus(0.2)
        );
        assert_eq!(config.model_ids(), vec!["judge-a", "judge-b"]);
        assert_eq!(
            config.models[1].behavior,
            ScriptedBehavior::Fail {
                message: "quota exhausted".to_string()
            }
        );
        assert_eq!(config.registry().len(), 2);
    }

    #[test]
    fn loads_json_panel_with_default_executor() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "panel.json",
            r#"{ "models": [ { "id": "solo", "behavior": { "type": "timeout" } } ] }"#,
        );
        let config = JuryConfig::load(&path).unwrap();
        assert_eq!(config.executor, ExecutorConfig::default());
        assert_eq!(config.models[0].behavior, ScriptedBehavior::Timeout);
    }

    #[test]
    fn rejects_duplicate_ids_and_empty_panels() {
        let dir = tempfile::tempdir().unwrap();
        let dup = write_file(
            &dir,
            "dup.json",
            r#"{ "models": [
                { "id": "x", "behavior": { "type": "timeout" } },
                { "id": "x", "behavior": { "type": "timeout" } }
            ] }"#,
        );
        let err = JuryConfig::load(&dup).unwrap_err();
        assert!(err.to_string().contains("Duplicate model id"));

        let empty = write_file(&dir, "empty.json", r#"{ "models": [] }"#);
        assert!(JuryConfig::load(&empty).is_err());
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "panel.yaml", "models: []");
        let err = JuryConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains(".yaml"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "panel.json",
            r#"{ "executor": { "max_concurrency": 0 },
                 "models": [ { "id": "a", "behavior": { "type": "timeout" } } ] }"#,
        );
        assert!(JuryConfig::load(&path).is_err());
    }
}

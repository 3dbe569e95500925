//! Container-side settings and the fixed `/opt/ml` directory layout.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::channels::ChannelKind;
use crate::document::atomic_write_json;
use crate::error::{Error, Result};

pub const DEFAULT_PREFIX: &str = "MLDOCK";
pub const DEFAULT_BASE_DIR: &str = "/opt/ml";
pub const DEFAULT_HYPERPARAMETERS_FILE: &str = "hyperparameters.json";

/// Settings read once from the environment map handed to the container hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSettings {
    pub prefix: String,
    pub base_dir: PathBuf,
    /// Input directory name relative to `base_dir`.
    pub input_dir: String,
    pub stage: Option<String>,
    /// Raw JSON object from `<PREFIX>_HYPERPARAMETERS`.
    pub hyperparameters: Option<String>,
    pub hyperparameters_file: String,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.into(),
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            input_dir: "input".into(),
            stage: None,
            hyperparameters: None,
            hyperparameters_file: DEFAULT_HYPERPARAMETERS_FILE.into(),
        }
    }
}

impl ContainerSettings {
    pub fn from_env(env: &BTreeMap<String, String>) -> Self {
        Self::from_env_with_prefix(env, DEFAULT_PREFIX)
    }

    pub fn from_env_with_prefix(env: &BTreeMap<String, String>, prefix: &str) -> Self {
        let get = |name: &str| {
            env.get(&format!("{prefix}_{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();
        Self {
            prefix: prefix.to_string(),
            base_dir: get("BASE_DIR").map(PathBuf::from).unwrap_or(defaults.base_dir),
            input_dir: get("INPUT_DIR").unwrap_or(defaults.input_dir),
            stage: get("STAGE"),
            hyperparameters: get("HYPERPARAMETERS"),
            hyperparameters_file: defaults.hyperparameters_file,
        }
    }

    pub fn layout(&self) -> ContainerLayout {
        ContainerLayout {
            base_dir: self.base_dir.clone(),
            input_dir: self.input_dir.clone(),
            hyperparameters_file: self.hyperparameters_file.clone(),
        }
    }

    /// Whether remote channel sync is enabled for this stage.
    pub fn is_prod(&self) -> bool {
        self.stage.as_deref() == Some("prod")
    }
}

/// Process environment with a `.env` file (if present) layered underneath.
/// The process environment itself is never modified.
pub fn load_environment(dotenv_path: Option<&Path>) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    if let Some(path) = dotenv_path.filter(|p| p.is_file()) {
        let iter = dotenv::from_path_iter(path)
            .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
        for item in iter {
            let (k, v) =
                item.map_err(|e| Error::msg(format!("failed to parse {}: {e}", path.display())))?;
            env.insert(k, v);
        }
        tracing::debug!(path = %path.display(), count = env.len(), "loaded dotenv file");
    }
    env.extend(std::env::vars());
    Ok(env)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLayout {
    pub base_dir: PathBuf,
    pub input_dir: String,
    pub hyperparameters_file: String,
}

impl ContainerLayout {
    pub fn input_dir(&self) -> PathBuf {
        self.base_dir.join(&self.input_dir)
    }

    pub fn input_data_dir(&self) -> PathBuf {
        self.input_dir().join("data")
    }

    pub fn input_config_dir(&self) -> PathBuf {
        self.input_dir().join("config")
    }

    pub fn model_dir(&self) -> PathBuf {
        self.base_dir.join("model")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.base_dir.join("output")
    }

    pub fn hyperparameters_path(&self) -> PathBuf {
        self.input_config_dir().join(&self.hyperparameters_file)
    }

    pub fn failure_path(&self) -> PathBuf {
        self.output_dir().join("failure")
    }

    /// Base directory holding the per-channel directories of `kind`.
    pub fn channel_base(&self, kind: ChannelKind) -> PathBuf {
        match kind {
            ChannelKind::InputData => self.input_data_dir(),
            ChannelKind::OutputData => self.output_dir(),
            ChannelKind::ModelInput | ChannelKind::ModelOutput => self.model_dir(),
        }
    }

    /// Create the layout and seed an empty hyperparameters file.
    pub fn prepare(&self) -> Result<()> {
        tracing::debug!(base = %self.base_dir.display(), "preparing container layout");
        for dir in [
            self.input_data_dir(),
            self.input_config_dir(),
            self.model_dir(),
            self.output_dir(),
        ] {
            fs::create_dir_all(&dir)
                .map_err(|e| Error::msg(format!("failed to create {}: {e}", dir.display())))?;
        }
        let hp = self.hyperparameters_path();
        if !hp.exists() {
            atomic_write_json(&hp, &Value::Object(Map::new()))?;
        }
        Ok(())
    }

    pub fn read_hyperparameters(&self) -> Result<Map<String, Value>> {
        let path = self.hyperparameters_path();
        if !path.exists() {
            return Ok(Map::new());
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
        match serde_json::from_str::<Value>(&raw)
            .map_err(|e| Error::msg(format!("failed to parse {}: {e}", path.display())))?
        {
            Value::Object(map) => Ok(map),
            _ => Err(Error::msg(format!(
                "{} must contain a JSON object",
                path.display()
            ))),
        }
    }

    /// Shallow-merge `overrides` (a JSON object) into the hyperparameters file.
    pub fn setup_hyperparameters(&self, overrides: Option<&str>) -> Result<Map<String, Value>> {
        let mut current = self.read_hyperparameters()?;
        if let Some(raw) = overrides {
            let parsed: Value = serde_json::from_str(raw)
                .map_err(|e| Error::msg(format!("invalid hyperparameters JSON: {e}")))?;
            let Value::Object(map) = parsed else {
                return Err(Error::msg("hyperparameters must be a JSON object"));
            };
            current.extend(map);
        }
        atomic_write_json(&self.hyperparameters_path(), &Value::Object(current.clone()))?;
        Ok(current)
    }
}

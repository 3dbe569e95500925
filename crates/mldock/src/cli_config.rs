//! User-level CLI configuration: local auth, environment overrides, remotes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document;
use crate::error::{Error, Result};
use crate::storage::scheme::scheme_of;

pub const CONFIG_ENV: &str = "MLDOCK_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    Gcloud,
    Awscli,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<AuthType>,
    #[serde(default)]
    pub environment: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub environment: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplatesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAlias {
    pub name: String,
    /// Scheme of `path`: `s3`, `gs`, or empty for a local directory.
    #[serde(rename = "type", default)]
    pub kind: String,
    pub path: String,
}

impl RemoteAlias {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: name.into(),
            kind: scheme_of(&path).to_ascii_lowercase(),
            path,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub remotes: Vec<RemoteAlias>,
}

impl CliConfig {
    /// Add `remote`; an existing name is an error unless `update` is set.
    pub fn add_remote(&mut self, remote: RemoteAlias, update: bool) -> Result<()> {
        match self.remotes.iter().position(|r| r.name == remote.name) {
            Some(idx) if update => {
                self.remotes[idx] = remote;
                Ok(())
            }
            Some(_) => Err(Error::DuplicateRemote { name: remote.name }),
            None => {
                self.remotes.push(remote);
                Ok(())
            }
        }
    }

    pub fn remove_remote(&mut self, name: &str) -> Result<RemoteAlias> {
        let idx = self
            .remotes
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| Error::RemoteNotFound {
                name: name.to_string(),
            })?;
        Ok(self.remotes.remove(idx))
    }

    pub fn remote(&self, name: &str) -> Result<&RemoteAlias> {
        self.remotes
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::RemoteNotFound {
                name: name.to_string(),
            })
    }
}

/// Where the CLI config lives: an explicit path, `MLDOCK_CONFIG`, or
/// `<user config dir>/mldock/config.json`.
pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Some(p) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(p));
    }
    let base = dirs::config_dir()
        .ok_or_else(|| Error::msg(format!("could not determine a user config directory; set {CONFIG_ENV}")))?;
    Ok(base.join("mldock").join("config.json"))
}

/// A loaded CLI config bound to its file.
#[derive(Debug, Clone)]
pub struct CliConfigDoc {
    path: PathBuf,
    pub config: CliConfig,
}

impl CliConfigDoc {
    pub fn load(path: &Path, create_if_missing: bool) -> Result<Self> {
        let config = document::load(path, create_if_missing, "run `mldock configure init` first")?;
        Ok(Self {
            path: path.to_path_buf(),
            config,
        })
    }

    /// Load for read-only use; a missing file is an empty config.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path, false);
        }
        Ok(Self {
            path: path.to_path_buf(),
            config: CliConfig::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self) -> Result<()> {
        document::write(&self.path, &self.config)
    }
}

//! The project document, `mldock.json`, at the root of a container project.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document;
use crate::error::{Error, Result};
use crate::manifest::{AssetGroup, AssetManifest, AssetManifestEntry};

pub const PROJECT_FILE: &str = "mldock.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mldock_module_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements_dir: Option<String>,
    #[serde(default)]
    pub data: Vec<AssetManifestEntry>,
    #[serde(default)]
    pub model: Vec<AssetManifestEntry>,
    #[serde(default)]
    pub hyperparameters: Map<String, Value>,
    #[serde(default)]
    pub environment: Map<String, Value>,
    #[serde(default)]
    pub stages: BTreeMap<String, StageConfig>,
    /// Keys this version does not model; kept on round-trip.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A loaded project document bound to its directory.
#[derive(Debug, Clone)]
pub struct ProjectDoc {
    dir: PathBuf,
    config: ProjectConfig,
}

fn init_remedy(dir: &Path) -> String {
    format!(
        "run `mldock project init --dir {}` to create one",
        dir.display()
    )
}

impl ProjectDoc {
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(PROJECT_FILE)
    }

    pub fn load(dir: &Path, create_if_missing: bool) -> Result<Self> {
        let config = document::load(&Self::path_in(dir), create_if_missing, &init_remedy(dir))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            config,
        })
    }

    /// Create the document if needed and the project's asset directories.
    pub fn init(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .map_err(|e| Error::msg(format!("failed to create {}: {e}", dir.display())))?;
        let doc = Self::load(dir, true)?;
        for sub in ["config", "data", "model", "output"] {
            let p = dir.join(sub);
            fs::create_dir_all(&p)
                .map_err(|e| Error::msg(format!("failed to create {}: {e}", p.display())))?;
        }
        Ok(doc)
    }

    pub fn write(&self) -> Result<()> {
        document::write(&self.path(), &self.config)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        Self::path_in(&self.dir)
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Configured image name, or the project directory's name.
    pub fn image_name(&self) -> String {
        if let Some(name) = self.config.image_name.as_deref().filter(|s| !s.is_empty()) {
            return name.to_string();
        }
        let dir = fs::canonicalize(&self.dir).unwrap_or_else(|_| self.dir.clone());
        dir.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "mldock".to_string())
    }

    pub fn manifest(&self, group: AssetGroup) -> AssetManifest {
        let entries = match group {
            AssetGroup::Datasets => self.config.data.clone(),
            AssetGroup::Models => self.config.model.clone(),
        };
        AssetManifest::new(group, entries)
    }

    pub fn update_manifest(&mut self, manifest: AssetManifest) {
        match manifest.group() {
            AssetGroup::Datasets => self.update_data(manifest.into_entries()),
            AssetGroup::Models => self.update_model(manifest.into_entries()),
        }
    }

    pub fn data(&self) -> &[AssetManifestEntry] {
        &self.config.data
    }

    pub fn model(&self) -> &[AssetManifestEntry] {
        &self.config.model
    }

    pub fn hyperparameters(&self) -> &Map<String, Value> {
        &self.config.hyperparameters
    }

    pub fn environment(&self) -> &Map<String, Value> {
        &self.config.environment
    }

    pub fn stages(&self) -> &BTreeMap<String, StageConfig> {
        &self.config.stages
    }

    pub fn update_data(&mut self, data: Vec<AssetManifestEntry>) {
        self.config.data = data;
    }

    pub fn update_model(&mut self, model: Vec<AssetManifestEntry>) {
        self.config.model = model;
    }

    pub fn update_hyperparameters(&mut self, hyperparameters: Map<String, Value>) {
        self.config.hyperparameters = hyperparameters;
    }

    pub fn update_environment(&mut self, environment: Map<String, Value>) {
        self.config.environment = environment;
    }

    pub fn update_stages(&mut self, stages: BTreeMap<String, StageConfig>) {
        self.config.stages = stages;
    }

    pub fn update_image_name(&mut self, image_name: Option<String>) {
        self.config.image_name = image_name;
    }

    pub fn update_template(&mut self, template: Option<String>) {
        self.config.template = template;
    }

    pub fn update_dirs(
        &mut self,
        mldock_module_dir: Option<String>,
        container_dir: Option<String>,
        requirements_dir: Option<String>,
    ) {
        if mldock_module_dir.is_some() {
            self.config.mldock_module_dir = mldock_module_dir;
        }
        if container_dir.is_some() {
            self.config.container_dir = container_dir;
        }
        if requirements_dir.is_some() {
            self.config.requirements_dir = requirements_dir;
        }
    }

    /// Docker tag for a named stage.
    pub fn stage_tag(&self, stage: &str) -> Result<String> {
        self.config
            .stages
            .get(stage)
            .map(|s| s.tag.clone())
            .ok_or_else(|| {
                let known: Vec<&str> = self.config.stages.keys().map(String::as_str).collect();
                Error::msg(format!(
                    "stage '{stage}' is not defined (known stages: {}); \
                     run `mldock stages set --name {stage} --tag <tag>` first",
                    if known.is_empty() {
                        "none".to_string()
                    } else {
                        known.join(", ")
                    }
                ))
            })
    }
}

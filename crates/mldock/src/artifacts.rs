//! Channel sync hooks run at container startup and shutdown.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::channels::{Channel, ChannelKind, Direction, discover_channels};
use crate::container::ContainerSettings;
use crate::error::{Error, Result};
use crate::storage::{BackendSettings, resolve_with};
use crate::transfer::{self, TransferReport};

/// Moves a channel's files between a URI and a local directory.
pub trait AssetTransport {
    fn download_assets(&self, uri: &str, local_dir: &Path) -> Result<TransferReport>;
    fn upload_assets(&self, uri: &str, local_dir: &Path, archive: bool) -> Result<TransferReport>;
}

/// Transport that resolves each URI to a backend by scheme.
#[derive(Debug, Clone, Default)]
pub struct SchemeTransport {
    settings: BackendSettings,
}

impl SchemeTransport {
    pub fn new(settings: BackendSettings) -> Self {
        Self { settings }
    }
}

impl AssetTransport for SchemeTransport {
    fn download_assets(&self, uri: &str, local_dir: &Path) -> Result<TransferReport> {
        let (handle, base) = resolve_with(uri, &self.settings)?;
        transfer::download(&handle, &base, ".", local_dir)
    }

    fn upload_assets(&self, uri: &str, local_dir: &Path, archive: bool) -> Result<TransferReport> {
        let (handle, base) = resolve_with(uri, &self.settings)?;
        transfer::upload(&handle, &base, local_dir, ".", archive)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Keys of channels that were transferred.
    pub synced: Vec<String>,
    /// Keys of channels skipped because they were already in place (setup)
    /// or had nothing to upload (cleanup).
    pub skipped: Vec<String>,
}

impl SyncReport {
    fn absorb(&mut self, other: SyncReport) {
        self.synced.extend(other.synced);
        self.skipped.extend(other.skipped);
    }
}

// A bare key binds the kind's base directory, which `prepare` creates up
// front; only a populated base counts as present.
fn already_present(channel: &Channel) -> bool {
    let local = &channel.local_path;
    if !channel.name.is_empty() {
        return local.exists();
    }
    fs::read_dir(local)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

pub struct ArtifactManager<T: AssetTransport> {
    transport: T,
    settings: ContainerSettings,
    env: BTreeMap<String, String>,
}

impl ArtifactManager<SchemeTransport> {
    /// Manager over `env` with backends configured from the same map.
    pub fn from_env(env: BTreeMap<String, String>) -> Self {
        let settings = ContainerSettings::from_env(&env);
        let transport = SchemeTransport::new(BackendSettings::from_env(&env));
        Self::new(transport, settings, env)
    }
}

impl<T: AssetTransport> ArtifactManager<T> {
    pub fn new(transport: T, settings: ContainerSettings, env: BTreeMap<String, String>) -> Self {
        Self {
            transport,
            settings,
            env,
        }
    }

    pub fn settings(&self) -> &ContainerSettings {
        &self.settings
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Download input-data channels into `input/data/<name>`.
    pub fn setup_inputs(&self) -> Result<SyncReport> {
        self.sync(ChannelKind::InputData)
    }

    /// Download model-input channels into `model/<name>`.
    pub fn setup_model_artifacts(&self) -> Result<SyncReport> {
        self.sync(ChannelKind::ModelInput)
    }

    /// Upload `output/<name>` to each output channel, archived.
    pub fn cleanup_outputs(&self) -> Result<SyncReport> {
        self.sync(ChannelKind::OutputData)
    }

    /// Upload `model/<name>` to each model-output channel, archived.
    pub fn cleanup_model_artifacts(&self) -> Result<SyncReport> {
        self.sync(ChannelKind::ModelOutput)
    }

    /// Every setup hook, in startup order.
    pub fn setup_all(&self) -> Result<SyncReport> {
        let mut report = self.setup_inputs()?;
        report.absorb(self.setup_model_artifacts()?);
        Ok(report)
    }

    fn sync(&self, kind: ChannelKind) -> Result<SyncReport> {
        let channels = discover_channels(&self.env, kind, &self.settings)?;
        if channels.is_empty() {
            tracing::debug!(kind = %kind, "no channels declared in environment");
        }

        let mut report = SyncReport::default();
        for channel in channels {
            let local = &channel.local_path;
            match channel.direction {
                Direction::Input => {
                    if already_present(&channel) {
                        tracing::debug!(key = %channel.key, path = %local.display(), "channel skipped, already exists");
                        report.skipped.push(channel.key);
                        continue;
                    }
                    let r = self.transport.download_assets(&channel.remote_uri, local)?;
                    tracing::info!(key = %channel.key, files = r.transferred.len(), "channel downloaded");
                }
                Direction::Output => {
                    if !local.is_dir() {
                        tracing::debug!(key = %channel.key, path = %local.display(), "channel skipped, not a directory or could not be found");
                        report.skipped.push(channel.key);
                        continue;
                    }
                    match self.transport.upload_assets(&channel.remote_uri, local, true) {
                        Ok(r) => {
                            tracing::info!(key = %channel.key, files = r.transferred.len(), "channel uploaded");
                        }
                        Err(Error::SourceMissing { path }) => {
                            tracing::debug!(key = %channel.key, path = %path.display(), "channel skipped, source vanished");
                            report.skipped.push(channel.key);
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            report.synced.push(channel.key);
        }
        Ok(report)
    }
}

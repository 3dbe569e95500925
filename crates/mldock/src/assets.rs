//! Project-level dataset/model operations behind `mldock datasets|models`.

use std::path::PathBuf;

use crate::cli_config::CliConfig;
use crate::error::{Error, Result};
use crate::manifest::{AssetGroup, AssetManifestEntry};
use crate::project::ProjectDoc;
use crate::storage::{BackendSettings, join_remote, resolve_with};
use crate::transfer::{self, TransferReport};

/// Record a new manifest entry (or merge into an existing one with
/// `update`), then persist the project and its `.gitignore`.
pub fn create(
    project: &mut ProjectDoc,
    group: AssetGroup,
    entry: AssetManifestEntry,
    update: bool,
) -> Result<()> {
    let mut manifest = project.manifest(group);
    manifest.add(entry.with_defaults(), update)?;
    manifest.write_gitignore(project.dir())?;
    project.update_manifest(manifest);
    project.write()
}

/// Merge fields into an existing entry.
pub fn update(project: &mut ProjectDoc, group: AssetGroup, entry: AssetManifestEntry) -> Result<()> {
    let mut manifest = project.manifest(group);
    manifest.update(entry)?;
    manifest.write_gitignore(project.dir())?;
    project.update_manifest(manifest);
    project.write()
}

pub fn remove(
    project: &mut ProjectDoc,
    group: AssetGroup,
    channel: &str,
    filename: &str,
) -> Result<AssetManifestEntry> {
    let mut manifest = project.manifest(group);
    let removed = manifest.remove(channel, filename)?;
    manifest.write_gitignore(project.dir())?;
    project.update_manifest(manifest);
    project.write()?;
    Ok(removed)
}

/// Where an asset lives: local channel dir, resolved remote URI and subpath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetLocation {
    pub local_dir: PathBuf,
    pub remote_uri: String,
    pub remote_subpath: String,
    pub archive: bool,
}

pub fn locate(
    project: &ProjectDoc,
    cli: &CliConfig,
    group: AssetGroup,
    channel: &str,
    filename: &str,
) -> Result<AssetLocation> {
    let manifest = project.manifest(group);
    let entry = manifest.get(channel, filename)?;
    let remote_name = entry.remote.as_deref().ok_or_else(|| {
        Error::msg(format!(
            "{group} asset '{channel}/{filename}' has no remote; \
             run `mldock {group} update --channel {channel} --name {filename} --remote <name>`"
        ))
    })?;
    let remote = cli.remote(remote_name)?;
    let remote_path = entry.remote_path.as_deref().unwrap_or(&entry.channel);
    Ok(AssetLocation {
        local_dir: project.dir().join(group.dir_name()).join(&entry.channel),
        remote_uri: remote.path.clone(),
        remote_subpath: join_remote("", &[group.dir_name(), remote_path]),
        archive: entry.is_zipped(),
    })
}

pub fn push(
    project: &ProjectDoc,
    cli: &CliConfig,
    group: AssetGroup,
    channel: &str,
    filename: &str,
    settings: &BackendSettings,
) -> Result<TransferReport> {
    let loc = locate(project, cli, group, channel, filename)?;
    let (handle, base) = resolve_with(&loc.remote_uri, settings)?;
    tracing::info!(backend = %handle.backend(), remote = %loc.remote_uri, subpath = %loc.remote_subpath, "uploading {group} artifacts");
    transfer::upload(&handle, &base, &loc.local_dir, &loc.remote_subpath, loc.archive)
}

pub fn pull(
    project: &ProjectDoc,
    cli: &CliConfig,
    group: AssetGroup,
    channel: &str,
    filename: &str,
    settings: &BackendSettings,
) -> Result<TransferReport> {
    let loc = locate(project, cli, group, channel, filename)?;
    let (handle, base) = resolve_with(&loc.remote_uri, settings)?;
    tracing::info!(backend = %handle.backend(), remote = %loc.remote_uri, subpath = %loc.remote_subpath, "downloading {group} artifacts");
    transfer::download(&handle, &base, &loc.remote_subpath, &loc.local_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli_config::RemoteAlias;

    #[test]
    fn create_persists_entry_and_gitignore() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut project = ProjectDoc::init(tmp.path()).expect("init");
        create(
            &mut project,
            AssetGroup::Datasets,
            AssetManifestEntry::new("train", "data.csv"),
            false,
        )
        .expect("create");

        let reloaded = ProjectDoc::load(tmp.path(), false).expect("reload");
        assert_eq!(reloaded.data().len(), 1);
        assert_eq!(reloaded.data()[0].remote_path.as_deref(), Some("train"));
        let ignore = std::fs::read_to_string(tmp.path().join("data/.gitignore")).expect("gitignore");
        assert_eq!(ignore, "train/data.csv\n");
    }

    #[test]
    fn failed_duplicate_create_leaves_document_untouched() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut project = ProjectDoc::init(tmp.path()).expect("init");
        let entry = AssetManifestEntry::new("train", "data.csv");
        create(&mut project, AssetGroup::Datasets, entry.clone(), false).expect("create");
        let err = create(&mut project, AssetGroup::Datasets, entry, false).unwrap_err();
        assert!(matches!(err, Error::DuplicateAsset { .. }));
        let reloaded = ProjectDoc::load(tmp.path(), false).expect("reload");
        assert_eq!(reloaded.data().len(), 1);
    }

    #[test]
    fn locate_resolves_remote_alias() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut project = ProjectDoc::init(tmp.path()).expect("init");
        let mut entry = AssetManifestEntry::new("m1", "model.pkl");
        entry.remote = Some("origin".into());
        entry.remote_path = Some("v2/m1".into());
        create(&mut project, AssetGroup::Models, entry, false).expect("create");

        let mut cli = CliConfig::default();
        cli.add_remote(RemoteAlias::new("origin", "s3://bucket/root"), false)
            .expect("remote");
        let loc = locate(&project, &cli, AssetGroup::Models, "m1", "model.pkl").expect("locate");
        assert_eq!(loc.remote_uri, "s3://bucket/root");
        assert_eq!(loc.remote_subpath, "model/v2/m1");
        assert_eq!(loc.local_dir, tmp.path().join("model/m1"));
        assert!(!loc.archive);
    }

    #[test]
    fn locate_without_remote_explains_fix() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut project = ProjectDoc::init(tmp.path()).expect("init");
        create(
            &mut project,
            AssetGroup::Datasets,
            AssetManifestEntry::new("train", "x.csv"),
            false,
        )
        .expect("create");
        let err = locate(&project, &CliConfig::default(), AssetGroup::Datasets, "train", "x.csv")
            .unwrap_err();
        assert!(err.to_string().contains("--remote"), "{err}");
    }
}

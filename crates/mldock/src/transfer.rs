//! Directory-tree upload and download through a resolved storage handle.

use std::path::{Path, PathBuf};

use crate::archive::{self, ArchiveKind};
use crate::error::{Error, Result};
use crate::storage::{StorageHandle, join_remote};

/// Name of the archive produced by archived uploads.
pub const ARCHIVE_NAME: &str = "artifacts.zip";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Destination of every file moved, in transfer order.
    pub transferred: Vec<String>,
    /// Archives that were unpacked and removed after download.
    pub extracted: Vec<PathBuf>,
}

impl TransferReport {
    pub fn is_empty(&self) -> bool {
        self.transferred.is_empty()
    }
}

fn base_name(path: &str) -> Option<&str> {
    path.trim_end_matches('/')
        .rsplit(['/', std::path::MAIN_SEPARATOR])
        .next()
        .filter(|s| !s.is_empty())
}

fn local_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::msg(format!("walkdir error: {e}")))?;
        if entry.file_type().is_file() {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

/// Upload every file below `local_dir` to `remote_base/remote_subpath/<file name>`.
///
/// Nested directories are flattened. With `archive`, the directory is first
/// zipped into a scratch directory and only `artifacts.zip` is uploaded.
pub fn upload(
    handle: &StorageHandle,
    remote_base: &str,
    local_dir: &Path,
    remote_subpath: &str,
    archive: bool,
) -> Result<TransferReport> {
    if !local_dir.is_dir() {
        return Err(Error::SourceMissing {
            path: local_dir.to_path_buf(),
        });
    }

    // Dropped on every return path, removing the staged archive with it.
    let staging = if archive {
        let dir = tempfile::Builder::new()
            .prefix("mldock-archive-")
            .tempdir()
            .map_err(|e| Error::msg(format!("failed to create staging dir: {e}")))?;
        archive::zip_dir(local_dir, &dir.path().join(ARCHIVE_NAME))?;
        Some(dir)
    } else {
        None
    };
    let source = staging.as_ref().map(|d| d.path()).unwrap_or(local_dir);

    let store = handle.store();
    let mut report = TransferReport::default();
    for file in local_files(source)? {
        let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
            tracing::warn!(path = %file.display(), "skipping file with non-utf8 name");
            continue;
        };
        let dst = join_remote(remote_base, &[remote_subpath, name]);
        tracing::debug!(backend = %handle.backend(), src = %file.display(), dst = %dst, "upload");
        store.put_file(&file, &dst)?;
        report.transferred.push(dst);
    }
    Ok(report)
}

/// Download every file under `remote_base/remote_subpath` into `local_dir`,
/// unpacking `.zip` and gzip'd tar archives as they land.
///
/// A source with no files is a successful no-op.
pub fn download(
    handle: &StorageHandle,
    remote_base: &str,
    remote_subpath: &str,
    local_dir: &Path,
) -> Result<TransferReport> {
    let store = handle.store();
    let source = join_remote(remote_base, &[remote_subpath]);
    let files = store.list_files(&source)?;
    if files.is_empty() {
        tracing::debug!(backend = %handle.backend(), source = %source, "nothing to download");
    }

    let mut report = TransferReport::default();
    for file in files {
        let Some(name) = base_name(&file) else {
            continue;
        };
        let dest = local_dir.join(name);
        tracing::debug!(backend = %handle.backend(), src = %file, dst = %dest.display(), "download");
        store.get_file(&file, &dest)?;
        report.transferred.push(dest.to_string_lossy().to_string());

        if let Some(kind) = ArchiveKind::from_name(name) {
            archive::extract_in_place(&dest, kind)?;
            report.extracted.push(dest);
        }
    }
    Ok(report)
}

//! Zip and gzip'd tar helpers used by the transfer engine.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path};

use flate2::read::GzDecoder;
use zip::write::SimpleFileOptions;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    /// Archive format implied by a file name, if any.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") || lower.ends_with(".gz") {
            Some(ArchiveKind::TarGz)
        } else {
            None
        }
    }
}

fn entry_name(rel: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for c in rel.components() {
        match c {
            Component::Normal(s) => parts.push(s.to_string_lossy().to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Write every file below `src` into a new zip at `out`; entry names are
/// relative to `src`.
pub fn zip_dir(src: &Path, out: &Path) -> Result<()> {
    let file = File::create(out)
        .map_err(|e| Error::msg(format!("failed to create {}: {e}", out.display())))?;
    let mut zip = zip::ZipWriter::new(file);
    let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in walkdir::WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::msg(format!("walkdir error: {e}")))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::msg(format!("failed to relativize {}: {e}", entry.path().display())))?;
        let Some(name) = entry_name(rel) else {
            continue;
        };
        if entry.file_type().is_dir() {
            zip.add_directory(format!("{name}/"), opts)
                .map_err(|e| Error::msg(format!("failed to add {name}/ to zip: {e}")))?;
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        zip.start_file(name.as_str(), opts)
            .map_err(|e| Error::msg(format!("failed to add {name} to zip: {e}")))?;
        let mut f = File::open(entry.path())
            .map_err(|e| Error::msg(format!("failed to open {}: {e}", entry.path().display())))?;
        io::copy(&mut f, &mut zip)
            .map_err(|e| Error::msg(format!("failed to compress {}: {e}", entry.path().display())))?;
    }

    zip.finish()
        .map_err(|e| Error::msg(format!("failed to finalize {}: {e}", out.display())))?;
    Ok(())
}

fn extraction(archive: &Path, reason: impl ToString) -> Error {
    Error::Extraction {
        archive: archive.to_path_buf(),
        reason: reason.to_string(),
    }
}

pub fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).map_err(|e| extraction(archive, e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| extraction(archive, e))?;
    zip.extract(dest).map_err(|e| extraction(archive, e))
}

pub fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).map_err(|e| extraction(archive, e))?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    tar.unpack(dest).map_err(|e| extraction(archive, e))
}

/// Extract `archive` next to itself and remove it. A failed extraction keeps
/// the archive in place.
pub fn extract_in_place(archive: &Path, kind: ArchiveKind) -> Result<()> {
    let dest = archive.parent().unwrap_or_else(|| Path::new("."));
    match kind {
        ArchiveKind::Zip => extract_zip(archive, dest)?,
        ArchiveKind::TarGz => extract_tar_gz(archive, dest)?,
    }
    fs::remove_file(archive)
        .map_err(|e| Error::msg(format!("failed to remove {}: {e}", archive.display())))
}

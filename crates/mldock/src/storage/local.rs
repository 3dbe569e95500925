use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::storage::ObjectStore;

/// Same-filesystem store; "remote" paths are plain filesystem paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStore;

fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::msg(format!("failed to create {}: {e}", parent.display())))?;
    }
    fs::copy(src, dst).map_err(|e| {
        Error::msg(format!(
            "failed to copy {} -> {}: {e}",
            src.display(),
            dst.display()
        ))
    })?;
    Ok(())
}

impl ObjectStore for LocalStore {
    fn list_files(&self, path: &str) -> Result<Vec<String>> {
        let root = Path::new(path);
        if root.is_file() {
            return Ok(vec![path.to_string()]);
        }
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::msg(format!("walkdir error: {e}")))?;
            if entry.file_type().is_file() {
                out.push(entry.path().to_string_lossy().to_string());
            }
        }
        Ok(out)
    }

    fn put_file(&self, src: &Path, dst: &str) -> Result<()> {
        copy_file(src, Path::new(dst))
    }

    fn get_file(&self, src: &str, dst: &Path) -> Result<()> {
        copy_file(Path::new(src), dst)
    }
}

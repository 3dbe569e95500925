//! JSON document persistence shared by the project and CLI configs.

use std::fs;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

/// Load `path` as `T`.
///
/// A missing file is `ConfigNotFound` carrying `remedy`, unless
/// `create_if_missing` is set, in which case `T::default()` is written out
/// immediately and returned.
pub fn load<T>(path: &Path, create_if_missing: bool, remedy: &str) -> Result<T>
where
    T: DeserializeOwned + Serialize + Default,
{
    if !path.exists() {
        if !create_if_missing {
            return Err(Error::ConfigNotFound {
                path: path.parent().unwrap_or(Path::new(".")).to_path_buf(),
                remedy: remedy.to_string(),
            });
        }
        let doc = T::default();
        write(path, &doc)?;
        tracing::info!(path = %path.display(), "created new document");
        return Ok(doc);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&raw)
        .map_err(|e| Error::msg(format!("failed to parse {}: {e}", path.display())))
}

/// Persist the whole document, overwriting unconditionally.
pub fn write<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    // Routing through `Value` sorts object keys.
    let value = serde_json::to_value(doc)
        .map_err(|e| Error::msg(format!("failed to serialize {}: {e}", path.display())))?;
    atomic_write_json(path, &value)
}

pub fn atomic_write_json(path: &Path, value: &Value) -> Result<()> {
    let mut body = serde_json::to_string_pretty(value)
        .map_err(|e| Error::msg(format!("failed to serialize {}: {e}", path.display())))?;
    body.push('\n');
    atomic_write_text(path, &body)
}

pub fn atomic_write_text(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| Error::msg(format!("failed to create {}: {e}", parent.display())))?;
    }
    let file_name = path.file_name().and_then(|s| s.to_str()).ok_or_else(|| {
        Error::msg(format!(
            "invalid file path for atomic write: {}",
            path.display()
        ))
    })?;
    let tmp = path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        file_name,
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    fs::write(&tmp, body)
        .map_err(|e| Error::msg(format!("failed to write temp file {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        Error::msg(format!(
            "failed to rename {} -> {}: {e}",
            tmp.display(),
            path.display()
        ))
    })?;
    Ok(())
}

/// Deep-merge `overlay` into `base`: objects merge key by key, anything else
/// in `overlay` replaces the value in `base`.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_obj), Value::Object(overlay_obj)) => {
            for (k, v) in overlay_obj {
                match base_obj.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base_obj.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => {
            *slot = v;
        }
    }
}

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::storage::{BackendSettings, GcsStore, LocalStore, S3Store, StorageHandle};

static SCHEME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]*)://").expect("scheme regex must compile")
});

/// Scheme of `uri`, or `""` for a bare filesystem path.
pub fn scheme_of(uri: &str) -> &str {
    SCHEME_RE
        .captures(uri)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or("")
}

/// Resolve `uri` with backend settings taken from the process environment.
pub fn resolve(uri: &str) -> Result<(StorageHandle, String)> {
    let env = std::env::vars().collect();
    resolve_with(uri, &BackendSettings::from_env(&env))
}

/// Pick the backend for `uri` and return it with the scheme-stripped path.
///
/// No backend is contacted here; a missing CLI or credentials surface as
/// `BackendUnavailable` on the first transfer.
pub fn resolve_with(uri: &str, settings: &BackendSettings) -> Result<(StorageHandle, String)> {
    let scheme = scheme_of(uri);
    let stripped = || uri[scheme.len() + "://".len()..].to_string();
    match scheme.to_ascii_lowercase().as_str() {
        "" => Ok((StorageHandle::Local(LocalStore), uri.to_string())),
        "s3" => Ok((StorageHandle::S3(S3Store::from_settings(settings)), stripped())),
        "gs" => Ok((StorageHandle::Gcs(GcsStore::from_settings(settings)), stripped())),
        _ => Err(Error::UnsupportedScheme {
            scheme: scheme.to_string(),
            uri: uri.to_string(),
        }),
    }
}

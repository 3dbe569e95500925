//! Storage backends and URI scheme resolution.
//!
//! A URI is resolved once into a [`StorageHandle`] bound to exactly one
//! backend. Transfer code only talks to the handle through [`ObjectStore`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::Result;

pub mod cli;
pub mod local;
pub mod scheme;

pub use cli::{GcsStore, S3Store};
pub use local::LocalStore;
pub use scheme::{resolve, resolve_with};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Local,
    S3,
    Gcs,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Local => write!(f, "local"),
            Backend::S3 => write!(f, "s3"),
            Backend::Gcs => write!(f, "gcs"),
        }
    }
}

/// Object-level primitives every backend provides. Paths are scheme-stripped:
/// `bucket/key` for remote stores, filesystem paths for local.
pub trait ObjectStore {
    /// All files at or below `path`. A missing path yields an empty list.
    fn list_files(&self, path: &str) -> Result<Vec<String>>;
    fn put_file(&self, src: &Path, dst: &str) -> Result<()>;
    fn get_file(&self, src: &str, dst: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub enum StorageHandle {
    Local(LocalStore),
    S3(S3Store),
    Gcs(GcsStore),
}

impl StorageHandle {
    pub fn backend(&self) -> Backend {
        match self {
            StorageHandle::Local(_) => Backend::Local,
            StorageHandle::S3(_) => Backend::S3,
            StorageHandle::Gcs(_) => Backend::Gcs,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, StorageHandle::Local(_))
    }

    pub fn store(&self) -> &dyn ObjectStore {
        match self {
            StorageHandle::Local(s) => s,
            StorageHandle::S3(s) => s,
            StorageHandle::Gcs(s) => s,
        }
    }
}

/// How remote backends are reached from this host.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub aws_program: String,
    pub gcloud_program: String,
    pub s3_region: Option<String>,
    pub s3_profile: Option<String>,
    pub s3_endpoint_url: Option<String>,
    pub gcs_project: Option<String>,
    /// Extra environment for spawned backend CLIs.
    pub command_env: BTreeMap<String, String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            aws_program: "aws".into(),
            gcloud_program: "gcloud".into(),
            s3_region: None,
            s3_profile: None,
            s3_endpoint_url: None,
            gcs_project: None,
            command_env: BTreeMap::new(),
        }
    }
}

impl BackendSettings {
    pub fn from_env(env: &BTreeMap<String, String>) -> Self {
        let get = |k: &str| {
            env.get(k)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();
        Self {
            aws_program: get("MLDOCK_AWS_CLI").unwrap_or(defaults.aws_program),
            gcloud_program: get("MLDOCK_GCLOUD_CLI").unwrap_or(defaults.gcloud_program),
            s3_region: get("MLDOCK_S3_REGION"),
            s3_profile: get("MLDOCK_S3_PROFILE"),
            s3_endpoint_url: get("MLDOCK_S3_ENDPOINT_URL"),
            gcs_project: get("MLDOCK_GCS_PROJECT"),
            command_env: BTreeMap::new(),
        }
    }
}

/// Join a scheme-stripped base with relative segments using `/`, skipping
/// empty and `.` segments.
pub fn join_remote(base: &str, segments: &[&str]) -> String {
    let mut out = base.trim_end_matches('/').to_string();
    if out.is_empty() && base.starts_with('/') {
        out.push('/');
    }
    for seg in segments {
        for part in seg.split('/') {
            if part.is_empty() || part == "." {
                continue;
            }
            if !out.is_empty() && !out.ends_with('/') {
                out.push('/');
            }
            out.push_str(part);
        }
    }
    out
}

/// Split `bucket/key/prefix` into `(bucket, key/prefix)`.
pub(crate) fn split_bucket(path: &str) -> (&str, &str) {
    let path = path.trim_start_matches('/');
    match path.split_once('/') {
        Some((bucket, key)) => (bucket, key.trim_end_matches('/')),
        None => (path, ""),
    }
}

/// Keep keys equal to `prefix` or nested below it; an empty prefix keeps all.
pub(crate) fn under_prefix(key: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    key == prefix
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

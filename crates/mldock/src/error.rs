use std::fmt;
use std::path::PathBuf;

use crate::storage::Backend;

#[derive(Debug)]
pub enum Error {
    /// URI scheme outside `{"", s3, gs}`.
    UnsupportedScheme { scheme: String, uri: String },
    /// Backend CLI or credentials missing; raised lazily on first use.
    BackendUnavailable { backend: Backend, reason: String },
    /// A required document is missing and auto-create was not requested.
    ConfigNotFound { path: PathBuf, remedy: String },
    DuplicateAsset {
        channel: String,
        filename: String,
        group: String,
    },
    AssetNotFound {
        channel: String,
        filename: String,
        group: String,
    },
    DuplicateRemote { name: String },
    RemoteNotFound { name: String },
    /// Archive unreadable during download post-processing. The archive is kept.
    Extraction { archive: PathBuf, reason: String },
    /// Upload source is missing or not a directory.
    SourceMissing { path: PathBuf },
    Msg(String),
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::Msg(msg.into())
    }

    /// Errors caused by bad user input rather than by the environment.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedScheme { .. }
                | Error::DuplicateAsset { .. }
                | Error::AssetNotFound { .. }
                | Error::DuplicateRemote { .. }
                | Error::RemoteNotFound { .. }
        )
    }

    /// Process exit status for this error: 2 for user-input errors, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.is_user_error() { 2 } else { 1 }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnsupportedScheme { scheme, uri } => write!(
                f,
                "path scheme '{scheme}' for '{uri}' is not supported; \
                 available options are 's3', 'gs' or a local filesystem path"
            ),
            Error::BackendUnavailable { backend, reason } => {
                write!(f, "{backend} backend unavailable: {reason}")
            }
            Error::ConfigNotFound { path, remedy } => write!(
                f,
                "no mldock configuration found in '{}'; {remedy}",
                path.display()
            ),
            Error::DuplicateAsset {
                channel,
                filename,
                group,
            } => write!(
                f,
                "{group} asset '{channel}/{filename}' already exists; \
                 run `mldock {group} update --channel {channel} --name {filename}` instead"
            ),
            Error::AssetNotFound {
                channel,
                filename,
                group,
            } => write!(
                f,
                "{group} asset '{channel}/{filename}' not found; \
                 run `mldock {group} create --channel {channel} --name {filename}` first"
            ),
            Error::DuplicateRemote { name } => write!(
                f,
                "remote '{name}' already exists; run `mldock remotes add --name {name} --update` to replace it"
            ),
            Error::RemoteNotFound { name } => write!(
                f,
                "remote '{name}' not found; run `mldock remotes add --name {name} --path <uri>` first"
            ),
            Error::Extraction { archive, reason } => write!(
                f,
                "failed to extract {}: {reason} (archive kept for inspection)",
                archive.display()
            ),
            Error::SourceMissing { path } => write!(
                f,
                "{} is not a directory or could not be found",
                path.display()
            ),
            Error::Msg(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::msg(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Remote object stores driven through the vendor CLIs (`aws`, `gcloud`).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use crate::error::{Error, Result};
use crate::process::{command_summary, output_for};
use crate::storage::{Backend, BackendSettings, ObjectStore, split_bucket, under_prefix};

const CREDENTIAL_MARKERS: &[&str] = &[
    "unable to locate credentials",
    "could not be found",
    "invalidaccesskeyid",
    "expiredtoken",
    "signaturedoesnotmatch",
    "no credentialed accounts",
    "you do not currently have an active account",
    "reauthentication",
    "anonymous caller does not have",
    "could not automatically determine credentials",
];

fn is_credentials_error(msg: &str) -> bool {
    let m = msg.to_ascii_lowercase();
    CREDENTIAL_MARKERS.iter().any(|k| m.contains(k))
}

fn failure(backend: Backend, action: &str, out: &Output) -> Error {
    let msg = command_summary(out);
    if is_credentials_error(&msg) {
        return Error::BackendUnavailable {
            backend,
            reason: msg,
        };
    }
    Error::msg(format!("{backend} {action} failed: {msg}"))
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn ensure_parent(dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::msg(format!("failed to create {}: {e}", parent.display())))?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct S3Store {
    program: String,
    region: Option<String>,
    profile: Option<String>,
    endpoint_url: Option<String>,
    command_env: BTreeMap<String, String>,
}

impl S3Store {
    pub fn from_settings(settings: &BackendSettings) -> Self {
        Self {
            program: settings.aws_program.clone(),
            region: settings.s3_region.clone(),
            profile: settings.s3_profile.clone(),
            endpoint_url: settings.s3_endpoint_url.clone(),
            command_env: settings.command_env.clone(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(profile) = non_empty(&self.profile) {
            cmd.arg("--profile").arg(profile);
        }
        if let Some(region) = non_empty(&self.region) {
            cmd.arg("--region").arg(region);
        }
        if let Some(endpoint) = non_empty(&self.endpoint_url) {
            cmd.arg("--endpoint-url").arg(endpoint);
        }
        for (k, v) in &self.command_env {
            cmd.env(k, v);
        }
        cmd
    }

    fn cp(&self, src: &str, dst: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("s3")
            .arg("cp")
            .arg("--only-show-errors")
            .arg(src)
            .arg(dst);
        let out = output_for(Backend::S3, &mut cmd)?;
        if out.status.success() {
            return Ok(());
        }
        Err(failure(Backend::S3, "copy", &out))
    }
}

// `aws s3 ls --recursive` prints `<date> <time> <size> <key>`; keys may hold spaces.
fn parse_s3_ls_key(line: &str) -> Option<&str> {
    let mut rest = line.trim_start();
    for _ in 0..3 {
        let idx = rest.find(char::is_whitespace)?;
        rest = rest[idx..].trim_start();
    }
    let key = rest.trim_end();
    if key.is_empty() { None } else { Some(key) }
}

impl ObjectStore for S3Store {
    fn list_files(&self, path: &str) -> Result<Vec<String>> {
        let (bucket, prefix) = split_bucket(path);
        let mut cmd = self.command();
        cmd.arg("s3")
            .arg("ls")
            .arg("--recursive")
            .arg(format!("s3://{bucket}/{prefix}"));
        let out = output_for(Backend::S3, &mut cmd)?;
        if !out.status.success() {
            // `aws s3 ls` exits 1 without output when nothing matches.
            if out.status.code() == Some(1) && out.stderr.iter().all(u8::is_ascii_whitespace) {
                return Ok(Vec::new());
            }
            return Err(failure(Backend::S3, "list", &out));
        }
        let stdout = String::from_utf8_lossy(&out.stdout);
        Ok(stdout
            .lines()
            .filter_map(parse_s3_ls_key)
            .filter(|key| !key.ends_with('/') && under_prefix(key, prefix))
            .map(|key| format!("{bucket}/{key}"))
            .collect())
    }

    fn put_file(&self, src: &Path, dst: &str) -> Result<()> {
        self.cp(&src.to_string_lossy(), &format!("s3://{dst}"))
    }

    fn get_file(&self, src: &str, dst: &Path) -> Result<()> {
        ensure_parent(dst)?;
        self.cp(&format!("s3://{src}"), &dst.to_string_lossy())
    }
}

#[derive(Debug, Clone)]
pub struct GcsStore {
    program: String,
    project: Option<String>,
    command_env: BTreeMap<String, String>,
}

impl GcsStore {
    pub fn from_settings(settings: &BackendSettings) -> Self {
        Self {
            program: settings.gcloud_program.clone(),
            project: settings.gcs_project.clone(),
            command_env: settings.command_env.clone(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("storage");
        if let Some(project) = non_empty(&self.project) {
            cmd.arg("--project").arg(project);
        }
        for (k, v) in &self.command_env {
            cmd.env(k, v);
        }
        cmd
    }

    fn cp(&self, src: &str, dst: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("cp").arg(src).arg(dst);
        let out = output_for(Backend::Gcs, &mut cmd)?;
        if out.status.success() {
            return Ok(());
        }
        Err(failure(Backend::Gcs, "copy", &out))
    }
}

impl ObjectStore for GcsStore {
    fn list_files(&self, path: &str) -> Result<Vec<String>> {
        let (bucket, prefix) = split_bucket(path);
        let mut cmd = self.command();
        cmd.arg("ls").arg(format!("gs://{bucket}/{prefix}**"));
        let out = output_for(Backend::Gcs, &mut cmd)?;
        if !out.status.success() {
            let msg = command_summary(&out);
            if msg.to_ascii_lowercase().contains("matched no objects") {
                return Ok(Vec::new());
            }
            return Err(failure(Backend::Gcs, "list", &out));
        }
        let stdout = String::from_utf8_lossy(&out.stdout);
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter_map(|l| l.strip_prefix("gs://"))
            .filter(|l| !l.ends_with('/') && !l.ends_with(':'))
            .filter(|l| {
                let (_, key) = split_bucket(l);
                under_prefix(key, prefix)
            })
            .map(ToOwned::to_owned)
            .collect())
    }

    fn put_file(&self, src: &Path, dst: &str) -> Result<()> {
        self.cp(&src.to_string_lossy(), &format!("gs://{dst}"))
    }

    fn get_file(&self, src: &str, dst: &Path) -> Result<()> {
        ensure_parent(dst)?;
        self.cp(&format!("gs://{src}"), &dst.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ls_line_keeps_spaces_in_keys() {
        assert_eq!(
            parse_s3_ls_key("2024-03-01 10:11:12       1234 data/train set.csv"),
            Some("data/train set.csv")
        );
        assert_eq!(parse_s3_ls_key("   "), None);
        assert_eq!(parse_s3_ls_key("2024-03-01 10:11:12 0"), None);
    }

    #[test]
    fn credential_failures_are_detected() {
        assert!(is_credentials_error(
            "fatal error: Unable to locate credentials"
        ));
        assert!(is_credentials_error(
            "ERROR: (gcloud.storage.cp) You do not currently have an active account selected."
        ));
        assert!(!is_credentials_error("An error occurred (NoSuchBucket)"));
    }

    #[test]
    fn s3_command_carries_settings() {
        let mut settings = BackendSettings::default();
        settings.s3_region = Some("us-east-2".into());
        settings.s3_endpoint_url = Some("http://127.0.0.1:9000".into());
        let store = S3Store::from_settings(&settings);
        let cmd = store.command();
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            args,
            vec!["--region", "us-east-2", "--endpoint-url", "http://127.0.0.1:9000"]
        );
    }
}

//! Local `docker build`, `docker run` for training and serving, container
//! stop, plus a predict smoke test.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::cli_config::AuthType;
use crate::error::{Error, Result};
use crate::process::{command_summary, run_status};
use crate::project::ProjectDoc;

pub const CONTAINER_BASE: &str = "/opt/ml";
pub const DEFAULT_PORT: u16 = 8080;
/// Label attached to every container started by `local train|deploy`.
pub const CONTAINER_LABEL: &str = "MLDOCK__IS_MLDOCK_CONTAINER=true";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Train,
    Deploy,
}

impl RunMode {
    fn command(self) -> &'static str {
        match self {
            RunMode::Train => "train",
            RunMode::Deploy => "serve",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
}

/// Host SDK credentials mounted so the container can reach cloud storage.
pub fn credentials_mount(auth: AuthType, home: &Path) -> Mount {
    match auth {
        AuthType::Gcloud => Mount {
            host: home.join(".config/gcloud"),
            container: "/root/.config/gcloud".into(),
        },
        AuthType::Awscli => Mount {
            host: home.join(".aws"),
            container: "/root/.aws".into(),
        },
    }
}

fn absolute(p: &Path) -> PathBuf {
    if p.is_absolute() {
        return p.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(p))
        .unwrap_or_else(|_| p.to_path_buf())
}

/// `docker build` of the project's Dockerfile, found at
/// `<module dir>/<container dir>/Dockerfile` under the project.
#[derive(Debug, Clone)]
pub struct DockerBuild {
    pub image: String,
    pub tag: String,
    pub context: PathBuf,
    pub dockerfile: PathBuf,
    pub build_args: BTreeMap<String, String>,
    pub no_cache: bool,
}

impl DockerBuild {
    pub fn for_project(project: &ProjectDoc, tag: &str) -> Self {
        let cfg = project.config();
        let context = absolute(project.dir());
        let module_dir = cfg.mldock_module_dir.clone().unwrap_or_else(|| "src".into());
        let container_dir = cfg.container_dir.clone().unwrap_or_else(|| "container".into());
        let requirements = cfg
            .requirements_dir
            .clone()
            .unwrap_or_else(|| "requirements.txt".into());

        let mut build_args = BTreeMap::new();
        build_args.insert("module_path".to_string(), module_dir.clone());
        build_args.insert("target_dir_name".to_string(), module_dir.clone());
        build_args.insert("requirements_file_path".to_string(), requirements);
        if let Some(template) = &cfg.template {
            build_args.insert("container_platform".to_string(), template.clone());
        }
        Self {
            image: project.image_name(),
            tag: tag.to_string(),
            dockerfile: context.join(&module_dir).join(container_dir).join("Dockerfile"),
            context,
            build_args,
            no_cache: false,
        }
    }

    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "-t".to_string(),
            self.image_ref(),
            "-f".to_string(),
            self.dockerfile.display().to_string(),
        ];
        if self.no_cache {
            args.push("--no-cache".into());
        }
        for (k, v) in &self.build_args {
            args.push("--build-arg".into());
            args.push(format!("{k}={v}"));
        }
        args.push(self.context.display().to_string());
        args
    }

    pub fn run(&self, program: &str, dry_run: bool) -> Result<()> {
        let args = self.args();
        if dry_run {
            println!("{program} {}", args.join(" "));
            return Ok(());
        }
        if !self.dockerfile.is_file() {
            return Err(Error::msg(format!(
                "no Dockerfile at {}; check mldock_module_dir and container_dir in mldock.json",
                self.dockerfile.display()
            )));
        }
        tracing::info!(image = %self.image_ref(), "building image");
        run_status(Command::new(program).args(&args))
    }
}

#[derive(Debug, Clone)]
pub struct DockerRun {
    pub image: String,
    pub tag: String,
    pub mode: RunMode,
    pub mounts: Vec<Mount>,
    pub env: BTreeMap<String, String>,
    pub port: Option<u16>,
    pub entrypoint: Option<String>,
}

impl DockerRun {
    /// Project `config`, `data`, `model` and `output` mounted over the
    /// container's `/opt/ml` layout.
    pub fn for_project(project: &ProjectDoc, tag: &str, mode: RunMode) -> Self {
        let dir = absolute(project.dir());
        let mounts = [
            ("config", "input/config"),
            ("data", "input/data"),
            ("model", "model"),
            ("output", "output"),
        ]
        .into_iter()
        .map(|(host, container)| Mount {
            host: dir.join(host),
            container: format!("{CONTAINER_BASE}/{container}"),
        })
        .collect();
        Self {
            image: project.image_name(),
            tag: tag.to_string(),
            mode,
            mounts,
            env: BTreeMap::new(),
            port: (mode == RunMode::Deploy).then_some(DEFAULT_PORT),
            entrypoint: None,
        }
    }

    pub fn with_credentials(mut self, auth: Option<AuthType>, home: Option<&Path>) -> Self {
        if let (Some(auth), Some(home)) = (auth, home) {
            self.mounts.push(credentials_mount(auth, home));
        }
        self
    }

    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--rm".to_string(), "-t".to_string()];
        args.push("--label".into());
        args.push(CONTAINER_LABEL.into());
        for m in &self.mounts {
            args.push("-v".into());
            args.push(format!("{}:{}:rw", m.host.display(), m.container));
        }
        for (k, v) in &self.env {
            args.push("-e".into());
            args.push(format!("{k}={v}"));
        }
        if let Some(port) = self.port {
            args.push("-p".into());
            args.push(format!("{port}:{port}"));
        }
        if let Some(ep) = &self.entrypoint {
            args.push("--entrypoint".into());
            args.push(ep.clone());
        }
        args.push(self.image_ref());
        args.push(self.mode.command().to_string());
        args
    }

    /// Run with `program` (normally `docker`). `dry_run` only prints the
    /// command line.
    pub fn run(&self, program: &str, dry_run: bool) -> Result<()> {
        let args = self.args();
        if dry_run {
            println!("{program} {}", args.join(" "));
            return Ok(());
        }
        for m in &self.mounts {
            fs::create_dir_all(&m.host)
                .map_err(|e| Error::msg(format!("failed to create {}: {e}", m.host.display())))?;
        }
        tracing::info!(image = %self.image_ref(), mode = self.mode.command(), "starting container");
        run_status(Command::new(program).args(&args))
    }
}

/// IDs of running containers carrying [`CONTAINER_LABEL`], optionally
/// narrowed to those started from `ancestor` (an image or `image:tag`).
pub fn running_containers(program: &str, ancestor: Option<&str>) -> Result<Vec<String>> {
    let mut cmd = Command::new(program);
    cmd.args(["ps", "-q", "--filter"]).arg(format!("label={CONTAINER_LABEL}"));
    if let Some(ancestor) = ancestor {
        cmd.arg("--filter").arg(format!("ancestor={ancestor}"));
    }
    let out = cmd
        .output()
        .map_err(|e| Error::msg(format!("failed to spawn {program}: {e}")))?;
    if !out.status.success() {
        return Err(Error::msg(format!(
            "{program} ps failed: {}",
            command_summary(&out)
        )));
    }
    Ok(String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Stop the labelled containers and return their IDs. `dry_run` only prints
/// the stop command.
pub fn stop_containers(program: &str, ancestor: Option<&str>, dry_run: bool) -> Result<Vec<String>> {
    let ids = running_containers(program, ancestor)?;
    if ids.is_empty() {
        tracing::info!("no running mldock containers");
        return Ok(ids);
    }
    if dry_run {
        println!("{program} stop {}", ids.join(" "));
        return Ok(ids);
    }
    tracing::info!(count = ids.len(), "stopping containers");
    run_status(Command::new(program).arg("stop").args(&ids))?;
    Ok(ids)
}

const PREDICT_TYPES: &[&str] = &["application/json", "text/csv", "image/jpeg"];

/// Content type for a payload file: explicit, else guessed from its name.
pub fn payload_content_type(path: &Path, explicit: Option<&str>) -> Result<String> {
    let ct = match explicit {
        Some(ct) => ct.to_string(),
        None => mime_guess::from_path(path)
            .first_raw()
            .map(str::to_string)
            .unwrap_or_default(),
    };
    if !PREDICT_TYPES.contains(&ct.as_str()) {
        return Err(Error::msg(format!(
            "unsupported payload content type '{ct}' for {}; expected one of {}",
            path.display(),
            PREDICT_TYPES.join(", ")
        )));
    }
    Ok(ct)
}

pub fn invocations_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.ends_with("/invocations") {
        host.to_string()
    } else {
        format!("{host}/invocations")
    }
}

/// POST `payload` to a locally served model and return the response body.
pub fn predict(host: &str, payload: &Path, content_type: Option<&str>) -> Result<Vec<u8>> {
    let ct = payload_content_type(payload, content_type)?;
    let body = fs::read(payload)
        .map_err(|e| Error::msg(format!("failed to read {}: {e}", payload.display())))?;
    let url = invocations_url(host);
    tracing::info!(url = %url, content_type = %ct, "sending prediction request");

    let resp = reqwest::blocking::Client::new()
        .post(&url)
        .header(reqwest::header::CONTENT_TYPE, ct)
        .body(body)
        .send()
        .map_err(|e| Error::msg(format!("request to {url} failed: {e}")))?;
    let status = resp.status();
    let bytes = resp
        .bytes()
        .map_err(|e| Error::msg(format!("failed to read response from {url}: {e}")))?;
    if !status.is_success() {
        return Err(Error::msg(format!(
            "prediction request failed ({status}): {}",
            String::from_utf8_lossy(&bytes).trim()
        )));
    }
    Ok(bytes.to_vec())
}

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, ExitCode};

use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use mldock::artifacts::ArtifactManager;
use mldock::cli_config::{AuthType, CliConfigDoc, RemoteAlias, config_path};
use mldock::container::load_environment;
use mldock::lifecycle::{ServingLifecycle, TrainingLifecycle};
use mldock::manifest::{AssetGroup, AssetManifestEntry, Compression};
use mldock::project::{ProjectDoc, StageConfig};
use mldock::runner::{DockerBuild, DockerRun, RunMode};
use mldock::storage::BackendSettings;
use mldock::{Error, Result, assets, env_vars, runner};

/// Build, configure and run machine-learning containers.
#[derive(Debug, Parser)]
#[command(name = "mldock", author, version, about)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    /// CLI config file (defaults to $MLDOCK_CONFIG or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage the user-level CLI configuration
    Configure {
        #[command(subcommand)]
        cmd: ConfigureCommand,
    },
    /// Create and inspect container projects
    Project {
        #[command(subcommand)]
        cmd: ProjectCommand,
    },
    /// Track datasets under the project's data/ directory
    Datasets {
        #[command(subcommand)]
        cmd: AssetCommand,
    },
    /// Track models under the project's model/ directory
    Models {
        #[command(subcommand)]
        cmd: AssetCommand,
    },
    /// Named storage locations used by push/pull
    Remotes {
        #[command(subcommand)]
        cmd: RemoteCommand,
    },
    /// Deployment stages mapped to image tags
    Stages {
        #[command(subcommand)]
        cmd: StageCommand,
    },
    /// Project hyperparameters
    Hyperparameters {
        #[command(subcommand)]
        cmd: KeyValueCommand,
    },
    /// Project environment variables
    Env {
        #[command(subcommand)]
        cmd: KeyValueCommand,
    },
    /// Lifecycle hooks run inside the container
    Container {
        #[command(subcommand)]
        cmd: ContainerCommand,
    },
    /// Run the project image locally
    Local {
        #[command(subcommand)]
        cmd: LocalCommand,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AuthArg {
    Gcloud,
    Awscli,
}

impl From<AuthArg> for AuthType {
    fn from(a: AuthArg) -> Self {
        match a {
            AuthArg::Gcloud => AuthType::Gcloud,
            AuthArg::Awscli => AuthType::Awscli,
        }
    }
}

#[derive(Debug, Subcommand)]
enum ConfigureCommand {
    /// Create (or update) the CLI config
    Init {
        #[arg(long, value_enum)]
        auth_type: Option<AuthArg>,
        #[arg(long)]
        server_type: Option<String>,
        #[arg(long)]
        templates_root: Option<String>,
    },
    /// Print the CLI config
    Show,
    /// Set a local environment override (KEY=VALUE)
    SetEnv { pair: String },
    /// Remove a local environment override
    UnsetEnv { key: String },
    /// Reset the CLI config to empty
    Reset,
}

#[derive(Debug, Args)]
struct ProjectDir {
    /// Container project directory
    #[arg(long = "dir", short = 'd', default_value = ".")]
    dir: PathBuf,
}

#[derive(Debug, Subcommand)]
enum ProjectCommand {
    /// Create mldock.json and the asset directories
    Init {
        #[command(flatten)]
        project: ProjectDir,
        #[arg(long)]
        image_name: Option<String>,
        #[arg(long)]
        template: Option<String>,
        #[arg(long)]
        mldock_module_dir: Option<String>,
        #[arg(long)]
        container_dir: Option<String>,
        #[arg(long)]
        requirements_dir: Option<String>,
    },
    /// Print the project document
    Show {
        #[command(flatten)]
        project: ProjectDir,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CompressionArg {
    Zip,
}

#[derive(Debug, Args)]
struct AssetKey {
    /// Channel directory name
    #[arg(long)]
    channel: String,
    /// File name within the channel
    #[arg(long)]
    name: String,
    #[command(flatten)]
    project: ProjectDir,
}

#[derive(Debug, Args)]
struct AssetFields {
    #[command(flatten)]
    key: AssetKey,
    /// Remote alias to push to / pull from
    #[arg(long)]
    remote: Option<String>,
    /// Path within the remote (defaults to the channel)
    #[arg(long)]
    remote_path: Option<String>,
    /// Mime type (guessed from the name when omitted)
    #[arg(long = "mime-type", alias = "type")]
    mime_type: Option<String>,
    #[arg(long, value_enum)]
    compression: Option<CompressionArg>,
}

impl AssetFields {
    fn entry(&self) -> AssetManifestEntry {
        let mut e = AssetManifestEntry::new(&self.key.channel, &self.key.name);
        e.remote = self.remote.clone();
        e.remote_path = self.remote_path.clone();
        e.mime_type = self.mime_type.clone();
        e.compression = self.compression.map(|CompressionArg::Zip| Compression::Zip);
        e
    }
}

#[derive(Debug, Subcommand)]
enum AssetCommand {
    /// Track a new file in the manifest
    Create(AssetFields),
    /// Change the remote, path, type or compression of a tracked file
    Update(AssetFields),
    /// Stop tracking a file
    Remove(AssetKey),
    /// Upload the channel directory to its remote
    Push(AssetKey),
    /// Download the channel directory from its remote
    Pull(AssetKey),
    /// List tracked files and their remotes
    List {
        #[command(flatten)]
        project: ProjectDir,
    },
}

#[derive(Debug, Subcommand)]
enum RemoteCommand {
    /// Register a named storage location
    Add {
        #[arg(long)]
        name: String,
        /// Full URI: s3://..., gs://... or a local directory
        #[arg(long)]
        path: String,
        /// Replace an existing remote of the same name
        #[arg(long)]
        update: bool,
    },
    /// Forget a named storage location
    Remove {
        #[arg(long)]
        name: String,
    },
    /// List configured remotes
    List,
}

#[derive(Debug, Subcommand)]
enum StageCommand {
    /// Map a stage name to an image tag
    Set {
        #[command(flatten)]
        project: ProjectDir,
        #[arg(long)]
        name: String,
        #[arg(long)]
        tag: String,
    },
    /// Drop a stage
    Remove {
        #[command(flatten)]
        project: ProjectDir,
        #[arg(long)]
        name: String,
    },
    /// List stages and their tags
    List {
        #[command(flatten)]
        project: ProjectDir,
    },
}

#[derive(Debug, Subcommand)]
enum KeyValueCommand {
    /// Set KEY=VALUE pairs; values parse as JSON when possible
    Set {
        #[command(flatten)]
        project: ProjectDir,
        pairs: Vec<String>,
    },
    /// Remove keys
    Unset {
        #[command(flatten)]
        project: ProjectDir,
        keys: Vec<String>,
    },
    /// Print the current values as JSON
    List {
        #[command(flatten)]
        project: ProjectDir,
    },
}

#[derive(Debug, Subcommand)]
enum ContainerCommand {
    /// Prepare /opt/ml and sync channels down (prod stage only)
    Startup {
        /// Serving container: only model artifacts are synced
        #[arg(long)]
        serving: bool,
        /// dotenv file layered under the environment
        #[arg(long, default_value = ".env")]
        env_file: PathBuf,
    },
    /// Sync output and model channels up (prod stage only)
    Cleanup {
        #[arg(long)]
        serving: bool,
        #[arg(long, default_value = ".env")]
        env_file: PathBuf,
    },
    /// Run a training command between startup and cleanup
    Train {
        #[arg(long, default_value = ".env")]
        env_file: PathBuf,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    project: ProjectDir,
    /// Image tag (overrides --stage)
    #[arg(long)]
    tag: Option<String>,
    /// Stage whose tag to run
    #[arg(long)]
    stage: Option<String>,
    /// Hyperparameter overrides (KEY=VALUE)
    #[arg(long = "param")]
    params: Vec<String>,
    /// Extra container environment (KEY=VALUE)
    #[arg(long = "env")]
    env: Vec<String>,
    /// Print the docker command instead of running it
    #[arg(long)]
    dry_run: bool,
    #[arg(long, default_value = "docker")]
    docker: String,
}

#[derive(Debug, Subcommand)]
enum LocalCommand {
    /// Build the project image
    Build {
        #[command(flatten)]
        project: ProjectDir,
        /// Image tag (overrides --stage)
        #[arg(long)]
        tag: Option<String>,
        /// Stage whose tag to build
        #[arg(long)]
        stage: Option<String>,
        /// Build from scratch
        #[arg(long)]
        no_cache: bool,
        /// Print the docker command instead of running it
        #[arg(long)]
        dry_run: bool,
        #[arg(long, default_value = "docker")]
        docker: String,
    },
    /// Run the training entrypoint
    Train(RunArgs),
    /// Serve the model on a local port
    Deploy {
        #[command(flatten)]
        run: RunArgs,
        #[arg(long, default_value_t = runner::DEFAULT_PORT)]
        port: u16,
    },
    /// POST a payload to a locally served model
    Predict {
        #[arg(long, default_value = "http://localhost:8080")]
        host: String,
        #[arg(long)]
        payload: PathBuf,
        #[arg(long)]
        content_type: Option<String>,
        /// Write the response here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Stop running mldock containers
    Stop {
        #[command(flatten)]
        project: ProjectDir,
        /// Only containers from this image tag
        #[arg(long)]
        tag: Option<String>,
        /// Stop containers from every mldock image, not just this project's
        #[arg(long)]
        all: bool,
        /// Print the docker command instead of running it
        #[arg(long)]
        dry_run: bool,
        #[arg(long, default_value = "docker")]
        docker: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("MLDOCK_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_file = || config_path(cli.config.as_deref());
    match cli.cmd {
        Command::Configure { cmd } => cmd_configure(&config_file()?, cmd),
        Command::Project { cmd } => cmd_project(cmd),
        Command::Datasets { cmd } => cmd_assets(&config_file()?, AssetGroup::Datasets, cmd),
        Command::Models { cmd } => cmd_assets(&config_file()?, AssetGroup::Models, cmd),
        Command::Remotes { cmd } => cmd_remotes(&config_file()?, cmd),
        Command::Stages { cmd } => cmd_stages(cmd),
        Command::Hyperparameters { cmd } => cmd_key_values(cmd, Section::Hyperparameters),
        Command::Env { cmd } => cmd_key_values(cmd, Section::Environment),
        Command::Container { cmd } => cmd_container(cmd),
        Command::Local { cmd } => cmd_local(&config_file()?, cmd),
    }
}

fn print_json<T: serde::Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

fn split_pair(pair: &str) -> Result<(String, String)> {
    let (k, v) = pair
        .split_once('=')
        .ok_or_else(|| Error::msg(format!("expected KEY=VALUE, got '{pair}'")))?;
    let k = k.trim();
    if k.is_empty() {
        return Err(Error::msg(format!("empty key in '{pair}'")));
    }
    Ok((k.to_string(), v.to_string()))
}

// Numbers, booleans and JSON literals keep their type; anything else is a string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_pairs(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for p in pairs {
        let (k, v) = split_pair(p)?;
        out.insert(k, parse_value(&v));
    }
    Ok(out)
}

fn cmd_configure(config_file: &Path, cmd: ConfigureCommand) -> Result<()> {
    match cmd {
        ConfigureCommand::Init {
            auth_type,
            server_type,
            templates_root,
        } => {
            let mut doc = CliConfigDoc::load(config_file, true)?;
            if let Some(a) = auth_type {
                doc.config.local.auth_type = Some(a.into());
            }
            if server_type.is_some() {
                doc.config.templates.server_type = server_type;
            }
            if templates_root.is_some() {
                doc.config.templates.root = templates_root;
            }
            doc.write()?;
            tracing::info!(path = %doc.path().display(), "cli config written");
            Ok(())
        }
        ConfigureCommand::Show => {
            let doc = CliConfigDoc::load(config_file, false)?;
            print_json(&doc.config)
        }
        ConfigureCommand::SetEnv { pair } => {
            let mut doc = CliConfigDoc::load(config_file, false)?;
            let (k, v) = split_pair(&pair)?;
            doc.config.local.environment.insert(k, parse_value(&v));
            doc.write()
        }
        ConfigureCommand::UnsetEnv { key } => {
            let mut doc = CliConfigDoc::load(config_file, false)?;
            if doc.config.local.environment.remove(&key).is_none() {
                tracing::warn!(key = %key, "no such local environment override");
            }
            doc.write()
        }
        ConfigureCommand::Reset => {
            let mut doc = CliConfigDoc::load_or_default(config_file)?;
            doc.config = Default::default();
            doc.write()
        }
    }
}

fn cmd_project(cmd: ProjectCommand) -> Result<()> {
    match cmd {
        ProjectCommand::Init {
            project,
            image_name,
            template,
            mldock_module_dir,
            container_dir,
            requirements_dir,
        } => {
            let mut doc = ProjectDoc::init(&project.dir)?;
            if image_name.is_some() {
                doc.update_image_name(image_name);
            }
            if template.is_some() {
                doc.update_template(template);
            }
            doc.update_dirs(mldock_module_dir, container_dir, requirements_dir);
            doc.write()?;
            tracing::info!(path = %doc.path().display(), image = %doc.image_name(), "project initialized");
            Ok(())
        }
        ProjectCommand::Show { project } => {
            let doc = ProjectDoc::load(&project.dir, false)?;
            print_json(doc.config())
        }
    }
}

fn cmd_assets(config_file: &Path, group: AssetGroup, cmd: AssetCommand) -> Result<()> {
    match cmd {
        AssetCommand::Create(fields) => {
            let mut doc = ProjectDoc::load(&fields.key.project.dir, false)?;
            assets::create(&mut doc, group, fields.entry(), false)
        }
        AssetCommand::Update(fields) => {
            let mut doc = ProjectDoc::load(&fields.key.project.dir, false)?;
            assets::update(&mut doc, group, fields.entry())
        }
        AssetCommand::Remove(key) => {
            let mut doc = ProjectDoc::load(&key.project.dir, false)?;
            assets::remove(&mut doc, group, &key.channel, &key.name)?;
            Ok(())
        }
        AssetCommand::Push(key) => {
            let doc = ProjectDoc::load(&key.project.dir, false)?;
            let cli = CliConfigDoc::load(config_file, false)?;
            let settings = backend_settings();
            let report = assets::push(&doc, &cli.config, group, &key.channel, &key.name, &settings)?;
            tracing::info!(files = report.transferred.len(), "successfully uploaded {group} artifacts");
            Ok(())
        }
        AssetCommand::Pull(key) => {
            let doc = ProjectDoc::load(&key.project.dir, false)?;
            let cli = CliConfigDoc::load(config_file, false)?;
            let settings = backend_settings();
            let report = assets::pull(&doc, &cli.config, group, &key.channel, &key.name, &settings)?;
            tracing::info!(
                files = report.transferred.len(),
                extracted = report.extracted.len(),
                "successfully downloaded {group} artifacts"
            );
            Ok(())
        }
        AssetCommand::List { project } => {
            let doc = ProjectDoc::load(&project.dir, false)?;
            for e in doc.manifest(group).entries() {
                println!(
                    "{}/{}/{}\tremote={}\tpath={}",
                    group.dir_name(),
                    e.channel,
                    e.filename,
                    e.remote.as_deref().unwrap_or("-"),
                    e.remote_path.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }
    }
}

fn backend_settings() -> BackendSettings {
    let env: BTreeMap<String, String> = std::env::vars().collect();
    BackendSettings::from_env(&env)
}

fn cmd_remotes(config_file: &Path, cmd: RemoteCommand) -> Result<()> {
    match cmd {
        RemoteCommand::Add { name, path, update } => {
            let mut doc = CliConfigDoc::load(config_file, true)?;
            // Reject unknown schemes before persisting.
            mldock::storage::resolve(&path)?;
            doc.config.add_remote(RemoteAlias::new(name, path), update)?;
            doc.write()
        }
        RemoteCommand::Remove { name } => {
            let mut doc = CliConfigDoc::load(config_file, false)?;
            doc.config.remove_remote(&name)?;
            doc.write()
        }
        RemoteCommand::List => {
            let doc = CliConfigDoc::load_or_default(config_file)?;
            for r in &doc.config.remotes {
                let kind = if r.kind.is_empty() { "local" } else { r.kind.as_str() };
                println!("{}\t{}\t{}", r.name, kind, r.path);
            }
            Ok(())
        }
    }
}

fn cmd_stages(cmd: StageCommand) -> Result<()> {
    match cmd {
        StageCommand::Set { project, name, tag } => {
            let mut doc = ProjectDoc::load(&project.dir, false)?;
            let mut stages = doc.stages().clone();
            stages.insert(name, StageConfig { tag });
            doc.update_stages(stages);
            doc.write()
        }
        StageCommand::Remove { project, name } => {
            let mut doc = ProjectDoc::load(&project.dir, false)?;
            let mut stages = doc.stages().clone();
            if stages.remove(&name).is_none() {
                return Err(Error::msg(format!("stage '{name}' is not defined")));
            }
            doc.update_stages(stages);
            doc.write()
        }
        StageCommand::List { project } => {
            let doc = ProjectDoc::load(&project.dir, false)?;
            for (name, stage) in doc.stages() {
                println!("{name}\t{}", stage.tag);
            }
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Section {
    Hyperparameters,
    Environment,
}

fn cmd_key_values(cmd: KeyValueCommand, section: Section) -> Result<()> {
    let dir = match &cmd {
        KeyValueCommand::Set { project, .. }
        | KeyValueCommand::Unset { project, .. }
        | KeyValueCommand::List { project } => project.dir.clone(),
    };
    let mut doc = ProjectDoc::load(&dir, false)?;
    let mut current = match section {
        Section::Hyperparameters => doc.hyperparameters().clone(),
        Section::Environment => doc.environment().clone(),
    };
    match cmd {
        KeyValueCommand::Set { pairs, .. } => current.extend(parse_pairs(&pairs)?),
        KeyValueCommand::Unset { keys, .. } => {
            for k in keys {
                current.remove(&k);
            }
        }
        KeyValueCommand::List { .. } => return print_json(&current),
    }
    match section {
        Section::Hyperparameters => doc.update_hyperparameters(current),
        Section::Environment => doc.update_environment(current),
    }
    doc.write()
}

fn cmd_container(cmd: ContainerCommand) -> Result<()> {
    match cmd {
        ContainerCommand::Startup { serving, env_file } => {
            let env = load_environment(Some(&env_file))?;
            let manager = ArtifactManager::from_env(env);
            if serving {
                ServingLifecycle::new(manager).startup()?;
            } else {
                TrainingLifecycle::new(manager).startup()?;
            }
            Ok(())
        }
        ContainerCommand::Cleanup { serving, env_file } => {
            let manager = ArtifactManager::from_env(load_environment(Some(&env_file))?);
            if serving {
                ServingLifecycle::new(manager).cleanup()
            } else {
                TrainingLifecycle::new(manager).cleanup()
            }
        }
        ContainerCommand::Train { env_file, command } => {
            let env = load_environment(Some(&env_file))?;
            let lifecycle = TrainingLifecycle::new(ArtifactManager::from_env(env));
            lifecycle.run(|_| {
                let (program, args) = command
                    .split_first()
                    .ok_or_else(|| Error::msg("no training command given"))?;
                mldock::process::run_status(ProcessCommand::new(program).args(args))
            })
        }
    }
}

fn cmd_local(config_file: &Path, cmd: LocalCommand) -> Result<()> {
    match cmd {
        LocalCommand::Build {
            project,
            tag,
            stage,
            no_cache,
            dry_run,
            docker,
        } => {
            let project = ProjectDoc::load(&project.dir, false)?;
            let tag = resolve_tag(&project, tag.as_deref(), stage.as_deref())?;
            let mut build = DockerBuild::for_project(&project, &tag);
            build.no_cache = no_cache;
            build.run(&docker, dry_run)
        }
        LocalCommand::Stop {
            project,
            tag,
            all,
            dry_run,
            docker,
        } => {
            let ancestor = if all {
                None
            } else {
                let project = ProjectDoc::load(&project.dir, false)?;
                Some(match tag {
                    Some(tag) => format!("{}:{tag}", project.image_name()),
                    None => project.image_name(),
                })
            };
            runner::stop_containers(&docker, ancestor.as_deref(), dry_run)?;
            Ok(())
        }
        LocalCommand::Train(args) => local_run(config_file, args, RunMode::Train, None),
        LocalCommand::Deploy { run, port } => local_run(config_file, run, RunMode::Deploy, Some(port)),
        LocalCommand::Predict {
            host,
            payload,
            content_type,
            output,
        } => {
            let body = runner::predict(&host, &payload, content_type.as_deref())?;
            match output {
                Some(path) => std::fs::write(&path, &body)
                    .map_err(|e| Error::msg(format!("failed to write {}: {e}", path.display()))),
                None => {
                    println!("{}", String::from_utf8_lossy(&body));
                    Ok(())
                }
            }
        }
    }
}

fn resolve_tag(project: &ProjectDoc, tag: Option<&str>, stage: Option<&str>) -> Result<String> {
    match (tag, stage) {
        (Some(tag), _) => Ok(tag.to_string()),
        (None, Some(stage)) => project.stage_tag(stage),
        (None, None) => Ok("latest".to_string()),
    }
}

fn local_run(config_file: &Path, args: RunArgs, mode: RunMode, port: Option<u16>) -> Result<()> {
    let project = ProjectDoc::load(&args.project.dir, false)?;
    let cli = CliConfigDoc::load_or_default(config_file)?;
    let tag = resolve_tag(&project, args.tag.as_deref(), args.stage.as_deref())?;
    let overrides: BTreeMap<String, String> = args
        .env
        .iter()
        .map(String::as_str)
        .map(split_pair)
        .collect::<Result<_>>()?;
    let hp = parse_pairs(&args.params)?;

    let mut run = DockerRun::for_project(&project, &tag, mode)
        .with_credentials(cli.config.local.auth_type, dirs::home_dir().as_deref());
    run.env = env_vars::container_env(&project, &cli.config, args.stage.as_deref(), &hp, &overrides);
    if mode == RunMode::Deploy {
        run.port = port;
    }
    run.run(&args.docker, args.dry_run)
}

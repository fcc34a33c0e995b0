use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use herald::context::{ReleaseContext, Skip};
use herald::events::{EventKind, events_path};
use herald::healthcheck::{self, DEFAULT_TOOLS, ToolCache};
use herald::reporter::Reporter;
use herald::{Outcome, checksums, env, release};
use herald_artifact::{ArtifactType, Artifacts, Filter, MANIFEST_FILE, filter};
use herald_config::{Config, find_config, load_config_from_file};
use herald_hosting::client_for;

#[derive(Parser, Debug)]
#[command(name = "herald", version)]
#[command(about = "Publish build artifacts as a GitHub, GitLab or Gitea release")]
struct Cli {
    /// Project directory holding the dist folder.
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Config file (default: nearest .herald.toml walking up from --dir).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write checksums, create the release and upload the artifacts.
    Publish(RunArgs),
    /// Write the checksum file for the artifacts in the manifest.
    Checksum(RunArgs),
    /// Validate the configuration.
    Check,
    /// Look up the external tools a run needs.
    Healthcheck {
        /// Additional tool to require (repeatable).
        #[arg(long = "tool")]
        tools: Vec<String>,
    },
    /// List the artifacts recorded in the manifest.
    Artifacts {
        /// Only list these kinds, e.g. uploadable_archive (repeatable).
        #[arg(long = "type")]
        kinds: Vec<ArtifactType>,
        /// Only list artifacts with these build IDs (repeatable).
        #[arg(long = "id")]
        ids: Vec<String>,
        /// Print the manifest entries as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Tag to release (default: the tag on HEAD).
    #[arg(long)]
    tag: Option<String>,

    /// Snapshot run: no token is required and nothing is published.
    #[arg(long)]
    snapshot: bool,

    /// Stages to skip: publish, checksum (repeatable or comma separated).
    #[arg(long, value_delimiter = ',')]
    skip: Vec<Skip>,

    /// Do not require a hosting token.
    #[arg(long)]
    skip_token_check: bool,

    /// Concurrent uploads (overrides the config file).
    #[arg(long)]
    parallelism: Option<usize>,
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let dir = fs::canonicalize(&cli.dir)
        .with_context(|| format!("failed to resolve directory {}", cli.dir.display()))?;
    let (config, config_path) = load(&dir, cli.config.as_deref())?;

    let mut reporter = CliReporter;

    match cli.cmd {
        Commands::Publish(args) => {
            let mut ctx = context(config, &dir, &args)?;
            let result = run_publish(&mut ctx, &mut reporter);
            persist(&ctx)?;
            match result {
                Ok(outcome) => print_summary(&ctx, &outcome),
                Err(e) => {
                    if ctx.created_release {
                        reporter.error(&format!(
                            "release {} was created but not completed",
                            ctx.tag
                        ));
                    }
                    return Err(e);
                }
            }
        }
        Commands::Checksum(args) => {
            let mut ctx = context(config, &dir, &args)?;
            ctx.skip_token_check = true;
            env::run(&mut ctx, &mut reporter)?;
            let result = checksums::run(&mut ctx, &mut reporter);
            persist(&ctx)?;
            match result? {
                Outcome::Completed => {
                    let name = ctx.template().apply(&ctx.config.checksum.name_template)?;
                    println!("checksums: {}", ctx.dist().join(name).display());
                }
                Outcome::Skipped(reason) => println!("skipped: {reason}"),
            }
        }
        Commands::Check => {
            config.validate()?;
            match config_path {
                Some(path) => println!("config is valid: {}", path.display()),
                None => println!("config is valid: no config file found, using defaults"),
            }
        }
        Commands::Healthcheck { tools } => {
            let mut needed: Vec<&str> = DEFAULT_TOOLS.to_vec();
            needed.extend(tools.iter().map(String::as_str));
            healthcheck::check_tools(&needed, &ToolCache::new(), &mut reporter)?;
            println!("all needed tools are present");
        }
        Commands::Artifacts { kinds, ids, json } => {
            let ctx = ReleaseContext::new(config, &dir);
            load_manifest(&ctx)?;
            let mut selection = Filter::all();
            if !kinds.is_empty() {
                selection = filter::and([selection, filter::by_types(kinds)]);
            }
            if !ids.is_empty() {
                selection = filter::and([selection, filter::by_ids(ids)]);
            }
            print_artifacts(&ctx.artifacts.filter(&selection), json)?;
        }
    }

    Ok(())
}

/// Config from `explicit`, else the nearest `.herald.toml`, else defaults.
fn load(dir: &Path, explicit: Option<&Path>) -> Result<(Config, Option<PathBuf>)> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                bail!("config file not found: {}", path.display());
            }
            Some(path.to_path_buf())
        }
        None => find_config(dir),
    };
    let config = match &path {
        Some(path) => load_config_from_file(path)?,
        None => Config::default(),
    };
    Ok((config, path))
}

fn context(mut config: Config, dir: &Path, args: &RunArgs) -> Result<ReleaseContext> {
    if let Some(parallelism) = args.parallelism {
        config.parallelism = parallelism;
    }
    config.validate()?;

    let tag = match &args.tag {
        Some(tag) => tag.clone(),
        None => herald_git::current_tag(dir)
            .context("failed to determine the tag to release; pass --tag")?,
    };

    let mut ctx = ReleaseContext::new(config, dir).with_tag(tag);
    if herald_git::is_repo(dir) {
        ctx.previous_tag = herald_git::previous_tag(dir, &ctx.tag).unwrap_or_default();
    }
    ctx.snapshot = args.snapshot;
    ctx.skip_token_check = args.skip_token_check;
    ctx.skips.extend(args.skip.iter().copied());
    // Snapshots never reach the hosting provider.
    if ctx.snapshot {
        ctx.skips.insert(Skip::Publish);
    }
    load_manifest(&ctx)?;
    Ok(ctx)
}

fn manifest_path(ctx: &ReleaseContext) -> PathBuf {
    ctx.dist().join(MANIFEST_FILE)
}

fn load_manifest(ctx: &ReleaseContext) -> Result<()> {
    let path = manifest_path(ctx);
    if !path.exists() {
        return Ok(());
    }
    let json = fs::read_to_string(&path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    ctx.artifacts.extend_from_json(&json)
}

/// Writes the manifest and appends this run's events, whatever the outcome.
fn persist(ctx: &ReleaseContext) -> Result<()> {
    if !ctx.artifacts.is_empty() {
        ctx.artifacts.write_manifest(&manifest_path(ctx))?;
    }
    if !ctx.events.is_empty() {
        ctx.events.write_to_file(&events_path(&ctx.dist()))?;
    }
    Ok(())
}

fn run_publish(ctx: &mut ReleaseContext, reporter: &mut dyn Reporter) -> Result<Outcome> {
    env::run(ctx, reporter)?;
    if let Outcome::Skipped(reason) = release::default(ctx, reporter)? {
        reporter.info(&format!("skipping release: {reason}"));
    }
    checksums::run(ctx, reporter)?;

    if let Some(reason) = release::publish_skip_reason(ctx)? {
        return Ok(release::skip_publish(ctx, reporter, reason));
    }
    let provider = ctx.provider();
    let repo = ctx.config.release.repo(provider).clone();
    let client = client_for(
        provider,
        ctx.config.urls.get(provider),
        ctx.token().unwrap_or_default(),
        &repo.owner,
        &repo.name,
    )?;
    release::publish(ctx, client.as_ref(), reporter)
}

fn print_summary(ctx: &ReleaseContext, outcome: &Outcome) {
    println!("tag: {}", ctx.tag);
    println!("provider: {}", ctx.provider());
    if !ctx.release_url.is_empty() {
        println!("release: {}", ctx.release_url);
    }
    println!("created: {}", ctx.created_release);
    let uploaded = ctx
        .events
        .all_events()
        .iter()
        .filter(|e| matches!(e.kind, EventKind::ArtifactUploaded { .. }))
        .count();
    println!("uploaded: {uploaded}");
    match outcome {
        Outcome::Completed => println!("status: completed"),
        Outcome::Skipped(reason) => println!("status: skipped ({reason})"),
    }
}

fn print_artifacts(artifacts: &Artifacts, json: bool) -> Result<()> {
    if json {
        println!("{}", artifacts.to_json()?);
        return Ok(());
    }
    for artifact in artifacts.list() {
        let platform = match (artifact.os.as_str(), artifact.arch.as_str()) {
            ("", _) => String::new(),
            (os, "") => os.to_string(),
            (os, arch) => format!("{os}/{arch}"),
        };
        println!(
            "{:<32} {:<16} {:<14} {}",
            artifact.name,
            artifact.kind.label(),
            platform,
            artifact.path
        );
    }
    Ok(())
}

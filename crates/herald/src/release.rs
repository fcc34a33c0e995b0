//! Release defaulting and the publish pipeline.
//!
//! [`default`] works out where the release goes. [`publish`] then creates
//! it, uploads the selected artifacts and finalizes it. A created release is
//! never rolled back: a failed upload leaves it as a draft.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, anyhow, bail};
use globset::GlobBuilder;
use herald_artifact::{Artifact, ArtifactType, Artifacts, Filter, filter};
use herald_auth::Provider;
use herald_config::{ExtraFile, ReleaseConfig, Repo};
use herald_git::GitError;
use herald_hosting::{HostingClient, ReleaseId, ReleaseRequest, UploadError, UploadFile};
use herald_retry::{ErrorClass, RetryExecutor};

use crate::Outcome;
use crate::context::{ReleaseContext, Skip};
use crate::events::{EventKind, ReleaseEvent};
use crate::reporter::{CollectingReporter, Reporter};
use crate::tmpl::TemplateEnv;

/// Kinds uploaded to a release, besides extra files.
pub const RELEASE_KINDS: [ArtifactType; 8] = [
    ArtifactType::UploadableArchive,
    ArtifactType::UploadableBinary,
    ArtifactType::UploadableSourceArchive,
    ArtifactType::Checksum,
    ArtifactType::Signature,
    ArtifactType::Certificate,
    ArtifactType::LinuxPackage,
    ArtifactType::Sbom,
];

/// Page of the release for `tag` on `provider`.
pub fn release_url(provider: Provider, download: &str, repo: &Repo, tag: &str) -> String {
    let download = download.trim_end_matches('/');
    match provider {
        Provider::GitLab => format!("{download}/{}/{}/-/releases/{tag}", repo.owner, repo.name),
        Provider::GitHub | Provider::Gitea => {
            format!("{download}/{}/{}/releases/tag/{tag}", repo.owner, repo.name)
        }
    }
}

/// Repository the `origin` remote of `dir` points to.
pub fn repo_from_remote(dir: &Path) -> Result<Repo, GitError> {
    let url = herald_git::remote_url(dir, "origin")?;
    let remote = herald_git::parse_remote(&url)?;
    Ok(Repo::new(remote.owner, remote.name))
}

/// Fills in the repository, release URL and pre-release flag.
pub fn default(ctx: &mut ReleaseContext, reporter: &mut dyn Reporter) -> Result<Outcome> {
    let tmpl = ctx.template();
    if tmpl.eval_bool(&ctx.config.release.disable)? {
        return Ok(Outcome::skipped("release is disabled"));
    }

    if ctx.config.release.configured_providers().len() > 1 {
        bail!("multiple releases are defined. Only one is allowed");
    }

    let provider = ctx.provider();
    if ctx.config.release.repo(provider).is_empty() {
        match repo_from_remote(&ctx.working_dir) {
            Ok(repo) => *ctx.config.release.repo_mut(provider) = repo,
            Err(GitError::NotARepo | GitError::NoRemote) if ctx.snapshot => {
                reporter.warn("no repository found; continuing because this is a snapshot");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let repo = ctx.config.release.repo(provider).clone();
    if !repo.is_empty() {
        let download = ctx.config.urls.download(provider);
        ctx.release_url = release_url(provider, &download, &repo, &ctx.tag);
    }

    ctx.prerelease = if ctx.config.release.prerelease_is_auto() {
        ctx.semver.as_ref().is_some_and(|v| !v.pre.is_empty())
    } else {
        match &ctx.config.release.prerelease {
            Some(value) => tmpl.eval_bool(value)?,
            None => false,
        }
    };

    if !repo.is_empty() {
        reporter.info(&format!("releasing {} to {provider} {repo}", ctx.tag));
    }
    Ok(Outcome::Completed)
}

/// Filter choosing what [`publish`] uploads.
pub fn upload_filter(release: &ReleaseConfig) -> Filter {
    let mut kinds = RELEASE_KINDS.to_vec();
    if release.include_meta {
        kinds.push(ArtifactType::Metadata);
    }
    let mut selection = filter::by_types(kinds);
    if !release.ids.is_empty() {
        selection = filter::and([selection, filter::by_ids(release.ids.clone())]);
    }
    filter::or([selection, filter::by_type(ArtifactType::UploadableFile)])
}

/// Creates the release, uploads the selected artifacts and publishes it.
pub fn publish(
    ctx: &mut ReleaseContext,
    client: &dyn HostingClient,
    reporter: &mut dyn Reporter,
) -> Result<Outcome> {
    if let Some(reason) = publish_skip_reason(ctx)? {
        return Ok(skip_publish(ctx, reporter, reason));
    }

    let tmpl = ctx.template();
    let request = ReleaseRequest {
        tag: ctx.tag.clone(),
        title: tmpl.apply(&ctx.config.release.name_template)?,
        body: ctx.release_notes.clone(),
        prerelease: ctx.prerelease,
    };
    let release = client
        .create_release(&request)
        .with_context(|| format!("failed to create release for {}", ctx.tag))?;
    ctx.created_release = true;
    reporter.info(&format!(
        "created release {}",
        release.url.as_deref().unwrap_or(&release.tag)
    ));
    ctx.events.push(
        EventKind::ReleaseCreated {
            tag: release.tag.clone(),
            url: release.url.clone(),
        },
        &release.tag,
    );

    if tmpl.eval_bool(&ctx.config.release.skip_upload)? {
        return Ok(skip_publish(ctx, reporter, "release.skip_upload is set"));
    }

    add_extra_files(ctx, &tmpl)?;
    ctx.artifacts.refresh()?;
    let selected = ctx
        .artifacts
        .filter(&upload_filter(&ctx.config.release))
        .list();
    upload_all(ctx, client, &release, &selected, reporter)?;

    if ctx.config.release.draft {
        reporter.info("leaving release as a draft");
    } else {
        client
            .publish(&release)
            .with_context(|| format!("failed to publish release {}", release.tag))?;
        ctx.events.push(EventKind::ReleasePublished, &release.tag);
        reporter.info(&format!("published release {}", release.tag));
    }
    Ok(Outcome::Completed)
}

/// Why [`publish`] would not contact the provider at all, if it would not.
pub fn publish_skip_reason(ctx: &ReleaseContext) -> Result<Option<&'static str>> {
    if ctx.template().eval_bool(&ctx.config.release.disable)? {
        return Ok(Some("release is disabled"));
    }
    if ctx.skips(Skip::Publish) {
        return Ok(Some("publish is skipped"));
    }
    Ok(None)
}

/// Records the publish stage as skipped.
pub fn skip_publish(ctx: &mut ReleaseContext, reporter: &mut dyn Reporter, reason: &str) -> Outcome {
    reporter.info(&format!("skipping publish: {reason}"));
    ctx.events.push(
        EventKind::StageSkipped {
            reason: reason.to_string(),
        },
        "publish",
    );
    Outcome::skipped(reason)
}

/// Resolves `release.extra_files` and registers them as uploadable files.
pub fn add_extra_files(ctx: &ReleaseContext, tmpl: &TemplateEnv) -> Result<()> {
    let files = resolve_extra_files(&ctx.working_dir, &ctx.config.release.extra_files, tmpl)?;
    // A manifest from an earlier run may already list these files.
    let names: BTreeSet<String> = files.keys().cloned().collect();
    ctx.artifacts.remove(&filter::and([
        filter::by_type(ArtifactType::UploadableFile),
        Filter::new(move |a| names.contains(&a.name)),
    ]));
    for (name, path) in files {
        ctx.artifacts.add(Artifact::new(
            ArtifactType::UploadableFile,
            name,
            path.to_string_lossy().into_owned(),
        ));
    }
    Ok(())
}

/// Upload name to source file for each configured pattern. A pattern that
/// matches nothing is an error; a later pattern producing the same name
/// replaces the earlier file.
pub fn resolve_extra_files(
    working_dir: &Path,
    extra_files: &[ExtraFile],
    tmpl: &TemplateEnv,
) -> Result<BTreeMap<String, PathBuf>> {
    let mut files = BTreeMap::new();
    for extra in extra_files {
        let pattern = tmpl.apply(&extra.glob)?;
        let matches = glob_files(working_dir, &pattern)
            .with_context(|| format!("globbing failed for pattern {pattern}"))?;
        if matches.is_empty() {
            bail!("globbing failed for pattern {pattern}: no files matched");
        }
        for path in matches {
            let name = match &extra.name {
                Some(template) => tmpl.apply(template)?,
                None => path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            };
            files.insert(name, path);
        }
    }
    Ok(files)
}

fn has_glob_meta(segment: &str) -> bool {
    segment.contains(['*', '?', '[', '{'])
}

/// Regular files under `base` matching `pattern`, in path order.
fn glob_files(base: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let pattern = pattern.strip_prefix("./").unwrap_or(pattern);
    let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .context("invalid glob")?
        .compile_matcher();

    let pattern_path = Path::new(pattern);
    let mut root = PathBuf::new();
    for component in pattern_path.components() {
        match component {
            Component::Normal(segment) if has_glob_meta(&segment.to_string_lossy()) => break,
            other => root.push(other),
        }
    }
    let root = base.join(root);

    let mut candidates = Vec::new();
    if root.is_file() {
        candidates.push(root);
    } else if root.is_dir() {
        walk(&root, &mut candidates)
            .with_context(|| format!("failed to read {}", root.display()))?;
    }

    let mut matched: Vec<PathBuf> = candidates
        .into_iter()
        .filter(|path| {
            let candidate = if pattern_path.is_absolute() {
                path.clone()
            } else {
                path.strip_prefix(base).map(Path::to_path_buf).unwrap_or_else(|_| path.clone())
            };
            matcher.is_match(candidate.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    matched.sort();
    Ok(matched)
}

/// Symlinked directories are not descended into.
fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            walk(&path, out)?;
        } else if file_type.is_file() || (file_type.is_symlink() && path.is_file()) {
            out.push(path);
        }
    }
    Ok(())
}

/// What one upload worker produced, replayed in registry order.
struct UploadReport {
    reporter: CollectingReporter,
    events: Vec<ReleaseEvent>,
    result: Result<()>,
}

fn upload_all(
    ctx: &mut ReleaseContext,
    client: &dyn HostingClient,
    release: &ReleaseId,
    artifacts: &[Arc<Artifact>],
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let executor = RetryExecutor::new(ctx.config.retry.clone());
    let parallelism = ctx.config.parallelism.max(1);
    let registry = Arc::clone(&ctx.artifacts);

    reporter.info(&format!(
        "uploading {} artifacts (max concurrent: {parallelism})",
        artifacts.len()
    ));

    let mut first_error = None;
    for chunk in artifacts.chunks(parallelism) {
        let joined: Vec<thread::Result<UploadReport>> = thread::scope(|scope| {
            let handles: Vec<_> = chunk
                .iter()
                .map(|artifact| {
                    let executor = &executor;
                    let registry = &registry;
                    scope.spawn(move || upload_one(client, executor, registry, release, artifact))
                })
                .collect();
            handles.into_iter().map(|h| h.join()).collect()
        });

        for report in joined {
            let report = report.map_err(|_| anyhow!("upload thread panicked"))?;
            report.reporter.replay_into(reporter);
            ctx.events.extend(report.events);
            if let Err(e) = report.result
                && first_error.is_none()
            {
                first_error = Some(e);
            }
        }
        if first_error.is_some() {
            break;
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn upload_one(
    client: &dyn HostingClient,
    executor: &RetryExecutor,
    registry: &Artifacts,
    release: &ReleaseId,
    artifact: &Artifact,
) -> UploadReport {
    let mut log = CollectingReporter::new();
    let mut events = Vec::new();
    let name = artifact.name.clone();
    let path = registry.resolve(artifact);

    let unusable = match fs::metadata(&path) {
        Ok(metadata) if metadata.is_file() => None,
        Ok(_) => Some("not a regular file".to_string()),
        Err(e) => Some(e.to_string()),
    };
    if let Some(message) = unusable {
        events.push(ReleaseEvent::now(
            EventKind::UploadFailed {
                attempts: 0,
                class: ErrorClass::Permanent,
                message: message.clone(),
            },
            &name,
        ));
        return UploadReport {
            reporter: log,
            events,
            result: Err(anyhow!("failed to upload {name}: {message}")),
        };
    }

    let file = UploadFile {
        name: name.clone(),
        path,
    };
    log.info(&format!("uploading {name}"));
    let outcome = executor.run_classified(
        |attempt| client.upload(release, &file).map(|()| attempt),
        |e: &UploadError| e.class,
        |attempt, e, delay| {
            log.warn(&format!(
                "upload of {name} failed (attempt {attempt}): {e}; retrying in {delay:?}"
            ));
            events.push(ReleaseEvent::now(
                EventKind::UploadRetried {
                    attempt,
                    delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    message: e.to_string(),
                },
                &name,
            ));
        },
    );

    let result = match outcome {
        Ok(attempts) => {
            events.push(ReleaseEvent::now(EventKind::ArtifactUploaded { attempts }, &name));
            Ok(())
        }
        Err(err) => {
            log.error(&format!("failed to upload {name}: {}", err.error));
            events.push(ReleaseEvent::now(
                EventKind::UploadFailed {
                    attempts: err.attempts,
                    class: err.class,
                    message: err.error.to_string(),
                },
                &name,
            ));
            Err(anyhow!("failed to upload {name} {err}"))
        }
    };

    UploadReport {
        reporter: log,
        events,
        result,
    }
}

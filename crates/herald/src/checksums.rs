//! Checksum sidecar file listing the digest of every uploadable artifact.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use herald_artifact::{Artifact, ArtifactType, Artifacts, Filter, filter};
use herald_config::ChecksumConfig;
use herald_digest::Algorithm;

use crate::Outcome;
use crate::context::{ReleaseContext, Skip};
use crate::events::EventKind;
use crate::reporter::Reporter;

/// Kinds listed in the sidecar.
pub const CHECKSUM_KINDS: [ArtifactType; 6] = [
    ArtifactType::UploadableArchive,
    ArtifactType::UploadableBinary,
    ArtifactType::UploadableSourceArchive,
    ArtifactType::LinuxPackage,
    ArtifactType::Sbom,
    ArtifactType::UploadableFile,
];

pub fn checksum_filter(config: &ChecksumConfig) -> Filter {
    let selection = filter::by_types(CHECKSUM_KINDS);
    if config.ids.is_empty() {
        selection
    } else {
        filter::and([selection, filter::by_ids(config.ids.clone())])
    }
}

/// Everything needed to regenerate the sidecar later. Holds the registry
/// weakly since the registry owns the hook holding this.
struct Sidecar {
    registry: Weak<Artifacts>,
    selection: Filter,
    algorithm: Algorithm,
    path: PathBuf,
}

impl Sidecar {
    fn refresh(&self) -> Result<()> {
        match self.registry.upgrade() {
            Some(registry) => {
                write_checksums(&registry, &self.selection, self.algorithm, &self.path)?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Writes `<dist>/<checksum.name_template>` and registers it as a
/// [`ArtifactType::Checksum`] artifact that regenerates on refresh.
pub fn run(ctx: &mut ReleaseContext, reporter: &mut dyn Reporter) -> Result<Outcome> {
    let reason = if ctx.config.checksum.disable {
        Some("checksum.disable is set")
    } else if ctx.skips(Skip::Checksum) {
        Some("checksum is skipped")
    } else {
        None
    };
    if let Some(reason) = reason {
        reporter.info(&format!("skipping checksum: {reason}"));
        ctx.events.push(
            EventKind::StageSkipped {
                reason: reason.to_string(),
            },
            "checksum",
        );
        return Ok(Outcome::skipped(reason));
    }

    let name = ctx.template().apply(&ctx.config.checksum.name_template)?;
    let sidecar = Sidecar {
        registry: Arc::downgrade(&ctx.artifacts),
        selection: checksum_filter(&ctx.config.checksum),
        algorithm: ctx.config.checksum.algorithm,
        path: ctx.dist().join(&name),
    };

    let count = write_checksums(
        &ctx.artifacts,
        &sidecar.selection,
        sidecar.algorithm,
        &sidecar.path,
    )?;
    reporter.info(&format!(
        "wrote {count} {} checksums to {}",
        sidecar.algorithm,
        sidecar.path.display()
    ));

    let artifact = Artifact::new(
        ArtifactType::Checksum,
        name,
        sidecar.path.to_string_lossy().into_owned(),
    );
    // A manifest from an earlier run may already list this sidecar.
    let previous = artifact.name.clone();
    ctx.artifacts.remove(&filter::and([
        filter::by_type(ArtifactType::Checksum),
        Filter::new(move |a| a.name == previous),
    ]));
    ctx.artifacts
        .add_with_refresh(artifact, Arc::new(move || sidecar.refresh()));
    Ok(Outcome::Completed)
}

/// Writes one `"<hex>  <name>"` line per selected file, sorted by name.
/// Returns how many lines were written.
pub fn write_checksums(
    registry: &Artifacts,
    selection: &Filter,
    algorithm: Algorithm,
    path: &Path,
) -> Result<usize> {
    let base = registry.working_dir().map(PathBuf::from).unwrap_or_default();
    let mut lines = Vec::new();
    for artifact in registry.filter(selection).list() {
        if registry.resolve(&artifact).is_dir() {
            continue;
        }
        let hex = artifact.checksum_in(&base, algorithm)?;
        lines.push((artifact.name.clone(), hex));
    }
    lines.sort();

    let mut contents = String::new();
    for (name, hex) in &lines {
        contents.push_str(&format!("{hex}  {name}\n"));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(lines.len())
}

//! Composable artifact predicates.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::artifact::Artifact;
use crate::kind::ArtifactType;
use crate::registry::Artifacts;

/// ARM variant assumed for toolchains without variant selection.
pub const DEFAULT_ARM: &str = "6";
/// AMD64 level assumed for toolchains without variant selection.
pub const DEFAULT_AMD64: &str = "v1";

const VARIANTLESS_BUILDERS: [&str; 2] = ["zig", "rust"];

/// A shareable predicate over artifacts.
#[derive(Clone)]
pub struct Filter(Arc<dyn Fn(&Artifact) -> bool + Send + Sync>);

impl Filter {
    pub fn new(predicate: impl Fn(&Artifact) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    /// Matches every artifact.
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    pub fn matches(&self, artifact: &Artifact) -> bool {
        (self.0)(artifact)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Filter")
    }
}

/// True when any filter matches; an empty set matches nothing.
pub fn or(filters: impl IntoIterator<Item = Filter>) -> Filter {
    let filters: Vec<Filter> = filters.into_iter().collect();
    Filter::new(move |a| filters.iter().any(|f| f.matches(a)))
}

/// True when every filter matches; an empty set matches everything.
pub fn and(filters: impl IntoIterator<Item = Filter>) -> Filter {
    let filters: Vec<Filter> = filters.into_iter().collect();
    Filter::new(move |a| filters.iter().all(|f| f.matches(a)))
}

pub fn by_os(os: impl Into<String>) -> Filter {
    let os = os.into();
    Filter::new(move |a| a.os == os)
}

pub fn by_arch(arch: impl Into<String>) -> Filter {
    let arch = arch.into();
    Filter::new(move |a| a.arch == arch)
}

fn is_variantless(artifact: &Artifact) -> bool {
    artifact
        .builder()
        .is_some_and(|b| VARIANTLESS_BUILDERS.contains(&b.as_str()))
}

/// Matches the ARM variant. Artifacts built by zig or rust count as
/// [`DEFAULT_ARM`].
pub fn by_arm(arm: impl Into<String>) -> Filter {
    let arm = arm.into();
    Filter::new(move |a| {
        if is_variantless(a) {
            arm == DEFAULT_ARM
        } else {
            a.arm == arm
        }
    })
}

/// Matches the AMD64 level. Artifacts built by zig or rust count as
/// [`DEFAULT_AMD64`].
pub fn by_amd64(amd64: impl Into<String>) -> Filter {
    let amd64 = amd64.into();
    Filter::new(move |a| {
        if is_variantless(a) {
            amd64 == DEFAULT_AMD64
        } else {
            a.amd64 == amd64
        }
    })
}

pub fn by_type(kind: ArtifactType) -> Filter {
    Filter::new(move |a| a.kind == kind)
}

/// Any of the given kinds.
pub fn by_types(kinds: impl IntoIterator<Item = ArtifactType>) -> Filter {
    or(kinds.into_iter().map(by_type))
}

/// Matches the `Format` extra against any of `formats`.
pub fn by_formats<S: Into<String>>(formats: impl IntoIterator<Item = S>) -> Filter {
    let formats: HashSet<String> = formats.into_iter().map(Into::into).collect();
    Filter::new(move |a| a.format().is_some_and(|f| formats.contains(&f)))
}

/// Matches the `Ext` extra, ignoring a leading `.` on either side.
pub fn by_exts<S: Into<String>>(exts: impl IntoIterator<Item = S>) -> Filter {
    let exts: HashSet<String> = exts
        .into_iter()
        .map(|e| e.into().trim_start_matches('.').to_string())
        .collect();
    Filter::new(move |a| {
        let actual = a.ext().unwrap_or_default();
        exts.contains(actual.trim_start_matches('.'))
    })
}

/// Kinds that describe the whole release rather than one build.
const RELEASE_WIDE: [ArtifactType; 4] = [
    ArtifactType::Checksum,
    ArtifactType::UploadableSourceArchive,
    ArtifactType::UploadableFile,
    ArtifactType::Metadata,
];

/// Matches artifacts whose `ID` is in `ids`, plus release-wide kinds
/// regardless of their ID. An empty set matches nothing.
pub fn by_ids<S: Into<String>>(ids: impl IntoIterator<Item = S>) -> Filter {
    let ids: HashSet<String> = ids.into_iter().map(Into::into).collect();
    if ids.is_empty() {
        return or([]);
    }
    Filter::new(move |a| RELEASE_WIDE.contains(&a.kind) || a.id().is_some_and(|id| ids.contains(&id)))
}

/// Drops universal binaries that explicitly did not replace the
/// single-arch builds.
pub fn only_replacing_unibins() -> Filter {
    Filter::new(|a| a.replaces().unwrap_or(true))
}

/// Paths already claimed by uploadable binaries.
#[derive(Debug, Clone, Default)]
pub struct BinaryPathIndex {
    claimed: HashSet<String>,
}

impl BinaryPathIndex {
    pub fn build(artifacts: &Artifacts) -> Self {
        let claimed = artifacts
            .list()
            .iter()
            .filter(|a| a.kind == ArtifactType::UploadableBinary)
            .map(|a| a.path.clone())
            .collect();
        Self { claimed }
    }

    pub fn is_claimed(&self, path: &str) -> bool {
        self.claimed.contains(path)
    }

    /// Binary-like artifacts, minus plain or universal binaries whose file
    /// is already published as an uploadable binary.
    pub fn into_filter(self) -> Filter {
        Filter::new(move |a| match a.kind {
            ArtifactType::UploadableBinary => true,
            ArtifactType::Binary | ArtifactType::UniversalBinary => !self.is_claimed(&a.path),
            _ => false,
        })
    }
}

/// [`BinaryPathIndex`] over the current contents of `artifacts`, as a filter.
pub fn by_binary_like(artifacts: &Artifacts) -> Filter {
    BinaryPathIndex::build(artifacts).into_filter()
}

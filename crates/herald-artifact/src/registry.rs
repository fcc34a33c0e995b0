//! The concurrent, insertion-ordered artifact registry.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};

use crate::artifact::{Artifact, clean_name};
use crate::filter::Filter;
use crate::kind::ArtifactType;

/// File name of the persisted manifest inside the dist directory.
pub const MANIFEST_FILE: &str = "artifacts.json";

/// Recomputes an artifact's file in place.
pub type RefreshHook = Arc<dyn Fn() -> Result<()> + Send + Sync>;

#[derive(Default)]
struct RefreshHooks {
    hooks: Mutex<Vec<(Arc<Artifact>, RefreshHook)>>,
}

impl RefreshHooks {
    fn register(&self, artifact: Arc<Artifact>, hook: RefreshHook) {
        lock(&self.hooks).push((artifact, hook));
    }

    fn lookup(&self, artifact: &Arc<Artifact>) -> Option<RefreshHook> {
        lock(&self.hooks)
            .iter()
            .find(|(a, _)| Arc::ptr_eq(a, artifact))
            .map(|(_, hook)| Arc::clone(hook))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Ordered collection of every artifact produced in one invocation.
///
/// All operations serialize on one lock per registry. Filters run on a
/// snapshot, outside the lock.
pub struct Artifacts {
    items: Mutex<Vec<Arc<Artifact>>>,
    hooks: Arc<RefreshHooks>,
    working_dir: Option<PathBuf>,
}

impl Default for Artifacts {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Artifacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifacts")
            .field("items", &*lock(&self.items))
            .field("working_dir", &self.working_dir)
            .finish()
    }
}

impl Artifacts {
    /// Empty registry relativizing paths against the current directory.
    pub fn new() -> Self {
        Self::with_working_dir(std::env::current_dir().ok())
    }

    /// Empty registry relativizing paths against `working_dir`, or leaving
    /// them untouched when `None`.
    pub fn with_working_dir(working_dir: Option<PathBuf>) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            hooks: Arc::new(RefreshHooks::default()),
            working_dir,
        }
    }

    fn derived(&self, items: Vec<Arc<Artifact>>) -> Self {
        Self {
            items: Mutex::new(items),
            hooks: Arc::clone(&self.hooks),
            working_dir: self.working_dir.clone(),
        }
    }

    fn normalize(&self, mut artifact: Artifact) -> Artifact {
        artifact.name = clean_name(&artifact.name);
        if !artifact.kind.is_container()
            && let Some(cwd) = &self.working_dir
            && Path::new(&artifact.path).is_absolute()
            && let Ok(rel) = Path::new(&artifact.path).strip_prefix(cwd)
            && !rel.as_os_str().is_empty()
        {
            artifact.path = rel.to_string_lossy().into_owned();
        }
        if std::path::MAIN_SEPARATOR != '/' {
            artifact.path = artifact.path.replace(std::path::MAIN_SEPARATOR, "/");
        }
        artifact
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Location of `artifact`'s file on disk.
    pub fn resolve(&self, artifact: &Artifact) -> PathBuf {
        match &self.working_dir {
            Some(dir) if !artifact.kind.is_container() => dir.join(&artifact.path),
            _ => PathBuf::from(&artifact.path),
        }
    }

    /// Normalize and append. Duplicates are accepted.
    pub fn add(&self, artifact: Artifact) -> Arc<Artifact> {
        let artifact = Arc::new(self.normalize(artifact));
        lock(&self.items).push(Arc::clone(&artifact));
        artifact
    }

    /// Like [`Artifacts::add`], registering `hook` to regenerate the file on
    /// [`Artifacts::refresh`].
    pub fn add_with_refresh(&self, artifact: Artifact, hook: RefreshHook) -> Arc<Artifact> {
        let artifact = self.add(artifact);
        self.hooks.register(Arc::clone(&artifact), hook);
        artifact
    }

    /// Snapshot of the current contents in insertion order.
    pub fn list(&self) -> Vec<Arc<Artifact>> {
        lock(&self.items).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }

    /// Drop every artifact matching `filter`.
    pub fn remove(&self, filter: &Filter) {
        let snapshot = self.list();
        let doomed: Vec<Arc<Artifact>> = snapshot
            .into_iter()
            .filter(|a| filter.matches(a))
            .collect();
        if doomed.is_empty() {
            return;
        }
        lock(&self.items).retain(|a| !doomed.iter().any(|d| Arc::ptr_eq(a, d)));
    }

    /// New registry holding the matching artifacts. The receiver is untouched.
    pub fn filter(&self, filter: &Filter) -> Artifacts {
        let matching = self
            .list()
            .into_iter()
            .filter(|a| filter.matches(a))
            .collect();
        self.derived(matching)
    }

    /// Artifacts keyed by their `ID` extra. Artifacts without one are left out.
    pub fn group_by_id(&self) -> BTreeMap<String, Vec<Arc<Artifact>>> {
        let mut groups: BTreeMap<String, Vec<Arc<Artifact>>> = BTreeMap::new();
        for artifact in self.list() {
            if let Some(id) = artifact.id().filter(|id| !id.is_empty()) {
                groups.entry(id).or_default().push(artifact);
            }
        }
        groups
    }

    /// Artifacts keyed by `os + arch`, or by `os + arch + arm + mips + amd64`
    /// when more than one ARM, MIPS or AMD64 variant is present.
    pub fn group_by_platform(&self) -> BTreeMap<String, Vec<Arc<Artifact>>> {
        let mut simple: BTreeMap<String, Vec<Arc<Artifact>>> = BTreeMap::new();
        let mut specific: BTreeMap<String, Vec<Arc<Artifact>>> = BTreeMap::new();
        let mut arms = BTreeSet::new();
        let mut mipses = BTreeSet::new();
        let mut amd64s = BTreeSet::new();

        for artifact in self.list() {
            let platform = format!("{}{}", artifact.os, artifact.arch);
            let full = format!(
                "{platform}{}{}{}",
                artifact.arm, artifact.mips, artifact.amd64
            );
            for (seen, value) in [
                (&mut arms, &artifact.arm),
                (&mut mipses, &artifact.mips),
                (&mut amd64s, &artifact.amd64),
            ] {
                if !value.is_empty() {
                    seen.insert(value.clone());
                }
            }
            simple.entry(platform).or_default().push(Arc::clone(&artifact));
            specific.entry(full).or_default().push(artifact);
        }

        if arms.len() > 1 || mipses.len() > 1 || amd64s.len() > 1 {
            specific
        } else {
            simple
        }
    }

    /// Run the refresh hooks of checksum artifacts, stopping at the first
    /// failure.
    pub fn refresh(&self) -> Result<()> {
        self.visit(|artifact| {
            if artifact.kind != ArtifactType::Checksum {
                return Ok(());
            }
            if let Some(hook) = self.hooks.lookup(artifact) {
                hook().with_context(|| format!("failed to refresh {:?}", artifact.name))?;
            }
            Ok(())
        })
    }

    /// Apply `visitor` to each artifact in order, stopping at the first error.
    pub fn visit<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(&Arc<Artifact>) -> Result<()>,
    {
        for artifact in self.list() {
            visitor(&artifact)?;
        }
        Ok(())
    }

    pub fn paths(&self) -> Vec<String> {
        self.list().iter().map(|a| a.path.clone()).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        let items = self.list();
        let plain: Vec<&Artifact> = items.iter().map(|a| a.as_ref()).collect();
        serde_json::to_string_pretty(&plain).context("failed to serialize artifacts")
    }

    /// Append every artifact in a JSON manifest.
    pub fn extend_from_json(&self, json: &str) -> Result<()> {
        let parsed: Vec<Artifact> =
            serde_json::from_str(json).context("failed to parse artifact manifest")?;
        for artifact in parsed {
            self.add(artifact);
        }
        Ok(())
    }

    pub fn write_manifest(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        fs::write(path, self.to_json()?)
            .with_context(|| format!("failed to write manifest {}", path.display()))
    }

    pub fn load_manifest(path: &Path, working_dir: Option<PathBuf>) -> Result<Artifacts> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        let artifacts = Artifacts::with_working_dir(working_dir);
        artifacts.extend_from_json(&json)?;
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extras::ExtraKey;
    use crate::filter::{by_os, by_type};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn registry() -> Artifacts {
        Artifacts::with_working_dir(None)
    }

    fn bin(name: &str, os: &str, arch: &str) -> Artifact {
        Artifact::new(ArtifactType::Binary, name, format!("dist/{name}"))
            .with_os(os)
            .with_arch(arch)
    }

    fn names(artifacts: &Artifacts) -> Vec<String> {
        artifacts.list().iter().map(|a| a.name.clone()).collect()
    }

    #[test]
    fn add_preserves_order_and_duplicates() {
        let r = registry();
        r.add(bin("a", "linux", "amd64"));
        r.add(bin("b", "linux", "amd64"));
        r.add(bin("a", "linux", "amd64"));
        assert_eq!(names(&r), vec!["a", "b", "a"]);
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn add_cleans_names() {
        let r = registry();
        let added = r.add(Artifact::new(ArtifactType::UploadableArchive, " foo .tar.gz", "foo.tar.gz"));
        assert_eq!(added.name, "foo .tar.gz");
        let added = r.add(Artifact::new(ArtifactType::UploadableArchive, "bar  .zip", "bar.zip"));
        assert_eq!(added.name, "bar.zip");
    }

    #[test]
    fn add_relativizes_paths_under_working_dir() {
        let td = tempfile::tempdir().unwrap();
        let r = Artifacts::with_working_dir(Some(td.path().to_path_buf()));
        let inside = td.path().join("dist").join("app");
        let added = r.add(Artifact::new(
            ArtifactType::Binary,
            "app",
            inside.to_string_lossy().into_owned(),
        ));
        assert_eq!(added.path, "dist/app");

        let outside = r.add(Artifact::new(ArtifactType::Binary, "x", "/elsewhere/x"));
        assert_eq!(outside.path, "/elsewhere/x");

        let image = td.path().join("img");
        let docker = r.add(Artifact::new(
            ArtifactType::DockerImage,
            "img",
            image.to_string_lossy().into_owned(),
        ));
        assert_eq!(docker.path, image.to_string_lossy());

        assert_eq!(r.resolve(&added), inside);
        assert_eq!(r.resolve(&outside), PathBuf::from("/elsewhere/x"));
        assert_eq!(r.resolve(&docker), image);
    }

    #[test]
    fn filter_returns_a_new_collection() {
        let r = registry();
        r.add(bin("a", "linux", "amd64"));
        r.add(bin("b", "darwin", "arm64"));
        r.add(bin("c", "linux", "arm64"));

        let linux = r.filter(&by_os("linux"));
        assert_eq!(names(&linux), vec!["a", "c"]);
        linux.add(bin("d", "linux", "386"));
        assert_eq!(names(&r), vec!["a", "b", "c"]);

        let all = r.filter(&Filter::all());
        all.add(bin("e", "linux", "386"));
        assert_eq!(r.len(), 3);
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn remove_keeps_non_matching_in_order() {
        let r = registry();
        r.add(bin("a", "linux", "amd64"));
        r.add(bin("b", "darwin", "arm64"));
        r.add(bin("c", "linux", "arm64"));
        r.remove(&by_os("linux"));
        assert_eq!(names(&r), vec!["b"]);
        r.remove(&by_os("plan9"));
        assert_eq!(names(&r), vec!["b"]);
    }

    #[test]
    fn group_by_id_skips_missing_ids() {
        let r = registry();
        r.add(bin("a", "linux", "amd64").with_extra(ExtraKey::Id, "cli"));
        r.add(bin("b", "linux", "arm64").with_extra(ExtraKey::Id, "cli"));
        r.add(bin("c", "linux", "arm64").with_extra(ExtraKey::Id, "server"));
        r.add(bin("d", "linux", "arm64"));
        let groups = r.group_by_id();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["cli"].len(), 2);
        assert_eq!(groups["server"][0].name, "c");
    }

    #[test]
    fn group_by_platform_simple_keys_without_variant_diversity() {
        let r = registry();
        r.add(bin("a", "linux", "amd64").with_amd64("v1"));
        r.add(bin("b", "linux", "arm64"));
        r.add(bin("c", "linux", "amd64").with_amd64("v1"));
        let groups = r.group_by_platform();
        let keys: Vec<_> = groups.keys().cloned().collect();
        assert_eq!(keys, vec!["linuxamd64", "linuxarm64"]);
        assert_eq!(groups["linuxamd64"].len(), 2);
    }

    #[test]
    fn group_by_platform_specific_keys_with_two_arm_variants() {
        let r = registry();
        r.add(bin("a", "linux", "amd64"));
        r.add(bin("b", "linux", "arm64"));
        r.add(bin("c", "linux", "arm").with_arm("6"));
        r.add(bin("d", "linux", "arm").with_arm("7"));
        let groups = r.group_by_platform();
        let keys: Vec<_> = groups.keys().cloned().collect();
        assert_eq!(keys, vec!["linuxamd64", "linuxarm6", "linuxarm64", "linuxarm7"]);
    }

    #[test]
    fn refresh_runs_checksum_hooks_only() {
        let r = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        r.add_with_refresh(
            Artifact::new(ArtifactType::Checksum, "checksums.txt", "dist/checksums.txt"),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        r.add_with_refresh(
            Artifact::new(ArtifactType::Binary, "bin", "dist/bin"),
            Arc::new(|| anyhow::bail!("binaries never refresh")),
        );
        r.refresh().unwrap();
        r.filter(&by_type(ArtifactType::Checksum)).refresh().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn refresh_stops_at_first_failure() {
        let r = registry();
        let later = Arc::new(AtomicUsize::new(0));
        let later_counter = Arc::clone(&later);
        r.add_with_refresh(
            Artifact::new(ArtifactType::Checksum, "sums.txt", "dist/sums.txt"),
            Arc::new(|| anyhow::bail!("disk full")),
        );
        r.add_with_refresh(
            Artifact::new(ArtifactType::Checksum, "other.txt", "dist/other.txt"),
            Arc::new(move || {
                later_counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        let err = r.refresh().unwrap_err();
        assert_eq!(format!("{err:#}"), "failed to refresh \"sums.txt\": disk full");
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn paths_and_visit() {
        let r = registry();
        r.add(bin("a", "linux", "amd64"));
        r.add(bin("b", "linux", "amd64"));
        assert_eq!(r.paths(), vec!["dist/a", "dist/b"]);

        let mut seen = Vec::new();
        let err = r
            .visit(|a| {
                seen.push(a.name.clone());
                anyhow::bail!("stop at {}", a.name)
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "stop at a");
        assert_eq!(seen, vec!["a"]);
    }

    #[test]
    fn manifest_round_trip_keeps_order_and_extras() {
        let td = tempfile::tempdir().unwrap();
        let r = registry();
        r.add(bin("a", "linux", "amd64").with_extra(ExtraKey::Id, "cli"));
        r.add(Artifact::new(ArtifactType::Checksum, "checksums.txt", "dist/checksums.txt"));
        let path = td.path().join("dist").join(MANIFEST_FILE);
        r.write_manifest(&path).unwrap();

        let loaded = Artifacts::load_manifest(&path, None).unwrap();
        assert_eq!(names(&loaded), vec!["a", "checksums.txt"]);
        let first = &loaded.list()[0];
        assert_eq!(first.id().as_deref(), Some("cli"));
        assert_eq!(first.os, "linux");
        assert_eq!(loaded.list()[1].kind, ArtifactType::Checksum);
    }

    #[test]
    fn concurrent_adds_are_all_recorded() {
        let r = Arc::new(registry());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let r = Arc::clone(&r);
                thread::spawn(move || {
                    for i in 0..50 {
                        r.add(bin(&format!("{t}-{i}"), "linux", "amd64"));
                        let _ = r.filter(&by_os("linux")).len();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(r.len(), 400);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn filter_never_mutates_source(oses in proptest::collection::vec(prop_oneof!["linux", "darwin", "windows"], 0..40)) {
                let r = registry();
                for (i, os) in oses.iter().enumerate() {
                    r.add(bin(&format!("a{i}"), os, "amd64"));
                }
                let before = names(&r);
                let linux = r.filter(&by_os("linux"));
                prop_assert_eq!(names(&r), before);
                prop_assert_eq!(linux.len(), oses.iter().filter(|o| *o == "linux").count());
            }
        }
    }
}

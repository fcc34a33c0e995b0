//! Artifact model and registry for herald.
//!
//! Every file a release produces is recorded as an [`Artifact`] in a shared
//! [`Artifacts`] registry. Downstream stages query the registry through
//! composable [`Filter`]s and group it by build ID or platform.
//!
//! ```
//! use herald_artifact::{Artifact, ArtifactType, Artifacts, ExtraKey, filter};
//!
//! let artifacts = Artifacts::with_working_dir(None);
//! artifacts.add(
//!     Artifact::new(ArtifactType::UploadableArchive, "app_linux.tar.gz", "dist/app_linux.tar.gz")
//!         .with_os("linux")
//!         .with_extra(ExtraKey::Id, "app"),
//! );
//! let selected = artifacts.filter(&filter::and([
//!     filter::by_type(ArtifactType::UploadableArchive),
//!     filter::by_ids(["app"]),
//! ]));
//! assert_eq!(selected.len(), 1);
//! ```

mod artifact;
mod extras;
/// Predicates and combinators.
pub mod filter;
mod kind;
mod registry;

pub use artifact::Artifact;
pub use extras::{ExtraError, ExtraKey, Extras};
pub use filter::{BinaryPathIndex, Filter};
pub use kind::ArtifactType;
pub use registry::{Artifacts, MANIFEST_FILE, RefreshHook};

pub use herald_digest::Algorithm;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Classification of a tracked build output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    /// A tar.gz/zip archive to be uploaded.
    UploadableArchive,
    /// A binary uploaded as-is.
    UploadableBinary,
    /// Any other file to be uploaded.
    UploadableFile,
    /// Raw build output.
    Binary,
    /// A binary bundling several architectures.
    UniversalBinary,
    LinuxPackage,
    /// A snap yet to be published.
    PublishableSnapcraft,
    Snapcraft,
    /// A container image yet to be pushed.
    PublishableDockerImage,
    DockerImage,
    DockerManifest,
    Checksum,
    Signature,
    Certificate,
    /// Archive of the tagged commit's source tree.
    UploadableSourceArchive,
    BrewTap,
    Nixpkg,
    WingetInstaller,
    WingetDefaultLocale,
    WingetVersion,
    #[serde(rename = "pkgbuild")]
    PkgBuild,
    #[serde(rename = "srcinfo")]
    SrcInfo,
    KrewPluginManifest,
    ScoopManifest,
    #[serde(rename = "sbom")]
    Sbom,
    PublishableChocolatey,
    #[serde(rename = "c_header")]
    Header,
    CArchive,
    CShared,
    /// Release metadata JSON.
    Metadata,
}

impl ArtifactType {
    /// Human readable category, used for display only.
    pub fn label(&self) -> &'static str {
        match self {
            ArtifactType::UploadableArchive => "Archive",
            ArtifactType::UploadableFile => "File",
            ArtifactType::UploadableBinary | ArtifactType::Binary | ArtifactType::UniversalBinary => {
                "Binary"
            }
            ArtifactType::LinuxPackage => "Linux Package",
            ArtifactType::PublishableDockerImage => "Docker Image",
            ArtifactType::DockerImage => "Published Docker Image",
            ArtifactType::DockerManifest => "Docker Manifest",
            ArtifactType::PublishableSnapcraft | ArtifactType::Snapcraft => "Snap",
            ArtifactType::Checksum => "Checksum",
            ArtifactType::Signature => "Signature",
            ArtifactType::Certificate => "Certificate",
            ArtifactType::UploadableSourceArchive => "Source",
            ArtifactType::BrewTap => "Brew Tap",
            ArtifactType::KrewPluginManifest => "Krew Plugin Manifest",
            ArtifactType::ScoopManifest => "Scoop Manifest",
            ArtifactType::Sbom => "SBOM",
            ArtifactType::PkgBuild => "PKGBUILD",
            ArtifactType::SrcInfo => "SRCINFO",
            ArtifactType::PublishableChocolatey => "Chocolatey",
            ArtifactType::Header => "C Header",
            ArtifactType::CArchive => "C Archive Library",
            ArtifactType::CShared => "C Shared Library",
            ArtifactType::WingetInstaller
            | ArtifactType::WingetDefaultLocale
            | ArtifactType::WingetVersion => "Winget Manifest",
            ArtifactType::Nixpkg => "Nixpkg",
            ArtifactType::Metadata => "Metadata",
        }
    }

    /// Container kinds reference a registry, not a local file, so their
    /// paths are never rewritten.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            ArtifactType::DockerImage
                | ArtifactType::DockerManifest
                | ArtifactType::PublishableDockerImage
        )
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Parses the manifest name of a kind, e.g. `uploadable_archive`.
impl FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.trim().to_string()))
            .map_err(|_| format!("unknown artifact type: {s}"))
    }
}

use std::fmt;
use std::path::Path;

use herald_digest::{Algorithm, DigestError, digest_file};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extras::{ExtraKey, Extras};
use crate::kind::ArtifactType;

/// One tracked build output.
///
/// Identity and platform fields are plain data; once an artifact is added to
/// a registry it is shared behind an `Arc` and only [`Artifact::extra`] can
/// change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub os: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub amd64: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub i386: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arm: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arm64: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mips: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ppc64: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub riscv64: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(rename = "type")]
    pub kind: ArtifactType,
    #[serde(default, skip_serializing_if = "Extras::is_empty")]
    pub extra: Extras,
}

impl Artifact {
    pub fn new(kind: ArtifactType, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            os: String::new(),
            arch: String::new(),
            amd64: String::new(),
            i386: String::new(),
            arm: String::new(),
            arm64: String::new(),
            mips: String::new(),
            ppc64: String::new(),
            riscv64: String::new(),
            target: String::new(),
            kind,
            extra: Extras::new(),
        }
    }

    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = os.into();
        self
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    pub fn with_arm(mut self, arm: impl Into<String>) -> Self {
        self.arm = arm.into();
        self
    }

    pub fn with_amd64(mut self, amd64: impl Into<String>) -> Self {
        self.amd64 = amd64.into();
        self
    }

    pub fn with_mips(mut self, mips: impl Into<String>) -> Self {
        self.mips = mips.into();
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_extra(self, key: impl AsRef<str>, value: impl Into<Value>) -> Self {
        self.extra.set(key, value);
        self
    }

    pub fn id(&self) -> Option<String> {
        self.extra.string(ExtraKey::Id)
    }

    pub fn format(&self) -> Option<String> {
        self.extra.string(ExtraKey::Format)
    }

    pub fn ext(&self) -> Option<String> {
        self.extra.string(ExtraKey::Ext)
    }

    pub fn builder(&self) -> Option<String> {
        self.extra.string(ExtraKey::Builder)
    }

    pub fn binary(&self) -> Option<String> {
        self.extra.string(ExtraKey::Binary)
    }

    pub fn binaries(&self) -> Option<Vec<String>> {
        self.extra.get(ExtraKey::Binaries).ok().flatten()
    }

    pub fn replaces(&self) -> Option<bool> {
        self.extra.get(ExtraKey::Replaces).ok().flatten()
    }

    pub fn size(&self) -> Option<u64> {
        self.extra.get(ExtraKey::Size).ok().flatten()
    }

    pub fn checksum_of(&self) -> Option<String> {
        self.extra.string(ExtraKey::ChecksumOf)
    }

    /// Last cached `"<algorithm>:<hex>"` value.
    pub fn cached_checksum(&self) -> Option<String> {
        self.extra.string(ExtraKey::Checksum)
    }

    /// Hash the artifact's file and cache `"<algorithm>:<hex>"` under
    /// [`ExtraKey::Checksum`]. Returns the hex digest.
    pub fn checksum(&self, algorithm: Algorithm) -> Result<String, DigestError> {
        self.checksum_in(Path::new(""), algorithm)
    }

    /// Like [`Artifact::checksum`], with the path taken relative to `base`.
    pub fn checksum_in(&self, base: &Path, algorithm: Algorithm) -> Result<String, DigestError> {
        let hex = digest_file(&base.join(&self.path), algorithm)?;
        self.extra
            .set(ExtraKey::Checksum, format!("{algorithm}:{hex}"));
        Ok(hex)
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Removes whitespace around the stem of `name`, keeping the final extension.
pub(crate) fn clean_name(name: &str) -> String {
    let ext = extension(name);
    let stem = &name[..name.len() - ext.len()];
    format!("{}{}", stem.trim(), ext)
}

/// Final `.ext` of the last path element, including the dot.
fn extension(name: &str) -> &str {
    for (idx, ch) in name.char_indices().rev() {
        match ch {
            '.' => return &name[idx..],
            '/' => break,
            _ => {}
        }
    }
    ""
}

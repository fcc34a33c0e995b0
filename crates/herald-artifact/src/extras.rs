//! The per-artifact metadata bag.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Well-known metadata keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtraKey {
    /// Logical build ID.
    Id,
    /// Binary name inside an archive or package.
    Binary,
    /// File extension, including the leading `.`.
    Ext,
    Format,
    WrappedIn,
    /// Names of the binaries bundled in an archive.
    Binaries,
    /// Whether a universal binary replaced the single-arch ones.
    Replaces,
    Digest,
    Size,
    /// Cached `"<algorithm>:<hex>"` digest.
    Checksum,
    /// Name of the artifact a checksum describes.
    ChecksumOf,
    Builder,
}

impl ExtraKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtraKey::Id => "ID",
            ExtraKey::Binary => "Binary",
            ExtraKey::Ext => "Ext",
            ExtraKey::Format => "Format",
            ExtraKey::WrappedIn => "WrappedIn",
            ExtraKey::Binaries => "Binaries",
            ExtraKey::Replaces => "Replaces",
            ExtraKey::Digest => "Digest",
            ExtraKey::Size => "Size",
            ExtraKey::Checksum => "Checksum",
            ExtraKey::ChecksumOf => "ChecksumOf",
            ExtraKey::Builder => "Builder",
        }
    }
}

impl AsRef<str> for ExtraKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for ExtraKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtraError {
    #[error("extra field {key:?} could not be decoded: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Thread-safe string-keyed metadata.
///
/// Values are JSON so the bag always serializes. Reads and writes may come
/// from any thread holding a handle to the owning artifact.
#[derive(Default)]
pub struct Extras {
    values: RwLock<BTreeMap<String, Value>>,
}

impl Extras {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Value>> {
        self.values.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Value>> {
        self.values.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, key: impl AsRef<str>, value: impl Into<Value>) {
        self.write().insert(key.as_ref().to_string(), value.into());
    }

    pub fn remove(&self, key: impl AsRef<str>) -> Option<Value> {
        self.write().remove(key.as_ref())
    }

    pub fn contains(&self, key: impl AsRef<str>) -> bool {
        self.read().contains_key(key.as_ref())
    }

    /// Raw value for `key`, null values treated as absent.
    pub fn raw(&self, key: impl AsRef<str>) -> Option<Value> {
        self.read()
            .get(key.as_ref())
            .filter(|v| !v.is_null())
            .cloned()
    }

    /// Typed lookup.
    ///
    /// The stored value is decoded directly first. If that fails and the
    /// value is a string, the string itself is decoded as JSON, which covers
    /// values written as serialized documents. `Ok(None)` means absent.
    pub fn get<T: DeserializeOwned>(&self, key: impl AsRef<str>) -> Result<Option<T>, ExtraError> {
        let key = key.as_ref();
        let Some(value) = self.raw(key) else {
            return Ok(None);
        };

        let direct = match T::deserialize(&value) {
            Ok(v) => return Ok(Some(v)),
            Err(e) => e,
        };
        if let Value::String(encoded) = &value
            && let Ok(v) = serde_json::from_str::<T>(encoded)
        {
            return Ok(Some(v));
        }
        Err(ExtraError::Decode {
            key: key.to_string(),
            source: direct,
        })
    }

    /// String value of `key`, if present and a string.
    pub fn string(&self, key: impl AsRef<str>) -> Option<String> {
        self.get::<String>(key).ok().flatten()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.read().clone()
    }
}

impl Clone for Extras {
    fn clone(&self) -> Self {
        Self::from(self.snapshot())
    }
}

impl PartialEq for Extras {
    fn eq(&self, other: &Self) -> bool {
        self.snapshot() == other.snapshot()
    }
}

impl fmt::Debug for Extras {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.read().iter()).finish()
    }
}

impl From<BTreeMap<String, Value>> for Extras {
    fn from(values: BTreeMap<String, Value>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }
}

impl Serialize for Extras {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.read().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Extras {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::<String, Value>::deserialize(deserializer).map(Extras::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_and_null_are_none() {
        let extras = Extras::new();
        extras.set("Nothing", Value::Null);
        assert_eq!(extras.get::<String>(ExtraKey::Id).unwrap(), None);
        assert_eq!(extras.get::<String>("Nothing").unwrap(), None);
    }

    #[test]
    fn direct_decode() {
        let extras = Extras::new();
        extras.set(ExtraKey::Binaries, json!(["foo", "bar"]));
        extras.set(ExtraKey::Replaces, false);
        extras.set(ExtraKey::Size, 42u64);

        let bins: Vec<String> = extras.get(ExtraKey::Binaries).unwrap().unwrap();
        assert_eq!(bins, vec!["foo", "bar"]);
        assert_eq!(extras.get::<bool>(ExtraKey::Replaces).unwrap(), Some(false));
        assert_eq!(extras.get::<u64>(ExtraKey::Size).unwrap(), Some(42));
    }

    #[test]
    fn string_holding_json_is_decoded_second() {
        #[derive(Debug, PartialEq, serde::Deserialize)]
        struct Wrapped {
            name: String,
        }

        let extras = Extras::new();
        extras.set(ExtraKey::WrappedIn, r#"{"name":"pkg"}"#);
        let wrapped: Wrapped = extras.get(ExtraKey::WrappedIn).unwrap().unwrap();
        assert_eq!(wrapped.name, "pkg");
        // the string itself still decodes as a string
        assert_eq!(
            extras.string(ExtraKey::WrappedIn).as_deref(),
            Some(r#"{"name":"pkg"}"#)
        );
    }

    #[test]
    fn mismatched_type_is_a_decode_error() {
        let extras = Extras::new();
        extras.set(ExtraKey::Size, "big");
        let err = extras.get::<u64>(ExtraKey::Size).unwrap_err();
        assert!(err.to_string().contains("\"Size\""), "{err}");
    }

    #[test]
    fn unknown_keys_are_preserved() {
        let extras: Extras = serde_json::from_value(json!({"Custom": {"a": 1}, "ID": "x"})).unwrap();
        assert_eq!(extras.string(ExtraKey::Id).as_deref(), Some("x"));
        assert_eq!(extras.raw("Custom"), Some(json!({"a": 1})));
        let round: Value = serde_json::to_value(&extras).unwrap();
        assert_eq!(round, json!({"Custom": {"a": 1}, "ID": "x"}));
    }

    #[test]
    fn clone_is_a_detached_copy() {
        let extras = Extras::new();
        extras.set(ExtraKey::Format, "tar.gz");
        let copy = extras.clone();
        extras.set(ExtraKey::Format, "zip");
        assert_eq!(copy.string(ExtraKey::Format).as_deref(), Some("tar.gz"));
    }
}

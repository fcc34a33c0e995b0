//! Streaming digests for release artifacts.
//!
//! Files are hashed in fixed-size chunks so multi-gigabyte archives never
//! need to fit in memory. Algorithms are named the way they appear in
//! `.herald.toml` (`sha256`, `sha3-512`, `blake2b`, `crc32`, ...).
//!
//! ```
//! use herald_digest::{Algorithm, digest_reader};
//!
//! let alg: Algorithm = "sha256".parse().unwrap();
//! let hex = digest_reader(&b"abc"[..], alg).unwrap();
//! assert!(hex.starts_with("ba7816bf"));
//! ```

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use digest::DynDigest;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const CHUNK_SIZE: usize = 64 * 1024;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Algorithm {
    Crc32,
    Md5,
    Sha1,
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
    Sha3_224,
    Sha3_256,
    Sha3_384,
    Sha3_512,
    /// BLAKE2b with a 512-bit output
    Blake2b,
    /// BLAKE2s with a 256-bit output
    Blake2s,
}

impl Algorithm {
    pub const ALL: [Algorithm; 13] = [
        Algorithm::Crc32,
        Algorithm::Md5,
        Algorithm::Sha1,
        Algorithm::Sha224,
        Algorithm::Sha256,
        Algorithm::Sha384,
        Algorithm::Sha512,
        Algorithm::Sha3_224,
        Algorithm::Sha3_256,
        Algorithm::Sha3_384,
        Algorithm::Sha3_512,
        Algorithm::Blake2b,
        Algorithm::Blake2s,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Crc32 => "crc32",
            Algorithm::Md5 => "md5",
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha224 => "sha224",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
            Algorithm::Sha3_224 => "sha3-224",
            Algorithm::Sha3_256 => "sha3-256",
            Algorithm::Sha3_384 => "sha3-384",
            Algorithm::Sha3_512 => "sha3-512",
            Algorithm::Blake2b => "blake2b",
            Algorithm::Blake2s => "blake2s",
        }
    }

    /// Length of the hex rendering of a digest.
    pub fn hex_len(&self) -> usize {
        let bits = match self {
            Algorithm::Crc32 => 32,
            Algorithm::Md5 => 128,
            Algorithm::Sha1 => 160,
            Algorithm::Sha224 | Algorithm::Sha3_224 => 224,
            Algorithm::Sha256 | Algorithm::Sha3_256 | Algorithm::Blake2s => 256,
            Algorithm::Sha384 | Algorithm::Sha3_384 => 384,
            Algorithm::Sha512 | Algorithm::Sha3_512 | Algorithm::Blake2b => 512,
        };
        bits / 4
    }

    fn hasher(&self) -> StreamHasher {
        let dynamic: Box<dyn DynDigest> = match self {
            Algorithm::Crc32 => return StreamHasher::Crc32(crc32fast::Hasher::new()),
            Algorithm::Md5 => return StreamHasher::Md5(md5::Context::new()),
            Algorithm::Sha1 => Box::new(sha1::Sha1::default()),
            Algorithm::Sha224 => Box::new(sha2::Sha224::default()),
            Algorithm::Sha256 => Box::new(sha2::Sha256::default()),
            Algorithm::Sha384 => Box::new(sha2::Sha384::default()),
            Algorithm::Sha512 => Box::new(sha2::Sha512::default()),
            Algorithm::Sha3_224 => Box::new(sha3::Sha3_224::default()),
            Algorithm::Sha3_256 => Box::new(sha3::Sha3_256::default()),
            Algorithm::Sha3_384 => Box::new(sha3::Sha3_384::default()),
            Algorithm::Sha3_512 => Box::new(sha3::Sha3_512::default()),
            Algorithm::Blake2b => Box::new(blake2::Blake2b512::default()),
            Algorithm::Blake2s => Box::new(blake2::Blake2s256::default()),
        };
        StreamHasher::Dyn(dynamic)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Algorithm::ALL
            .into_iter()
            .find(|alg| alg.name() == wanted)
            .ok_or_else(|| DigestError::UnknownAlgorithm(s.to_string()))
    }
}

impl Serialize for Algorithm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Algorithm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("invalid hash algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("failed to checksum {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

enum StreamHasher {
    Crc32(crc32fast::Hasher),
    Md5(md5::Context),
    Dyn(Box<dyn DynDigest>),
}

impl StreamHasher {
    fn update(&mut self, chunk: &[u8]) {
        match self {
            StreamHasher::Crc32(h) => h.update(chunk),
            StreamHasher::Md5(h) => h.consume(chunk),
            StreamHasher::Dyn(h) => h.update(chunk),
        }
    }

    fn finish(self) -> String {
        match self {
            StreamHasher::Crc32(h) => hex::encode(h.finalize().to_be_bytes()),
            StreamHasher::Md5(h) => hex::encode(h.compute().0),
            StreamHasher::Dyn(h) => hex::encode(h.finalize()),
        }
    }
}

/// Hash everything `reader` yields, returning the lowercase hex digest.
pub fn digest_reader<R: Read>(mut reader: R, algorithm: Algorithm) -> io::Result<String> {
    let mut hasher = algorithm.hasher();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}

/// Hash the file at `path`.
pub fn digest_file(path: &Path, algorithm: Algorithm) -> Result<String, DigestError> {
    let io_err = |source| DigestError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    digest_reader(file, algorithm).map_err(io_err)
}

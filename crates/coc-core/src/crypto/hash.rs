//! SHA-256 helpers over bytes, canonical values, and files.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::canonical::{self, CanonicalError};

/// Buffer size for streamed file hashing.
const FILE_BUF_SIZE: usize = 64 * 1024;

/// Computes the lowercase 64-char hex SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().fold(String::with_capacity(64), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

/// Computes the SHA-256 hex digest of a value's canonical bytes.
///
/// # Errors
///
/// Returns [`CanonicalError`] if the value cannot be canonicalized.
pub fn hash_canonical(value: &Value) -> Result<String, CanonicalError> {
    Ok(sha256_hex(&canonical::canonical_bytes(value)?))
}

/// Streams a file through SHA-256, producing the same digest as
/// [`sha256_hex`] over the file's full contents.
///
/// # Errors
///
/// Returns [`io::Error`] if the file cannot be opened or read.
pub fn hash_file(path: impl AsRef<Path>) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; FILE_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    Ok(digest.iter().fold(String::with_capacity(64), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    }))
}

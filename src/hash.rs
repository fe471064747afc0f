//! Content-hash utilities for manifest check verification.
//!
//! MPI manifests carry uppercase hex digests; which algorithm a digest was
//! produced by is encoded in its length (32 hex chars = MD5, 40 = SHA-1).

use anyhow::{Context, Result};
use md5::{Digest, Md5};
use sha1::Sha1;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Hex length of an MD5 digest
pub const MD5_HEX_LEN: usize = 32;
/// Hex length of a SHA-1 digest
pub const SHA1_HEX_LEN: usize = 40;

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02X}"));
    }
    out
}

/// MD5 of a byte buffer, uppercase hex.
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    to_hex(hasher.finalize().as_slice())
}

/// SHA-1 of a byte buffer, uppercase hex.
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    to_hex(hasher.finalize().as_slice())
}

fn hash_file<H: Digest>(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;

    let mut reader = BufReader::with_capacity(1024 * 1024, file);
    let mut buf = vec![0u8; 1024 * 1024];
    let mut hasher = H::new();

    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("Failed to read file for hashing: {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(to_hex(hasher.finalize().as_slice()))
}

/// MD5 of a file, uppercase hex. Streams in 1 MiB chunks.
pub fn file_md5_hex(path: &Path) -> Result<String> {
    hash_file::<Md5>(path)
}

/// SHA-1 of a file, uppercase hex. Streams in 1 MiB chunks.
pub fn file_sha1_hex(path: &Path) -> Result<String> {
    hash_file::<Sha1>(path)
}

/// Compute the digest of `path` with the algorithm implied by the length of
/// `expected` (32 hex chars = MD5, 40 = SHA-1). Returns `(matches, actual)`.
/// An expected digest of any other length never matches.
pub fn verify_digest(path: &Path, expected: &str) -> Result<(bool, String)> {
    let actual = match expected.len() {
        MD5_HEX_LEN => file_md5_hex(path)?,
        SHA1_HEX_LEN => file_sha1_hex(path)?,
        _ => return Ok((false, String::new())),
    };
    Ok((actual.eq_ignore_ascii_case(expected), actual))
}

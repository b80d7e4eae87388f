//! SHA-256 helpers for release assets.
//!
//! Manifests use the `sha256sum` text format: `<64 hex>  <filename>` per
//! line. Entries are matched by exact filename after the two-space
//! separator; digests compare case-insensitively.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::error::FetchError;

const SHA256_HEX_LEN: usize = 64;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Streamed SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let f = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = r
            .read(&mut buf)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Expected digest of `filename` in a checksum manifest, lowercased.
pub fn find_checksum(manifest: &str, filename: &str) -> Option<String> {
    manifest
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| line.len() > SHA256_HEX_LEN)
        .find_map(|line| {
            let (digest, name) = line.split_once("  ")?;
            if name != filename || digest.len() != SHA256_HEX_LEN {
                return None;
            }
            if !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            Some(digest.to_ascii_lowercase())
        })
}

/// Compare a file's digest against `expected`.
pub fn verify_file(path: &Path, filename: &str, expected: &str) -> Result<(), FetchError> {
    let actual = sha256_file(path)
        .map_err(|e| FetchError::io(format!("hashing {}", path.display()), std::io::Error::other(e)))?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(FetchError::ChecksumMismatch {
            filename: filename.to_string(),
            expected: expected.to_ascii_lowercase(),
            actual,
        });
    }
    Ok(())
}

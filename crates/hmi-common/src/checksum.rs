//! Content fingerprints for import deduplication
//!
//! Every telemetry file is identified by the SHA-256 digest of its raw
//! bytes, rendered as 64 lowercase hex characters.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Length of a rendered content hash.
pub const CONTENT_HASH_LEN: usize = 64;

const READ_BUFFER_SIZE: usize = 8192;

/// Compute the content hash of an in-memory buffer
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compute the content hash of any readable source
pub fn hash_reader<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the content hash of a file on disk
pub fn hash_file(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    hash_reader(&mut file)
}

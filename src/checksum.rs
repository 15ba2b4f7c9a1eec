//! SHA-256 digests of downloaded artifacts.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{DigestStage, Result, UpdateError};

/// Bytes read from disk per digest update
pub const CHUNK_SIZE: usize = 4096;

/// Stream a file through SHA-256 and return the lowercase hex digest.
pub fn digest_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|source| UpdateError::Digest {
        stage: DigestStage::Open,
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(UpdateError::Digest {
                    stage: DigestStage::Update,
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compute the SHA-256 of an in-memory buffer as lowercase hex.
pub fn digest_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

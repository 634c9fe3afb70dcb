//! Streaming SHA-512 content hashing
//!
//! Files are read through a fixed-size buffer so memory use does not depend on
//! file size. The hasher holds no shared state and may be used concurrently on
//! independent files.

use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use sha2::{Digest, Sha512};

use crate::config::{DEFAULT_HASH_BUFFER_BYTES, IntegrityConfig};
use crate::{Error, Result};

const MIN_BUFFER: usize = 1024;
const MAX_BUFFER: usize = 16 * 1024 * 1024;

/// A 512-bit content digest
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Digest512([u8; 64]);

impl Digest512 {
    fn from_slice(bytes: &[u8]) -> Self {
        let mut digest = [0u8; 64];
        digest.copy_from_slice(bytes);
        Self(digest)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Lowercase hex, 128 characters
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Digest512 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest512({})", self.to_hex())
    }
}

impl fmt::Display for Digest512 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Bounded-memory file hasher
#[derive(Debug, Clone, Copy)]
pub struct ContentHasher {
    buffer_size: usize,
}

impl ContentHasher {
    /// Create a hasher reading in chunks of `buffer_size` bytes (clamped to 1 KiB..=16 MiB)
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.clamp(MIN_BUFFER, MAX_BUFFER),
        }
    }

    pub fn from_config(config: &IntegrityConfig) -> Self {
        Self::new(config.hash_buffer_bytes)
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Stream `path` through SHA-512
    pub fn hash_file(&self, path: &Path) -> Result<Digest512> {
        let unavailable = |source| Error::HashUnavailable {
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::open(path).map_err(unavailable)?;
        let mut hasher = Sha512::new();
        let mut buffer = vec![0u8; self.buffer_size];

        loop {
            match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => hasher.update(&buffer[..read]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(unavailable(e)),
            }
        }

        Ok(Digest512::from_slice(&hasher.finalize()))
    }

    /// Hash an in-memory payload
    pub fn hash_bytes(data: &[u8]) -> Digest512 {
        Digest512::from_slice(&Sha512::digest(data))
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_BUFFER_BYTES)
    }
}

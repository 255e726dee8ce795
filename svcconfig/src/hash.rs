// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! Content hash of the loaded configuration file
//!
//! The hash identifies the configuration a process was started with. It is
//! recorded once: the first non-empty value wins and later values are
//! ignored.

use crate::error::ConfigError;
use openssl::hash::{hash, MessageDigest};
use std::sync::OnceLock;

static GLOBAL_CONTENT_HASH: ContentHash = ContentHash::new();

/// Write-once holder for a configuration content hash
#[derive(Debug, Default)]
pub struct ContentHash {
    value: OnceLock<String>,
}

impl ContentHash {
    pub const fn new() -> Self {
        Self {
            value: OnceLock::new(),
        }
    }

    /// Record `hash` unless a value is already recorded
    ///
    /// Returns the recorded value. An empty `hash` is never recorded, so it
    /// does not prevent a later non-empty value from being set.
    pub fn set(&self, hash: &str) -> &str {
        if hash.is_empty() {
            return self.get().unwrap_or("");
        }
        self.value.get_or_init(|| hash.to_string())
    }

    pub fn get(&self) -> Option<&str> {
        self.value.get().map(String::as_str)
    }
}

/// Process-wide content hash holder
pub fn global_content_hash() -> &'static ContentHash {
    &GLOBAL_CONTENT_HASH
}

/// Record the process-wide content hash; see [`ContentHash::set`]
pub fn new_hash_code(hash: &str) -> &'static str {
    GLOBAL_CONTENT_HASH.set(hash)
}

/// The process-wide content hash, if one was recorded
pub fn hash_code() -> Option<&'static str> {
    GLOBAL_CONTENT_HASH.get()
}

/// Hex encoded MD5 digest of the raw configuration bytes
pub fn compute_content_hash(data: &[u8]) -> Result<String, ConfigError> {
    let digest = hash(MessageDigest::md5(), data).map_err(ConfigError::Hash)?;
    Ok(hex::encode(digest))
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! CA bundle loading, caching and path resolution

use crate::error::ConfigError;
use log::*;
use openssl::x509::X509;
use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

/// Set of trusted root certificates loaded from a single CA bundle
#[derive(Debug, Clone)]
pub struct CertPool {
    path: String,
    certs: Vec<X509>,
}

const PEM_CERT_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_CERT_END: &str = "-----END CERTIFICATE-----";

/// Split PEM data into its `CERTIFICATE` blocks, markers included
///
/// Blocks of any other type are skipped. A begin marker without a matching
/// end marker ends the scan.
fn certificate_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(PEM_CERT_BEGIN) {
        let block = &rest[start..];
        let Some(end) = block.find(PEM_CERT_END) else {
            break;
        };
        let end = end + PEM_CERT_END.len();
        blocks.push(&block[..end]);
        rest = &block[end..];
    }
    blocks
}

impl CertPool {
    /// Parse a concatenation of PEM encoded certificates
    ///
    /// Blocks that fail to parse are skipped. `path` is only used in log
    /// and error messages. Data without any valid certificate is rejected.
    pub fn from_pem(path: &str, data: &[u8]) -> Result<Self, ConfigError> {
        let text = String::from_utf8_lossy(data);
        let mut certs = Vec::new();
        let mut last_error = None;

        for block in certificate_blocks(&text) {
            match X509::from_pem(block.as_bytes()) {
                Ok(cert) => certs.push(cert),
                Err(e) => {
                    debug!("Skipping invalid certificate in {path}: {e}");
                    last_error = Some(e);
                }
            }
        }

        if certs.is_empty() {
            return Err(ConfigError::CertParse {
                path: path.to_string(),
                source: last_error,
            });
        }

        Ok(Self {
            path: path.to_string(),
            certs,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn certificates(&self) -> &[X509] {
        &self.certs
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Encode every certificate of the pool in DER format
    pub fn to_der_list(&self) -> Result<Vec<Vec<u8>>, ConfigError> {
        self.certs
            .iter()
            .map(|cert| {
                cert.to_der().map_err(|e| ConfigError::CertParse {
                    path: self.path.clone(),
                    source: Some(e),
                })
            })
            .collect()
    }
}

/// Read a CA bundle file and load its certificates into a pool
pub fn load_cert_pool(ca_bundle_path: &Path) -> Result<CertPool, ConfigError> {
    let path = ca_bundle_path.display().to_string();
    let data = std::fs::read(ca_bundle_path).map_err(|source| {
        ConfigError::CertFileUnreadable {
            path: path.clone(),
            source,
        }
    })?;

    CertPool::from_pem(&path, &data)
}

/// Loaded pools keyed by the CA bundle path as written in the configuration
///
/// Keying by the unresolved path lets services that reference the same
/// bundle share one load.
#[derive(Debug, Default, Clone)]
pub struct CertPoolCache {
    pools: HashMap<String, Arc<CertPool>>,
}

impl CertPoolCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the bundle at `resolved_path` unless `original_path` is empty
    /// or was loaded before
    pub fn load_if_absent(
        &mut self,
        resolved_path: &str,
        original_path: &str,
    ) -> Result<(), ConfigError> {
        if original_path.is_empty() {
            return Ok(());
        }

        if self.pools.contains_key(original_path) {
            debug!("CA bundle {original_path} already loaded");
            return Ok(());
        }

        let pool = load_cert_pool(Path::new(resolved_path))?;
        debug!(
            "Loaded {} certificate(s) from CA bundle {resolved_path}",
            pool.len()
        );
        let _ = self.pools.insert(original_path.to_string(), Arc::new(pool));
        Ok(())
    }

    pub fn get(&self, original_path: &str) -> Option<Arc<CertPool>> {
        self.pools.get(original_path).cloned()
    }

    pub fn contains(&self, original_path: &str) -> bool {
        self.pools.contains_key(original_path)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

/// Lexically clean a path: drop `.` components and fold `..` into the
/// preceding component when there is one
fn clean_path(path: &Path) -> PathBuf {
    let mut stack: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match stack.last() {
                Some(Component::Normal(_)) => {
                    let _ = stack.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => stack.push(component),
            },
            c => stack.push(c),
        }
    }
    stack.iter().collect()
}

/// Resolve a CA bundle path relative to the directory of the configuration
/// file
///
/// An empty result means there is no CA bundle: either `cert_path` is
/// empty or it resolves to the current directory.
pub fn resolve_ca_path(config_path: &Path, cert_path: &str) -> String {
    if cert_path.is_empty() {
        return String::new();
    }

    let config_dir = config_path.parent().unwrap_or_else(|| Path::new(""));
    let resolved = clean_path(&config_dir.join(cert_path));
    let resolved = resolved.to_string_lossy();
    if resolved.is_empty() || resolved == "." {
        return String::new();
    }
    resolved.into_owned()
}

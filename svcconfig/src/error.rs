// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! Error types for configuration loading
//!
//! Every stage of the load pipeline reports failures through
//! [`ConfigError`]. Stages before auth-key loading are fail-fast and return
//! a single error; auth-key loading collects one error per failing service.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be opened
    #[error("Error opening config file {path}")]
    FileOpen {
        path: String,
        source: std::io::Error,
    },

    /// The configuration data could not be read
    #[error("Error reading config data")]
    Read(#[source] std::io::Error),

    /// The configuration data is not valid JSON or does not match the schema
    ///
    /// This includes unknown top-level fields.
    #[error("Error decoding config data: {0}")]
    Decode(#[source] serde_json::Error),

    /// A required argument was missing
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Merging the overrides of a service with the defaults failed
    #[error("Error merging component config: {service}")]
    Merge {
        service: String,
        source: Box<ConfigError>,
    },

    /// A CA bundle file could not be read
    #[error("Error reading cert file {path}")]
    CertFileUnreadable {
        path: String,
        source: std::io::Error,
    },

    /// A CA bundle file contained no usable PEM certificate
    #[error("error appending certs from cert file {path}")]
    CertParse {
        path: String,
        #[source]
        source: Option<openssl::error::ErrorStack>,
    },

    /// The client builder failed to produce a client
    #[error("Error building HTTP client")]
    ClientBuild(#[source] reqwest::Error),

    /// The key getter returned an empty key for a service
    #[error("Empty auth key for {service}")]
    AuthKeyEmpty { service: String },

    /// The key getter failed for a service
    #[error("Error retrieving auth key for {service}: {source}")]
    AuthKeyRetrieval {
        service: String,
        source: AuthKeyError,
    },

    /// A named service or database is not configured
    #[error("unable to locate {kind} configuration for {name}")]
    NotFound { kind: &'static str, name: String },

    /// The content hash could not be computed
    #[error("failed to calculate config content hash")]
    Hash(#[source] openssl::error::ErrorStack),
}

/// Errors returned by an [`AuthKeyGetter`](crate::auth::AuthKeyGetter)
#[derive(Error, Debug)]
pub enum AuthKeyError {
    /// The environment variable holding the key is unset or empty
    #[error("Empty auth key for '{variable}'")]
    EmptyEnvironmentKey { variable: String },

    /// Any other failure reported by a key getter
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl AuthKeyError {
    /// Create an error from a plain message
    pub fn other<M: Into<String>>(message: M) -> Self {
        let message: String = message.into();
        Self::Other(message.into())
    }
}

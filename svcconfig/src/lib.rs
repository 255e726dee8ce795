// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! Loading of hierarchical service configuration files
//!
//! A configuration file declares default component settings and a list of
//! services, each of which may override parts of the defaults. Loading a
//! file merges the overrides of every service over the defaults, builds one
//! HTTP client per service from the merged client settings and fetches the
//! auth keys of the services that require one.

pub mod auth;
pub mod cert;
pub mod client;
pub mod error;
pub mod flag;
pub mod hash;
pub mod loader;
pub mod merge;
pub mod model;

pub use auth::{AuthKeyGetter, EnvAuthKeyGetter};
pub use cert::{load_cert_pool, resolve_ca_path, CertPool, CertPoolCache};
pub use client::{
    create_http_client, ClientFactory, DefaultRetryClientBuilder,
    RetryClient, RetryClientBuilder, TransportSettings,
};
pub use error::{AuthKeyError, ConfigError};
pub use flag::ConfigFlag;
pub use hash::{global_content_hash, hash_code, new_hash_code, ContentHash};
pub use loader::{ConfigLoader, LoadStage};
pub use merge::{merge_component_configs, FillUnset};
pub use model::{
    AuthCredentials, ClientConfig, ComponentConfigs, Config, DatabaseConfig,
    EndpointConfig, LoggingConfig, ServiceConfig, ServiceLoggingConfig,
};

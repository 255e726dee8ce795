// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! Configuration load pipeline
//!
//! Loading runs through the stages of [`LoadStage`] in order. Every stage
//! up to building the clients stops at the first error; auth key loading
//! attempts every service and reports all failures together.

use crate::{
    auth::{AuthKeyGetter, EnvAuthKeyGetter},
    client::{
        ClientFactory, DefaultRetryClientBuilder, RetryClient,
        RetryClientBuilder,
    },
    error::ConfigError,
    hash::{compute_content_hash, global_content_hash, ContentHash},
    merge::merge_component_configs_for_all_services,
    model::Config,
};
use log::*;
use std::{fmt, fs::File, io::Read, path::Path};

/// Stages of the load pipeline, in the order they are reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadStage {
    Unloaded,
    FileOpened,
    Parsed,
    Merged,
    ClientsBuilt,
    AuthKeysLoaded,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadStage::Unloaded => "unloaded",
            LoadStage::FileOpened => "file opened",
            LoadStage::Parsed => "parsed",
            LoadStage::Merged => "merged",
            LoadStage::ClientsBuilt => "clients built",
            LoadStage::AuthKeysLoaded => "auth keys loaded",
        };
        write!(f, "{name}")
    }
}

/// Open the configuration file at `path`
pub fn open_config_file(path: &Path) -> Result<File, ConfigError> {
    trace!("Loading config file: {}", path.display());
    File::open(path).map_err(|source| ConfigError::FileOpen {
        path: path.display().to_string(),
        source,
    })
}

/// Decode a configuration and merge the component configs of its services
///
/// The content hash of the returned configuration is computed from the raw
/// bytes read. Unknown top-level fields fail the decoding.
pub fn read_config<R: Read>(mut reader: R) -> Result<Config, ConfigError> {
    trace!("Reading config data");
    let mut data = Vec::new();
    let _ = reader.read_to_end(&mut data).map_err(ConfigError::Read)?;

    let mut config: Config =
        serde_json::from_slice(&data).map_err(ConfigError::Decode)?;
    config.hash = compute_content_hash(&data)?;
    debug!("Config stage: {}", LoadStage::Parsed);

    merge_component_configs_for_all_services(&mut config)?;
    debug!("Config stage: {}", LoadStage::Merged);

    Ok(config)
}

/// Build the default client and one client per service
///
/// CA bundle paths are resolved relative to the directory of
/// `config_path`. Returns a handle to the default client.
pub fn build_clients(
    config: &mut Config,
    config_path: &Path,
    builder: &dyn RetryClientBuilder,
) -> Result<RetryClient, ConfigError> {
    let factory = ClientFactory::init(config, config_path, builder)?;

    let default_client =
        factory.build(&config.default_component_configs.client)?;
    config.default_http_client = Some(default_client.clone());

    for (name, service) in config.service_configs.iter_mut() {
        match serde_json::to_string(&service.merged_component_configs) {
            Ok(merged) => {
                info!("Service {name} merged component configs: {merged}")
            }
            Err(e) => {
                debug!("Unable to serialize merged configs of {name}: {e}")
            }
        }
        let client =
            factory.build(&service.merged_component_configs.client)?;
        service.http_client = Some(client);
    }

    debug!("Config stage: {}", LoadStage::ClientsBuilt);
    Ok(default_client)
}

/// Runs the load pipeline with replaceable collaborators
pub struct ConfigLoader<'a> {
    client_builder: Box<dyn RetryClientBuilder + 'a>,
    key_getter: Box<dyn AuthKeyGetter + 'a>,
    content_hash: &'a ContentHash,
    load_auth_keys: bool,
}

impl Default for ConfigLoader<'_> {
    fn default() -> Self {
        Self {
            client_builder: Box::new(DefaultRetryClientBuilder::default()),
            key_getter: Box::new(EnvAuthKeyGetter),
            content_hash: global_content_hash(),
            load_auth_keys: true,
        }
    }
}

impl<'a> ConfigLoader<'a> {
    /// Loader with the reqwest client builder, the environment key getter
    /// and the process-wide content hash
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_builder<B: RetryClientBuilder + 'a>(
        mut self,
        builder: B,
    ) -> Self {
        self.client_builder = Box::new(builder);
        self
    }

    pub fn with_auth_key_getter<G: AuthKeyGetter + 'a>(
        mut self,
        getter: G,
    ) -> Self {
        self.key_getter = Box::new(getter);
        self
    }

    /// Record the content hash into `content_hash` instead of the
    /// process-wide holder
    pub fn with_content_hash(mut self, content_hash: &'a ContentHash) -> Self {
        self.content_hash = content_hash;
        self
    }

    /// Stop after building the clients, leaving every auth key empty
    pub fn without_auth_keys(mut self) -> Self {
        self.load_auth_keys = false;
        self
    }

    /// Load the configuration file at `path`, leaving the auth key errors
    /// to the caller
    ///
    /// Failures before auth key loading are returned as the error. Otherwise
    /// the configuration is returned together with one error per service
    /// whose key could not be loaded; those services keep an empty key.
    pub fn load_lenient<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<(Config, Vec<ConfigError>), ConfigError> {
        let path = path.as_ref();
        debug!("Config stage: {}", LoadStage::Unloaded);

        let file = open_config_file(path)?;
        debug!("Config stage: {}", LoadStage::FileOpened);

        let mut config = read_config(file)?;
        let _ = self.content_hash.set(&config.hash);

        let default_client =
            build_clients(&mut config, path, self.client_builder.as_ref())?;

        if !self.load_auth_keys {
            debug!("Skipping auth key loading");
            return Ok((config, Vec::new()));
        }

        let errors = config.load_service_auth_keys(
            self.key_getter.as_ref(),
            &default_client,
        );
        if errors.is_empty() {
            debug!("Config stage: {}", LoadStage::AuthKeysLoaded);
        }

        Ok((config, errors))
    }

    /// Load the configuration file at `path`
    ///
    /// Returns a single error for failures before auth key loading, and one
    /// error per failing service otherwise. No configuration is returned
    /// on failure.
    pub fn load<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<Config, Vec<ConfigError>> {
        let (config, errors) = self.load_lenient(path).map_err(|e| vec![e])?;
        if !errors.is_empty() {
            for e in &errors {
                error!("{e}");
            }
            return Err(errors);
        }
        Ok(config)
    }
}

impl Config {
    /// Load the configuration file at `path` with the default collaborators
    ///
    /// Shorthand for `ConfigLoader::new().load(path)`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Config, Vec<ConfigError>> {
        ConfigLoader::new().load(path)
    }
}

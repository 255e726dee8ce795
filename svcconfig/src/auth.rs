// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! Auth key retrieval for services that require authentication

use crate::{
    client::RetryClient,
    error::{AuthKeyError, ConfigError},
    model::{Config, ServiceConfig, ServicesMap},
};
use log::*;

/// Capability that obtains the auth key of a service
///
/// The client is the default HTTP client of the configuration, for getters
/// that fetch keys over the network.
pub trait AuthKeyGetter {
    fn get_service_key(
        &self,
        service: &ServiceConfig,
        client: &RetryClient,
    ) -> Result<String, AuthKeyError>;
}

impl<F> AuthKeyGetter for F
where
    F: Fn(&ServiceConfig, &RetryClient) -> Result<String, AuthKeyError>,
{
    fn get_service_key(
        &self,
        service: &ServiceConfig,
        client: &RetryClient,
    ) -> Result<String, AuthKeyError> {
        self(service, client)
    }
}

/// Reads the key of a service from the environment variable named by
/// `AuthEnvironmentVariable`
///
/// A service without a variable name gets an empty key.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvAuthKeyGetter;

impl EnvAuthKeyGetter {
    fn get_environment_key(variable: &str) -> Result<String, AuthKeyError> {
        match std::env::var(variable) {
            Ok(key) if !key.is_empty() => Ok(key),
            _ => Err(AuthKeyError::EmptyEnvironmentKey {
                variable: variable.to_string(),
            }),
        }
    }
}

impl AuthKeyGetter for EnvAuthKeyGetter {
    fn get_service_key(
        &self,
        service: &ServiceConfig,
        _client: &RetryClient,
    ) -> Result<String, AuthKeyError> {
        if service.auth_environment_variable.is_empty() {
            return Ok(String::new());
        }
        Self::get_environment_key(&service.auth_environment_variable)
    }
}

/// Fetch the auth key of every service that requires one
///
/// Every service is attempted. The returned list holds one error per
/// service that failed or got an empty key; those services keep an empty
/// key.
pub fn load_service_auth_keys(
    services: &mut ServicesMap,
    key_getter: &dyn AuthKeyGetter,
    client: &RetryClient,
) -> Vec<ConfigError> {
    trace!("Loading auth keys");
    let mut errors = Vec::new();

    for (name, service) in services.iter_mut() {
        if !service.auth_required {
            continue;
        }

        match key_getter.get_service_key(service, client) {
            Ok(key) if key.is_empty() => {
                errors.push(ConfigError::AuthKeyEmpty {
                    service: name.clone(),
                });
            }
            Ok(key) => {
                debug!("Loaded auth key for service {name}");
                service.auth_key = key;
            }
            Err(source) => {
                errors.push(ConfigError::AuthKeyRetrieval {
                    service: name.clone(),
                    source,
                });
            }
        }
    }

    errors
}

impl Config {
    /// Fetch the auth keys of the services of this configuration
    ///
    /// See [`load_service_auth_keys`].
    pub fn load_service_auth_keys(
        &mut self,
        key_getter: &dyn AuthKeyGetter,
        client: &RetryClient,
    ) -> Vec<ConfigError> {
        load_service_auth_keys(&mut self.service_configs, key_getter, client)
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! Configuration data model
//!
//! The file is a JSON document of this shape:
//!
//! ```json
//! {
//!   "Env": "Dev",
//!   "Port": 8000,
//!   "Logging": { "Level": "trace" },
//!   "DefaultComponentConfigs": {
//!     "ServiceLogging": { "LogCallDuration": 2 },
//!     "Client": {
//!       "Timeout": 10,
//!       "IdleConnTimeout": 30,
//!       "MaxIdleConnsPerHost": 16,
//!       "MaxConnsPerHost": 32,
//!       "MaxRetries": 0,
//!       "DisableCompression": 1,
//!       "InsecureSkipVerify": 1,
//!       "CABundlePath": "caBundle.pem"
//!     }
//!   },
//!   "ServiceConfigs": [
//!     {
//!       "Name": "ABS",
//!       "Url": "https://some.url.com",
//!       "AuthRequired": true,
//!       "AuthEnvironmentVariable": "ABS_KEY",
//!       "AuthCredentials": { "KeyComponent1": "", "KeyComponent2": "", "Euuid": "" },
//!       "Endpoints": [ { "Name": "ClaimStatus", "Path": "/mvClaimStatuses?" } ],
//!       "ComponentConfigOverrides": { "Client": { "Timeout": 30 } }
//!     }
//!   ],
//!   "DatabaseConfigs": [],
//!   "Options": { "TRMemberInquiry": true }
//! }
//! ```
//!
//! Service, database and endpoint lists are turned into maps keyed by the
//! entry name. When two entries share a name the later one wins.

use crate::{client::RetryClient, error::ConfigError, flag::ConfigFlag};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Maps the name of a service to its configuration
pub type ServicesMap = BTreeMap<String, ServiceConfig>;

/// Maps the name of a database to its configuration
pub type DatabasesMap = BTreeMap<String, DatabaseConfig>;

/// Maps the name of an endpoint to its configuration
pub type EndpointMap = BTreeMap<String, EndpointConfig>;

/// Root of a loaded configuration file
///
/// Prefer adding API specific values to `options` over extending this
/// structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default, deny_unknown_fields)]
pub struct Config {
    pub env: String,
    pub port: u16,
    pub logging: LoggingConfig,
    /// Settings every service inherits unless it overrides them
    pub default_component_configs: ComponentConfigs,
    #[serde(deserialize_with = "named_list_to_map")]
    pub service_configs: ServicesMap,
    #[serde(deserialize_with = "named_list_to_map")]
    pub database_configs: DatabasesMap,
    /// Catch-all for API specific values
    #[serde(deserialize_with = "null_as_default")]
    pub options: serde_json::Map<String, Value>,

    /// Client built from the default client settings, without any service
    /// overrides applied
    #[serde(skip)]
    pub(crate) default_http_client: Option<RetryClient>,

    /// Hex encoded MD5 of the raw file contents
    ///
    /// A `Hash` key in the file is accepted but replaced by the computed
    /// hash when the file is read.
    pub(crate) hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
}

/// Categories of settings that can be given as defaults and overridden
/// per service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default, deny_unknown_fields)]
pub struct ComponentConfigs {
    pub service_logging: ServiceLoggingConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default, deny_unknown_fields)]
pub struct ServiceLoggingConfig {
    /// Log the duration of calls made to the service
    pub log_call_duration: ConfigFlag,
}

/// Settings of the HTTP client used to talk to a service
///
/// Durations are whole seconds. A zero value means "not set" for merge
/// purposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default, deny_unknown_fields)]
pub struct ClientConfig {
    pub timeout: i64,
    pub idle_conn_timeout: i64,
    pub max_idle_conns_per_host: i64,
    pub max_conns_per_host: i64,
    pub max_retries: i64,
    pub disable_compression: ConfigFlag,
    pub insecure_skip_verify: ConfigFlag,
    /// CA bundle path, relative to the directory of the configuration file
    #[serde(rename = "CABundlePath")]
    pub ca_bundle_path: String,
}

/// Everything needed to talk to a service and its endpoints
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServiceConfig {
    pub name: String,
    pub url: String,
    pub auth_required: bool,
    pub auth_environment_variable: String,
    pub auth_credentials: AuthCredentials,
    #[serde(
        rename = "Endpoints",
        alias = "EndPoints",
        deserialize_with = "named_list_to_map"
    )]
    pub end_points: EndpointMap,
    pub component_config_overrides: ComponentConfigs,

    #[serde(skip)]
    pub(crate) auth_key: String,
    #[serde(skip)]
    pub(crate) merged_component_configs: ComponentConfigs,
    #[serde(skip)]
    pub(crate) http_client: Option<RetryClient>,
}

/// Everything needed to connect to a database
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DatabaseConfig {
    pub name: String,
    pub database: String,
    pub server: String,
    pub username: String,
    /// Filled from `auth_environment_variable` on lookup
    #[serde(skip)]
    pub password: String,
    pub auth_required: bool,
    pub auth_environment_variable: String,
}

/// Data needed to request auth information for a service
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AuthCredentials {
    pub key_component1: String,
    pub key_component2: String,
    pub euuid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EndpointConfig {
    pub name: String,
    pub path: String,
}

/// Entries that are keyed by their own name once decoded
trait Named {
    fn name(&self) -> &str;
}

impl Named for ServiceConfig {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for DatabaseConfig {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for EndpointConfig {
    fn name(&self) -> &str {
        &self.name
    }
}

fn named_list_to_map<'de, D, T>(
    deserializer: D,
) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Named,
{
    let entries = Option::<Vec<T>>::deserialize(deserializer)?;
    Ok(entries
        .into_iter()
        .flatten()
        .map(|entry| (entry.name().to_string(), entry))
        .collect())
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ServiceConfig {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// The overrides of this service merged over the default component
    /// configs
    pub fn merged_component_configs(&self) -> &ComponentConfigs {
        &self.merged_component_configs
    }

    /// Client built from the merged client settings
    pub fn http_client(&self) -> Option<&RetryClient> {
        self.http_client.as_ref()
    }

    /// Key obtained for the service, empty until auth keys are loaded
    pub fn auth_key(&self) -> &str {
        &self.auth_key
    }

    pub fn endpoint(&self, name: &str) -> Option<&EndpointConfig> {
        self.end_points.get(name)
    }
}

impl Config {
    /// Get a service configuration by name
    pub fn get_service_config(
        &self,
        name: &str,
    ) -> Result<&ServiceConfig, ConfigError> {
        self.service_configs
            .get(name)
            .ok_or_else(|| ConfigError::NotFound {
                kind: "service",
                name: name.to_string(),
            })
    }

    /// Get a database configuration by name
    ///
    /// When the database requires authentication, the password is read from
    /// the configured environment variable on every lookup.
    pub fn get_database_config(
        &mut self,
        name: &str,
    ) -> Result<&DatabaseConfig, ConfigError> {
        let database = self.database_configs.get_mut(name).ok_or_else(|| {
            ConfigError::NotFound {
                kind: "database",
                name: name.to_string(),
            }
        })?;

        if database.auth_required {
            database.password =
                std::env::var(&database.auth_environment_variable)
                    .unwrap_or_default();
        }

        Ok(database)
    }

    /// True when the configuration is meant for a local machine
    pub fn is_local(&self) -> bool {
        self.env.eq_ignore_ascii_case("local")
    }

    /// Fetch an entry of `options` as a string
    ///
    /// Strings are returned without quotes, other values in their JSON text
    /// form. Missing and `null` entries give an empty string.
    pub fn option_as_string(&self, option: &str) -> String {
        match self.options.get(option) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    pub fn default_http_client(&self) -> Option<&RetryClient> {
        self.default_http_client.as_ref()
    }

    /// Hex encoded MD5 of the file this configuration was read from
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! Construction of the HTTP clients used to reach configured services
//!
//! A [`ClientFactory`] loads every CA bundle referenced by the default and
//! merged client settings once, then turns any [`ClientConfig`] into a
//! [`RetryClient`]. The actual client construction is delegated to a
//! [`RetryClientBuilder`], which receives the retry count and the derived
//! [`TransportSettings`].

use crate::{
    cert::{resolve_ca_path, CertPool, CertPoolCache},
    error::ConfigError,
    model::{ClientConfig, Config},
};
use log::*;
use reqwest::Method;
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::{path::Path, sync::Arc, time::Duration};

const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Transport level settings derived from a merged [`ClientConfig`]
///
/// Values are passed through without validation. Negative durations become
/// zero, and a zero duration means "no limit".
#[derive(Debug, Clone, Default)]
pub struct TransportSettings {
    pub timeout: Duration,
    pub idle_conn_timeout: Duration,
    pub max_idle_conns_per_host: i64,
    pub max_conns_per_host: i64,
    pub disable_compression: bool,
    pub insecure_skip_verify: bool,
    /// Extra trusted roots, added on top of the system store
    pub root_certificates: Option<Arc<CertPool>>,
}

fn seconds(value: i64) -> Duration {
    Duration::from_secs(u64::try_from(value).unwrap_or(0))
}

impl TransportSettings {
    pub fn from_client_config(
        mc: &ClientConfig,
        cert_pools: &CertPoolCache,
    ) -> Self {
        let insecure_skip_verify = mc.insecure_skip_verify.is_true();

        // The CA bundle only matters when certificates are verified
        let root_certificates = if insecure_skip_verify {
            None
        } else {
            cert_pools.get(&mc.ca_bundle_path)
        };

        Self {
            timeout: seconds(mc.timeout),
            idle_conn_timeout: seconds(mc.idle_conn_timeout),
            max_idle_conns_per_host: mc.max_idle_conns_per_host,
            max_conns_per_host: mc.max_conns_per_host,
            disable_compression: mc.disable_compression.is_true(),
            insecure_skip_verify,
            root_certificates,
        }
    }
}

/// HTTP client that transparently retries transient failures
#[derive(Debug, Clone)]
pub struct RetryClient {
    client: ClientWithMiddleware,
    max_retries: u32,
    transport: TransportSettings,
}

impl RetryClient {
    pub fn new(
        client: ClientWithMiddleware,
        max_retries: u32,
        transport: TransportSettings,
    ) -> Self {
        Self {
            client,
            max_retries,
            transport,
        }
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    pub fn inner(&self) -> &ClientWithMiddleware {
        &self.client
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Settings the client was built from
    pub fn transport(&self) -> &TransportSettings {
        &self.transport
    }
}

/// Capability that builds a client from a retry count and transport
/// settings
pub trait RetryClientBuilder {
    fn build_client(
        &self,
        max_retries: i64,
        transport: TransportSettings,
    ) -> Result<RetryClient, ConfigError>;
}

impl<F> RetryClientBuilder for F
where
    F: Fn(i64, TransportSettings) -> Result<RetryClient, ConfigError>,
{
    fn build_client(
        &self,
        max_retries: i64,
        transport: TransportSettings,
    ) -> Result<RetryClient, ConfigError> {
        self(max_retries, transport)
    }
}

/// Builds reqwest clients wrapped with an exponential backoff retry policy
#[derive(Debug, Clone)]
pub struct DefaultRetryClientBuilder {
    initial_delay: Duration,
    max_delay: Duration,
}

impl Default for DefaultRetryClientBuilder {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl DefaultRetryClientBuilder {
    /// Set the bounds of the delay between retries
    pub fn with_retry_bounds(
        mut self,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay;
        self
    }

    fn base_client(
        transport: &TransportSettings,
    ) -> Result<reqwest::Client, ConfigError> {
        let mut builder = reqwest::Client::builder();

        if !transport.timeout.is_zero() {
            builder = builder.timeout(transport.timeout);
        }

        builder = builder.pool_idle_timeout(
            Some(transport.idle_conn_timeout).filter(|d| !d.is_zero()),
        );

        if let Ok(max_idle) =
            usize::try_from(transport.max_idle_conns_per_host)
        {
            if max_idle > 0 {
                builder = builder.pool_max_idle_per_host(max_idle);
            }
        }

        if transport.disable_compression {
            builder = builder.no_gzip();
        }

        if transport.insecure_skip_verify {
            warn!("Server certificate verification is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        } else if let Some(pool) = &transport.root_certificates {
            for der in pool.to_der_list()? {
                let cert = reqwest::Certificate::from_der(&der)
                    .map_err(ConfigError::ClientBuild)?;
                builder = builder.add_root_certificate(cert);
            }
        }

        builder.build().map_err(ConfigError::ClientBuild)
    }
}

impl RetryClientBuilder for DefaultRetryClientBuilder {
    fn build_client(
        &self,
        max_retries: i64,
        transport: TransportSettings,
    ) -> Result<RetryClient, ConfigError> {
        let max_retries =
            u32::try_from(max_retries.max(0)).unwrap_or(u32::MAX);
        let base_client = Self::base_client(&transport)?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(self.initial_delay, self.max_delay)
            .build_with_max_retries(max_retries);

        let client = reqwest_middleware::ClientBuilder::new(base_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(RetryClient::new(client, max_retries, transport))
    }
}

/// Build a client for a merged client config
pub fn create_http_client(
    mc: &ClientConfig,
    cert_pools: &CertPoolCache,
    builder: &dyn RetryClientBuilder,
) -> Result<RetryClient, ConfigError> {
    let transport = TransportSettings::from_client_config(mc, cert_pools);
    builder.build_client(mc.max_retries, transport)
}

/// Builds clients for the services of one configuration
///
/// All CA bundles are loaded when the factory is created, first the one of
/// the default client settings, then the ones of each service's merged
/// settings.
pub struct ClientFactory<'a> {
    cert_pools: CertPoolCache,
    builder: &'a dyn RetryClientBuilder,
}

impl<'a> ClientFactory<'a> {
    /// Load the CA bundles referenced by `config`
    ///
    /// Bundle paths are resolved relative to the directory of
    /// `config_path`. The merged component configs of the services must
    /// already be populated.
    pub fn init(
        config: &Config,
        config_path: &Path,
        builder: &'a dyn RetryClientBuilder,
    ) -> Result<Self, ConfigError> {
        let mut cert_pools = CertPoolCache::new();

        let default_path =
            &config.default_component_configs.client.ca_bundle_path;
        cert_pools.load_if_absent(
            &resolve_ca_path(config_path, default_path),
            default_path,
        )?;

        for service in config.service_configs.values() {
            let path =
                &service.merged_component_configs().client.ca_bundle_path;
            cert_pools
                .load_if_absent(&resolve_ca_path(config_path, path), path)?;
        }

        Ok(Self {
            cert_pools,
            builder,
        })
    }

    pub fn build(
        &self,
        mc: &ClientConfig,
    ) -> Result<RetryClient, ConfigError> {
        create_http_client(mc, &self.cert_pools, self.builder)
    }

    pub fn cert_pools(&self) -> &CertPoolCache {
        &self.cert_pools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flag::ConfigFlag;

    const CA_BUNDLE: &str = concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/testdata/example_cabundle.pem"
    );

    fn cache_with_bundle() -> CertPoolCache {
        let mut cache = CertPoolCache::new();
        cache
            .load_if_absent(CA_BUNDLE, "example_cabundle.pem")
            .unwrap(); //#[allow_ci]
        cache
    }

    #[test]
    fn test_transport_settings_from_client_config() {
        let cache = cache_with_bundle();
        let mc = ClientConfig {
            timeout: 10,
            idle_conn_timeout: 30,
            max_idle_conns_per_host: 16,
            max_conns_per_host: 32,
            max_retries: 2,
            disable_compression: ConfigFlag::True,
            insecure_skip_verify: ConfigFlag::False,
            ca_bundle_path: "example_cabundle.pem".to_string(),
        };

        let transport = TransportSettings::from_client_config(&mc, &cache);
        assert_eq!(transport.timeout, Duration::from_secs(10));
        assert_eq!(transport.idle_conn_timeout, Duration::from_secs(30));
        assert_eq!(transport.max_idle_conns_per_host, 16);
        assert_eq!(transport.max_conns_per_host, 32);
        assert!(transport.disable_compression);
        assert!(!transport.insecure_skip_verify);
        assert_eq!(
            transport.root_certificates.as_ref().map(|p| p.len()),
            Some(2)
        );
    }

    #[test]
    fn test_unset_flags_enable_compression_and_verification() {
        let transport = TransportSettings::from_client_config(
            &ClientConfig::default(),
            &CertPoolCache::new(),
        );
        assert!(!transport.disable_compression);
        assert!(!transport.insecure_skip_verify);
        assert!(transport.root_certificates.is_none());
    }

    #[test]
    fn test_skip_verify_ignores_ca_bundle() {
        let cache = cache_with_bundle();
        let mc = ClientConfig {
            insecure_skip_verify: ConfigFlag::True,
            ca_bundle_path: "example_cabundle.pem".to_string(),
            ..Default::default()
        };
        let transport = TransportSettings::from_client_config(&mc, &cache);
        assert!(transport.insecure_skip_verify);
        assert!(transport.root_certificates.is_none());
    }

    #[test]
    fn test_unknown_ca_bundle_falls_back_to_system_roots() {
        let cache = cache_with_bundle();
        let mc = ClientConfig {
            ca_bundle_path: "other.pem".to_string(),
            ..Default::default()
        };
        let transport = TransportSettings::from_client_config(&mc, &cache);
        assert!(transport.root_certificates.is_none());
    }

    #[test]
    fn test_negative_values_pass_through() {
        let mc = ClientConfig {
            timeout: -5,
            max_idle_conns_per_host: -1,
            max_retries: -3,
            ..Default::default()
        };
        let transport =
            TransportSettings::from_client_config(&mc, &CertPoolCache::new());
        assert_eq!(transport.timeout, Duration::ZERO);
        assert_eq!(transport.max_idle_conns_per_host, -1);

        let builder = |max_retries: i64, transport: TransportSettings| {
            assert_eq!(max_retries, -3);
            DefaultRetryClientBuilder::default()
                .build_client(max_retries, transport)
        };
        let client =
            create_http_client(&mc, &CertPoolCache::new(), &builder).unwrap(); //#[allow_ci]
        assert_eq!(client.max_retries(), 0);
    }

    #[test]
    fn test_default_builder_with_ca_bundle() {
        let cache = cache_with_bundle();
        let mc = ClientConfig {
            timeout: 5,
            max_retries: 2,
            ca_bundle_path: "example_cabundle.pem".to_string(),
            ..Default::default()
        };
        let builder = DefaultRetryClientBuilder::default();
        let client = create_http_client(&mc, &cache, &builder).unwrap(); //#[allow_ci]
        assert_eq!(client.max_retries(), 2);
        assert_eq!(client.transport().timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_factory_loads_each_bundle_once() {
        let mut config = Config::default();
        config.default_component_configs.client.ca_bundle_path =
            "example_cabundle.pem".to_string();
        for name in ["A", "B"] {
            let mut service = crate::model::ServiceConfig::new(name);
            service.merged_component_configs.client.ca_bundle_path =
                "example_cabundle.pem".to_string();
            config.service_configs.insert(name.to_string(), service);
        }

        let builder = DefaultRetryClientBuilder::default();
        let factory =
            ClientFactory::init(&config, Path::new(CA_BUNDLE), &builder)
                .unwrap(); //#[allow_ci]
        assert_eq!(factory.cert_pools().len(), 1);
        assert!(factory.cert_pools().contains("example_cabundle.pem"));

        let client = factory
            .build(&config.default_component_configs.client)
            .unwrap(); //#[allow_ci]
        assert!(client.transport().root_certificates.is_some());
    }
}

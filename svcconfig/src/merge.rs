// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! Merging of per-service overrides with the default component configs
//!
//! The merged value of a field is the override when it is set and the
//! default otherwise. "Set" means non-zero: `0` for integers, an empty
//! string and [`ConfigFlag::Unset`](crate::ConfigFlag::Unset) all count as
//! not given. An override cannot force a zero value over a non-zero
//! default; such values have to be set at the default level.

use crate::{
    error::ConfigError,
    model::{ClientConfig, ComponentConfigs, Config, ServiceLoggingConfig},
};
use log::*;

/// Fill the fields of `self` still at their zero value from `defaults`
pub trait FillUnset {
    fn fill_unset_from(&mut self, defaults: &Self);
}

fn fill<T: Default + PartialEq + Clone>(field: &mut T, default: &T) {
    if *field == T::default() {
        *field = default.clone();
    }
}

impl FillUnset for ServiceLoggingConfig {
    fn fill_unset_from(&mut self, defaults: &Self) {
        fill(&mut self.log_call_duration, &defaults.log_call_duration);
    }
}

impl FillUnset for ClientConfig {
    fn fill_unset_from(&mut self, defaults: &Self) {
        fill(&mut self.timeout, &defaults.timeout);
        fill(&mut self.idle_conn_timeout, &defaults.idle_conn_timeout);
        fill(
            &mut self.max_idle_conns_per_host,
            &defaults.max_idle_conns_per_host,
        );
        fill(&mut self.max_conns_per_host, &defaults.max_conns_per_host);
        fill(&mut self.max_retries, &defaults.max_retries);
        fill(&mut self.disable_compression, &defaults.disable_compression);
        fill(&mut self.insecure_skip_verify, &defaults.insecure_skip_verify);
        fill(&mut self.ca_bundle_path, &defaults.ca_bundle_path);
    }
}

impl FillUnset for ComponentConfigs {
    fn fill_unset_from(&mut self, defaults: &Self) {
        self.service_logging
            .fill_unset_from(&defaults.service_logging);
        self.client.fill_unset_from(&defaults.client);
    }
}

/// Merge `service_overrides` and `defaults` into `merged`
///
/// The overrides are copied into `merged` first, then every field left at
/// its zero value is taken from `defaults`. Either source may be absent and
/// is then skipped. An absent `merged` target is an error.
pub fn merge_component_configs(
    service_overrides: Option<&ComponentConfigs>,
    defaults: Option<&ComponentConfigs>,
    merged: Option<&mut ComponentConfigs>,
) -> Result<(), ConfigError> {
    let merged = merged.ok_or_else(|| {
        ConfigError::InvalidArgument(
            "no target given for merged component configs".to_string(),
        )
    })?;

    if let Some(overrides) = service_overrides {
        *merged = overrides.clone();
    }

    if let Some(defaults) = defaults {
        merged.fill_unset_from(defaults);
    }

    Ok(())
}

/// Populate the merged component configs of every service in `config`
pub fn merge_component_configs_for_all_services(
    config: &mut Config,
) -> Result<(), ConfigError> {
    let defaults = &config.default_component_configs;
    for (name, service) in config.service_configs.iter_mut() {
        merge_component_configs(
            Some(&service.component_config_overrides),
            Some(defaults),
            Some(&mut service.merged_component_configs),
        )
        .map_err(|e| ConfigError::Merge {
            service: name.clone(),
            source: Box::new(e),
        })?;
        debug!("Merged component configs for service {name}");
    }
    Ok(())
}

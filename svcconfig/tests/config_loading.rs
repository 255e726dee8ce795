// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

use svcconfig::{
    AuthKeyError, ConfigError, ConfigFlag, ConfigLoader, ContentHash,
    DefaultRetryClientBuilder, RetryClient, RetryClientBuilder,
    ServiceConfig, TransportSettings,
};

use std::{
    cell::RefCell,
    env,
    fs::File,
    io::Write,
    path::PathBuf,
    sync::{Arc, Mutex, OnceLock},
};
use tempfile::tempdir;

// Tests setting or unsetting environment variables must not run
// concurrently
static TEST_MUTEX: OnceLock<Arc<Mutex<()>>> = OnceLock::new();

fn testdata(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("testdata")
        .join(name)
}

fn abs_key_getter(
    service: &ServiceConfig,
    _client: &RetryClient,
) -> Result<String, AuthKeyError> {
    Ok(format!("{}-key", service.name))
}

#[test]
fn test_load_example_config() {
    let hash = ContentHash::new();
    let loader = ConfigLoader::new()
        .with_auth_key_getter(abs_key_getter)
        .with_content_hash(&hash);
    let config = loader.load(testdata("example_config.json")).unwrap(); //#[allow_ci]

    assert_eq!(config.env, "UnitTest");
    assert_eq!(config.port, 8000);
    assert_eq!(config.logging.level, "trace");
    assert!(!config.is_local());
    assert_eq!(config.hash(), "8b307ea4d579e5f69c857f3297b2c6ea");
    assert_eq!(hash.get(), Some(config.hash()));

    let defaults = &config.default_component_configs;
    assert_eq!(
        defaults.service_logging.log_call_duration,
        ConfigFlag::True
    );
    assert_eq!(defaults.client.disable_compression, ConfigFlag::False);
    assert_eq!(defaults.client.insecure_skip_verify, ConfigFlag::Unset);

    let abs = config.get_service_config("ABS").unwrap(); //#[allow_ci]
    assert_eq!(abs.url, "https://some.url.com");
    assert_eq!(abs.auth_credentials.euuid, "abs_euuid");
    assert_eq!(abs.auth_key(), "ABS-key");
    assert_eq!(
        abs.endpoint("ClaimStatus").map(|e| e.path.as_str()),
        Some("/mvClaimStatuses?")
    );

    let merged = abs.merged_component_configs();
    assert_eq!(merged.service_logging.log_call_duration, ConfigFlag::False);
    assert_eq!(merged.client.timeout, 30);
    assert_eq!(merged.client.idle_conn_timeout, 30);
    assert_eq!(merged.client.max_idle_conns_per_host, 16);
    assert_eq!(merged.client.max_conns_per_host, 32);
    assert_eq!(merged.client.max_retries, 2);
    assert_eq!(merged.client.ca_bundle_path, "example_cabundle.pem");

    let def = config.get_service_config("DEF").unwrap(); //#[allow_ci]
    assert_eq!(def.merged_component_configs().client.timeout, 10);
    assert_eq!(def.auth_key(), "");

    // Every service and the defaults got a client
    assert!(config.default_http_client().is_some());
    let abs_client = abs.http_client().unwrap(); //#[allow_ci]
    assert_eq!(abs_client.max_retries(), 2);
    assert_eq!(
        abs_client.transport().timeout,
        std::time::Duration::from_secs(30)
    );
    assert_eq!(
        abs_client
            .transport()
            .root_certificates
            .as_ref()
            .map(|p| p.len()),
        Some(2)
    );
    assert!(def.http_client().is_some());

    assert_eq!(config.option_as_string("DummyBool"), "true");
    assert_eq!(config.option_as_string("DummyNum"), "8");
    assert_eq!(config.option_as_string("DummyString"), "a dumb string");
    assert_eq!(config.option_as_string("Missing"), "");
}

#[test]
fn test_load_missing_file() {
    let hash = ContentHash::new();
    let errors = ConfigLoader::new()
        .with_content_hash(&hash)
        .load("not_a_config_file.json")
        .unwrap_err(); //#[allow_ci]
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], ConfigError::FileOpen { .. }));
    assert_eq!(hash.get(), None);
}

#[test]
fn test_load_unknown_field_fails() {
    let dir = tempdir().unwrap(); //#[allow_ci]
    let path = dir.path().join("config.json");
    let mut file = File::create(&path).unwrap(); //#[allow_ci]
    writeln!(file, r#"{{ "Env": "Dev", "Envv": "typo" }}"#).unwrap(); //#[allow_ci]

    let hash = ContentHash::new();
    let errors = ConfigLoader::new()
        .with_content_hash(&hash)
        .load(&path)
        .unwrap_err(); //#[allow_ci]
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], ConfigError::Decode(_)));
    assert!(errors[0].to_string().contains("unknown field"));
}

#[test]
fn test_load_missing_ca_bundle_fails() {
    let dir = tempdir().unwrap(); //#[allow_ci]
    let path = dir.path().join("config.json");
    let mut file = File::create(&path).unwrap(); //#[allow_ci]
    writeln!(
        file,
        r#"{{
            "DefaultComponentConfigs": {{
                "Client": {{ "CABundlePath": "missing.pem" }}
            }}
        }}"#
    )
    .unwrap(); //#[allow_ci]

    let hash = ContentHash::new();
    let errors = ConfigLoader::new()
        .with_content_hash(&hash)
        .load(&path)
        .unwrap_err(); //#[allow_ci]
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], ConfigError::CertFileUnreadable { .. }));
    assert!(errors[0].to_string().contains("missing.pem"));
}

#[test]
fn test_clients_built_default_first() {
    let calls = RefCell::new(Vec::new());
    let recorder = |max_retries: i64, transport: TransportSettings| {
        calls.borrow_mut().push(transport.timeout.as_secs());
        DefaultRetryClientBuilder::default()
            .build_client(max_retries, transport)
    };

    let hash = ContentHash::new();
    let config = ConfigLoader::new()
        .with_client_builder(recorder)
        .with_auth_key_getter(abs_key_getter)
        .with_content_hash(&hash)
        .load(testdata("example_config.json"))
        .unwrap(); //#[allow_ci]

    // Default client, then ABS and DEF in name order
    assert_eq!(*calls.borrow(), vec![10, 30, 10]);
    assert_eq!(config.service_configs.len(), 2);
}

#[test]
fn test_auth_key_errors_are_collected() {
    let getter = |service: &ServiceConfig, _: &RetryClient| {
        Err::<String, _>(AuthKeyError::other(format!(
            "no key for {}",
            service.name
        )))
    };

    let hash = ContentHash::new();
    let errors = ConfigLoader::new()
        .with_auth_key_getter(getter)
        .with_content_hash(&hash)
        .load(testdata("example_config.json"))
        .unwrap_err(); //#[allow_ci]

    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    assert_eq!(
        messages,
        vec!["Error retrieving auth key for ABS: no key for ABS".to_string()]
    );
}

#[test]
fn test_env_key_getter_with_unconfigured_variable() {
    // ABS requires auth but names no environment variable
    let hash = ContentHash::new();
    let errors = ConfigLoader::new()
        .with_content_hash(&hash)
        .load(testdata("example_config.json"))
        .unwrap_err(); //#[allow_ci]
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].to_string(), "Empty auth key for ABS");
}

#[test]
fn test_database_password_from_environment() {
    let _mutex = TEST_MUTEX.get_or_init(|| Arc::new(Mutex::new(()))).lock();
    let hash = ContentHash::new();
    let mut config = ConfigLoader::new()
        .with_auth_key_getter(abs_key_getter)
        .with_content_hash(&hash)
        .load(testdata("example_config.json"))
        .unwrap(); //#[allow_ci]

    env::set_var("CRM_DB_PW", "first");
    let db = config.get_database_config("MDBAuth").unwrap(); //#[allow_ci]
    assert_eq!(db.password, "first");

    // Every lookup reads the variable again
    env::set_var("CRM_DB_PW", "second");
    let db = config.get_database_config("MDBAuth").unwrap(); //#[allow_ci]
    assert_eq!(db.password, "second");

    let db = config.get_database_config("MDBNoAuth").unwrap(); //#[allow_ci]
    assert_eq!(db.password, "");

    env::remove_var("CRM_DB_PW");

    let err = config.get_database_config("Nope").unwrap_err(); //#[allow_ci]
    assert_eq!(
        err.to_string(),
        "unable to locate database configuration for Nope"
    );
}

#[test]
fn test_services_share_ca_bundle_load() {
    let dir = tempdir().unwrap(); //#[allow_ci]
    std::fs::copy(testdata("example_cabundle.pem"), dir.path().join("ca.pem"))
        .unwrap(); //#[allow_ci]
    let path = dir.path().join("config.json");
    let mut file = File::create(&path).unwrap(); //#[allow_ci]
    writeln!(
        file,
        r#"{{
            "DefaultComponentConfigs": {{
                "Client": {{ "CABundlePath": "ca.pem" }}
            }},
            "ServiceConfigs": [
                {{ "Name": "A" }},
                {{
                    "Name": "B",
                    "ComponentConfigOverrides": {{
                        "Client": {{ "InsecureSkipVerify": 2 }}
                    }}
                }}
            ]
        }}"#
    )
    .unwrap(); //#[allow_ci]

    let hash = ContentHash::new();
    let config = ConfigLoader::new()
        .with_content_hash(&hash)
        .load(&path)
        .unwrap(); //#[allow_ci]

    let a = config.get_service_config("A").unwrap(); //#[allow_ci]
    let b = config.get_service_config("B").unwrap(); //#[allow_ci]
    let a_roots = a
        .http_client()
        .and_then(|c| c.transport().root_certificates.clone());
    assert_eq!(a_roots.map(|p| p.len()), Some(2));

    // Skipping verification drops the custom roots
    let b_transport = b.http_client().map(|c| c.transport().clone()).unwrap(); //#[allow_ci]
    assert!(b_transport.insecure_skip_verify);
    assert!(b_transport.root_certificates.is_none());
}

#[test]
fn test_load_lenient_returns_config_and_key_errors() {
    let getter = |service: &ServiceConfig, _: &RetryClient| {
        Err::<String, _>(AuthKeyError::other(format!(
            "no key for {}",
            service.name
        )))
    };

    let hash = ContentHash::new();
    let (config, errors) = ConfigLoader::new()
        .with_auth_key_getter(getter)
        .with_content_hash(&hash)
        .load_lenient(testdata("example_config.json"))
        .unwrap(); //#[allow_ci]

    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        ConfigError::AuthKeyRetrieval { service, .. } if service == "ABS"
    ));
    let abs = config.get_service_config("ABS").unwrap(); //#[allow_ci]
    assert_eq!(abs.auth_key(), "");
    assert!(abs.http_client().is_some());
}

#[test]
fn test_load_without_auth_keys() {
    let calls = RefCell::new(0);
    let getter = |_: &ServiceConfig, _: &RetryClient| {
        *calls.borrow_mut() += 1;
        Ok::<_, AuthKeyError>("key".to_string())
    };

    let hash = ContentHash::new();
    let config = ConfigLoader::new()
        .with_auth_key_getter(getter)
        .with_content_hash(&hash)
        .without_auth_keys()
        .load(testdata("example_config.json"))
        .unwrap(); //#[allow_ci]

    assert_eq!(*calls.borrow(), 0);
    assert_eq!(config.get_service_config("ABS").unwrap().auth_key(), ""); //#[allow_ci]
}

#[test]
fn test_load_lenient_fails_before_auth_keys() {
    let hash = ContentHash::new();
    let err = ConfigLoader::new()
        .with_content_hash(&hash)
        .load_lenient("not_a_config_file.json")
        .unwrap_err(); //#[allow_ci]
    assert!(matches!(err, ConfigError::FileOpen { .. }));
}

use super::*;
use serial_test::serial;
use std::env;

const ALL_ENV_VARS: &[&str] = &[
    "GATEWATCH_CACHE_NAMESPACE",
    "GATEWATCH_CACHE_TTL_SECS",
    "GATEWATCH_CACHE_THRESHOLD",
    "GATEWATCH_CACHE_BY_PROVIDER",
    "GATEWATCH_CACHE_BY_MODEL",
    "GATEWATCH_EXCLUDE_SYSTEM_PROMPT",
    "GATEWATCH_CLEANUP_ON_SHUTDOWN",
    "GATEWATCH_EMBEDDING_DIM",
    "GATEWATCH_BACKGROUND_TIMEOUT_SECS",
    "GATEWATCH_QDRANT_URL",
    "GATEWATCH_QDRANT_COLLECTION",
    "GATEWATCH_EMBEDDING_API_BASE",
    "GATEWATCH_EMBEDDING_MODEL",
    "GATEWATCH_EMBEDDING_API_KEY",
    "GATEWATCH_OTLP_ENDPOINT",
    "GATEWATCH_OTLP_PROTOCOL",
    "GATEWATCH_OTLP_HEADERS",
    "GATEWATCH_OTLP_CA_FILE",
    "GATEWATCH_OTLP_INSECURE",
    "GATEWATCH_METRICS_PUSH_INTERVAL_SECS",
    "GATEWATCH_SERVICE_NAME",
    "GATEWATCH_SERVICE_VERSION",
    "GATEWATCH_ENVIRONMENT",
    "OTEL_RESOURCE_ATTRIBUTES",
];

fn clear_env() {
    // SAFETY: test-only; accepted thread-safety risk, serialized via #[serial].
    for var in ALL_ENV_VARS {
        unsafe { env::remove_var(var) };
    }
}

fn with_env_vars<F, R>(vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    // SAFETY: test-only; accepted thread-safety risk, serialized via #[serial].
    for (key, value) in vars {
        unsafe { env::set_var(key, value) };
    }
    let result = f();
    for (key, _) in vars {
        unsafe { env::remove_var(key) };
    }
    result
}

#[test]
fn default_config_has_sane_values() {
    let config = Config::default();
    assert_eq!(config.default_cache_namespace, "");
    assert_eq!(config.cache_similarity_threshold, 0.8);
    assert!(config.cache_by_model);
    assert!(!config.cache_by_provider);
    assert_eq!(config.metrics_push_interval_secs, 15);
    assert_eq!(config.otlp_protocol, OtlpProtocol::Http);
}

#[test]
#[serial]
fn from_env_with_defaults() {
    clear_env();
    let config = Config::from_env().expect("should parse with defaults");
    assert_eq!(config.default_cache_namespace, "");
    assert_eq!(config.cache_ttl_secs, 300);
}

#[test]
#[serial]
fn from_env_custom_namespace_and_threshold() {
    clear_env();
    with_env_vars(
        &[
            ("GATEWATCH_CACHE_NAMESPACE", "tenant-a"),
            ("GATEWATCH_CACHE_THRESHOLD", "0.65"),
        ],
        || {
            let config = Config::from_env().expect("should parse");
            assert_eq!(config.default_cache_namespace, "tenant-a");
            assert_eq!(config.cache_similarity_threshold, 0.65);
        },
    );
}

#[test]
#[serial]
fn invalid_threshold_out_of_range_is_rejected() {
    clear_env();
    with_env_vars(&[("GATEWATCH_CACHE_THRESHOLD", "1.5")], || {
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold { .. }));
    });
}

#[test]
#[serial]
fn invalid_threshold_unparseable_is_rejected() {
    clear_env();
    with_env_vars(&[("GATEWATCH_CACHE_THRESHOLD", "not-a-float")], || {
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::ThresholdParseError { .. }));
    });
}

#[test]
#[serial]
fn invalid_embedding_dim_zero_is_rejected() {
    clear_env();
    with_env_vars(&[("GATEWATCH_EMBEDDING_DIM", "0")], || {
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEmbeddingDim { .. }));
    });
}

#[test]
#[serial]
fn metrics_push_interval_out_of_bounds_is_rejected() {
    clear_env();
    with_env_vars(&[("GATEWATCH_METRICS_PUSH_INTERVAL_SECS", "500")], || {
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMetricsPushInterval { .. }));
    });
}

#[test]
#[serial]
fn otlp_protocol_grpc_parses() {
    clear_env();
    with_env_vars(&[("GATEWATCH_OTLP_PROTOCOL", "gRPC")], || {
        let config = Config::from_env().expect("should parse");
        assert_eq!(config.otlp_protocol, OtlpProtocol::Grpc);
    });
}

#[test]
#[serial]
fn otlp_protocol_invalid_value_is_rejected() {
    clear_env();
    with_env_vars(&[("GATEWATCH_OTLP_PROTOCOL", "carrier-pigeon")], || {
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOtlpProtocol { .. }));
    });
}

#[test]
#[serial]
fn otlp_headers_resolve_env_placeholders() {
    clear_env();
    with_env_vars(
        &[
            ("GATEWATCH_OTLP_HEADERS", "x-api-key=env.MY_SECRET,x-static=literal"),
            ("MY_SECRET", "shh"),
        ],
        || {
            let config = Config::from_env().expect("should parse");
            assert_eq!(config.otlp_headers.get("x-api-key").map(String::as_str), Some("shh"));
            assert_eq!(config.otlp_headers.get("x-static").map(String::as_str), Some("literal"));
        },
    );
    // SAFETY: test-only cleanup.
    unsafe { env::remove_var("MY_SECRET") };
}

#[test]
#[serial]
fn otlp_headers_missing_env_placeholder_is_fatal() {
    clear_env();
    with_env_vars(&[("GATEWATCH_OTLP_HEADERS", "x-api-key=env.DOES_NOT_EXIST")], || {
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingHeaderEnvVar { .. }));
    });
}

#[test]
#[serial]
fn otlp_headers_malformed_pair_is_rejected() {
    clear_env();
    with_env_vars(&[("GATEWATCH_OTLP_HEADERS", "not-a-pair")], || {
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MalformedKeyValue { .. }));
    });
}

#[test]
#[serial]
fn otel_resource_attributes_parse() {
    clear_env();
    with_env_vars(
        &[("OTEL_RESOURCE_ATTRIBUTES", "team=platform,region=us-east-1")],
        || {
            let config = Config::from_env().expect("should parse");
            assert_eq!(
                config.resource_attributes.get("team").map(String::as_str),
                Some("platform")
            );
            assert_eq!(
                config.resource_attributes.get("region").map(String::as_str),
                Some("us-east-1")
            );
        },
    );
}

#[test]
#[serial]
fn insecure_flag_takes_priority_over_ca_file() {
    clear_env();
    with_env_vars(
        &[
            ("GATEWATCH_OTLP_INSECURE", "true"),
            ("GATEWATCH_OTLP_CA_FILE", "/some/path.pem"),
        ],
        || {
            let config = Config::from_env().expect("should parse");
            assert_eq!(config.otlp_tls, TlsPolicy::Insecure);
        },
    );
}

#[test]
#[serial]
fn no_tls_override_defaults_to_system_roots() {
    clear_env();
    let config = Config::from_env().expect("should parse");
    assert_eq!(config.otlp_tls, TlsPolicy::SystemRoots);
}

#[test]
fn validate_rejects_relative_ca_file_path() {
    let config = Config {
        otlp_tls: TlsPolicy::CaFile(PathBuf::from("relative/ca.pem")),
        ..Config::default()
    };
    let err = config.validate().unwrap_err();
    assert!(matches!(err, ConfigError::NotAbsolute { .. }));
}

#[test]
fn validate_rejects_nonexistent_ca_file() {
    let config = Config {
        otlp_tls: TlsPolicy::CaFile(PathBuf::from("/nonexistent/ca.pem")),
        ..Config::default()
    };
    let err = config.validate().unwrap_err();
    assert!(matches!(err, ConfigError::PathNotFound { .. }));
}

#[test]
fn validate_accepts_system_roots_with_no_ca_file() {
    let config = Config::default();
    assert!(config.validate().is_ok());
}

#[test]
fn validate_rejects_ca_file_that_is_a_directory() {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let config = Config {
        otlp_tls: TlsPolicy::CaFile(manifest_dir.join("src")),
        ..Config::default()
    };
    let err = config.validate().unwrap_err();
    assert!(matches!(err, ConfigError::NotAFile { .. }));
}

#[test]
fn validate_accepts_a_real_absolute_canonical_ca_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ca.pem");
    std::fs::write(&path, b"-----BEGIN CERTIFICATE-----\n-----END CERTIFICATE-----\n").unwrap();

    let config = Config { otlp_tls: TlsPolicy::CaFile(path), ..Config::default() };
    assert!(config.validate().is_ok());
}

#[test]
fn validate_rejects_ca_file_path_that_is_a_symlink() {
    let dir = tempfile::tempdir().expect("tempdir");
    let real = dir.path().join("ca.pem");
    std::fs::write(&real, b"cert bytes").unwrap();
    let link = dir.path().join("ca-link.pem");
    #[cfg(unix)]
    std::os::unix::fs::symlink(&real, &link).expect("symlink");

    let config = Config { otlp_tls: TlsPolicy::CaFile(link), ..Config::default() };
    let err = config.validate().unwrap_err();
    assert!(matches!(err, ConfigError::IsSymlink { .. }));
}

#[test]
fn validate_rejects_non_canonical_ca_file_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ca.pem");
    std::fs::write(&path, b"cert bytes").unwrap();
    let noisy = dir.path().join(".").join("ca.pem");

    let config = Config { otlp_tls: TlsPolicy::CaFile(noisy), ..Config::default() };
    let err = config.validate().unwrap_err();
    assert!(matches!(err, ConfigError::NotCanonical { .. }));
}

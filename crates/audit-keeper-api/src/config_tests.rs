//! Tests for [`ServiceConfig`] validation and loading.

use super::*;
use serial_test::serial;
use std::io::Write;

// ============================================================================
// Validation
// ============================================================================

mod validation {
    use super::*;

    /// Verify that the defaults form a runnable configuration.
    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();

        assert!(config.validate().is_ok());
        assert!(config.file_sink.enabled);
        assert!(!config.dump.enabled);
        assert_eq!(config.status_store.backend, StatusStoreBackend::Memory);
    }

    /// Verify the minimum fallback file length.
    #[test]
    fn test_small_file_length_rejected() {
        let mut config = ServiceConfig::default();
        config.file_sink.max_file_length_mb = 9;

        let err = config.validate().unwrap_err();

        assert!(
            matches!(&err, ConfigError::Invalid { field, .. } if field == "file_sink.max_file_length_mb"),
            "unexpected error: {err:?}"
        );
    }

    /// Verify the minimum fallback file age.
    #[test]
    fn test_short_file_age_rejected() {
        let mut config = ServiceConfig::default();
        config.file_sink.max_file_age_seconds = 59;

        assert!(config.validate().is_err());
    }

    /// Verify that a disabled dump sink is not validated.
    #[test]
    fn test_disabled_dump_not_validated() {
        let mut config = ServiceConfig::default();
        config.dump.max_file_length_mb = 1;

        assert!(config.validate().is_ok());

        config.dump.enabled = true;
        assert!(config.validate().is_err());
    }

    /// Verify replay pool and flush limits.
    #[test]
    fn test_replay_limits() {
        let mut config = ServiceConfig::default();
        config.replay.worker_pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.replay.flush_interval_lines = 0;
        assert!(config.validate().is_err());
    }

    /// Verify that zero poll intervals are rejected.
    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = ServiceConfig::default();
        config.health.unhealthy_poll_interval = Duration::ZERO;

        let err = config.validate().unwrap_err();

        assert!(err.to_string().contains("health.unhealthy_poll_interval"));
    }

    /// Verify that the intake needs at least one attempt.
    #[test]
    fn test_zero_retry_attempts_rejected() {
        let mut config = ServiceConfig::default();
        config.audit.retry.max_attempts = 0;

        assert!(config.validate().is_err());
    }

    /// Verify that hidden file prefixes are rejected.
    #[test]
    fn test_hidden_prefix_rejected() {
        let mut config = ServiceConfig::default();
        config.file_sink.prefix = ".audit".to_string();

        assert!(config.validate().is_err());
    }
}

// ============================================================================
// Conversion
// ============================================================================

mod conversion {
    use super::*;

    /// Verify that sink settings are scaled to bytes and seconds.
    #[test]
    fn test_file_sink_settings() {
        let config = FileSinkConfig {
            enabled: true,
            path: PathBuf::from("/var/audit"),
            sub_path: Some("fallback".to_string()),
            prefix: "intake".to_string(),
            max_file_length_mb: 10,
            max_file_age_seconds: 120,
        };

        let settings = config.to_settings();

        assert_eq!(settings.max_file_bytes, 10 * 1024 * 1024);
        assert_eq!(settings.max_file_age, Duration::from_secs(120));
        assert_eq!(settings.directory(), PathBuf::from("/var/audit/fallback"));
        assert_eq!(settings.prefix, "intake");
    }

    /// Verify that YAML sections override only what they name.
    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
server:
  port: 9000
replay:
  worker_pool_size: 2
  publish_failure_policy: abort
broker:
  transport: management_api
"#;

        let config: ServiceConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.replay.worker_pool_size, 2);
        assert_eq!(
            config.replay.publish_failure_policy,
            audit_keeper_core::PublishFailurePolicy::Abort
        );
        assert_eq!(config.broker.transport, TransportMode::ManagementApi);
        assert_eq!(config.file_sink.max_file_length_mb, 20);
    }
}

// ============================================================================
// Loading
// ============================================================================

mod loading {
    use super::*;

    fn clear_env() {
        std::env::remove_var(CONFIG_FILE_ENV);
        std::env::remove_var("AK__SERVER__PORT");
        std::env::remove_var("AK__REPLAY__WORKER_POOL_SIZE");
    }

    /// Verify that an unconfigured environment loads the defaults.
    #[test]
    #[serial]
    fn test_load_defaults() {
        clear_env();

        let config = load_config().unwrap();

        assert_eq!(config.server.port, 8080);
    }

    /// Verify that environment variables override nested fields.
    #[test]
    #[serial]
    fn test_environment_overrides() {
        clear_env();
        std::env::set_var("AK__SERVER__PORT", "9191");
        std::env::set_var("AK__REPLAY__WORKER_POOL_SIZE", "7");

        let result = load_config();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.server.port, 9191);
        assert_eq!(config.replay.worker_pool_size, 7);
    }

    /// Verify that the explicit configuration file is read.
    #[test]
    #[serial]
    fn test_explicit_file() {
        clear_env();
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "cluster:\n  peers:\n    - http://peer-a:8080\n").unwrap();
        std::env::set_var(CONFIG_FILE_ENV, file.path());

        let result = load_config();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.cluster.peers, vec!["http://peer-a:8080".to_string()]);
    }

    /// Verify that a missing explicit file is an error.
    #[test]
    #[serial]
    fn test_missing_explicit_file() {
        clear_env();
        std::env::set_var(CONFIG_FILE_ENV, "/nonexistent/audit-keeper.yaml");

        let result = load_config();
        clear_env();

        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}

use std::time::Duration;

use secrecy::ExposeSecret;
use seqload::config::{Config, RunConfig};

// Environment variables are process-wide, so every env case lives in one test.
#[test]
fn config_from_env() {
    unsafe {
        std::env::remove_var("SEQLOAD_BASE_URL");
        std::env::remove_var("SEQLOAD_AUTH_TOKEN");
        std::env::remove_var("SEQLOAD_TIMEOUT_SECS");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::set_var("SEQLOAD_BASE_URL", "http://localhost:8080");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.base_url, "http://localhost:8080");
    assert!(config.auth_token.is_none());
    assert_eq!(config.request_timeout, Duration::from_secs(30));
    assert!(!config.log_level.is_empty());

    unsafe {
        std::env::set_var("SEQLOAD_AUTH_TOKEN", "tok-123");
        std::env::set_var("SEQLOAD_TIMEOUT_SECS", "5");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(
        config.auth_token.as_ref().map(|t| t.expose_secret().to_string()),
        Some("tok-123".to_string())
    );
    assert_eq!(config.request_timeout, Duration::from_secs(5));
    assert!(!format!("{config:?}").contains("tok-123"));

    unsafe {
        std::env::set_var("SEQLOAD_TIMEOUT_SECS", "soon");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::remove_var("SEQLOAD_BASE_URL");
        std::env::remove_var("SEQLOAD_AUTH_TOKEN");
        std::env::remove_var("SEQLOAD_TIMEOUT_SECS");
    }
}

#[test]
fn run_config_defaults_are_valid() {
    let run = RunConfig::default();
    assert_eq!(run.ceiling_workers, 10);
    assert_eq!(run.ramp_rate_per_second, 2);
    assert!(run.validate().is_ok());
}

#[test]
fn run_config_rejects_inverted_wait_range() {
    let run = RunConfig {
        wait_min: Duration::from_secs(3),
        wait_max: Duration::from_secs(1),
        ..RunConfig::default()
    };
    assert!(run.validate().is_err());

    let run = RunConfig {
        tick_interval: Duration::ZERO,
        ..RunConfig::default()
    };
    assert!(run.validate().is_err());
}

/*!
 * Integration tests for the tunegate CLI
 *
 * Runs the built binary against configuration and quota files in a
 * temporary state directory.
 */

use std::path::Path;
use std::process::{Command, Output};
use tempfile::tempdir;
use tunegate::config::GatewayConfig;
use tunegate::error::{EXIT_FATAL, EXIT_SUCCESS};
use tunegate::resilience::QuotaTracker;

fn tunegate(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tunegate"))
        .args(args)
        .current_dir(cwd)
        .env("RUST_LOG", "off")
        .output()
        .unwrap()
}

/// Write a config whose quota files live in `dir`
fn write_config(dir: &Path) -> std::path::PathBuf {
    let config = GatewayConfig {
        state_dir: dir.to_path_buf(),
        ..Default::default()
    };
    let path = dir.join("tunegate.toml");
    config.to_file(&path).unwrap();
    path
}

#[test]
fn test_init_writes_loadable_defaults() {
    let dir = tempdir().unwrap();

    let output = tunegate(&["init"], dir.path());
    assert_eq!(output.status.code(), Some(EXIT_SUCCESS));

    let config = GatewayConfig::from_file(&dir.path().join("tunegate.toml")).unwrap();
    assert_eq!(config, GatewayConfig::default());
}

#[test]
fn test_init_refuses_to_overwrite() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    std::fs::write(&path, "# keep me\n").unwrap();

    let output = tunegate(&["init", "--output", "custom.toml"], dir.path());
    assert_eq!(output.status.code(), Some(EXIT_FATAL));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "# keep me\n");

    let output = tunegate(&["init", "--output", "custom.toml", "--force"], dir.path());
    assert_eq!(output.status.code(), Some(EXIT_SUCCESS));
    assert!(GatewayConfig::from_file(&path).is_ok());
}

#[test]
fn test_status_reports_persisted_usage() {
    let dir = tempdir().unwrap();
    let config_path = write_config(dir.path());
    let config = GatewayConfig::from_file(&config_path).unwrap();

    let tracker = QuotaTracker::new(
        "huggingface",
        config.upstream("huggingface").quota_config(),
        Some(config.quota_path("huggingface")),
    );
    tracker.consume(3).unwrap();

    let output = tunegate(
        &["status", "--config", config_path.to_str().unwrap(), "--json"],
        dir.path(),
    );
    assert_eq!(output.status.code(), Some(EXIT_SUCCESS));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["huggingface"]["hourly_used"], 3);
    assert_eq!(report["huggingface"]["hourly_limit"], 250);
    assert_eq!(report["spotify"]["hourly_used"], 0);
    assert_eq!(report["openai"]["hourly_limit"], 0);

    assert_eq!(report["huggingface"]["hourly_remaining"], 247);
    assert_eq!(report["huggingface"]["status"], "ok");
    assert_eq!(report["huggingface"]["is_available"], true);
    assert_eq!(report["openai"]["status"], "exceeded");
    assert_eq!(report["openai"]["is_available"], false);
}

#[test]
fn test_reset_zeroes_one_upstream() {
    let dir = tempdir().unwrap();
    let config_path = write_config(dir.path());
    let config = GatewayConfig::from_file(&config_path).unwrap();

    for name in ["huggingface", "groq"] {
        QuotaTracker::new(
            name,
            config.upstream(name).quota_config(),
            Some(config.quota_path(name)),
        )
        .consume(2)
        .unwrap();
    }

    let output = tunegate(
        &["reset", "huggingface", "--config", config_path.to_str().unwrap()],
        dir.path(),
    );
    assert_eq!(output.status.code(), Some(EXIT_SUCCESS));

    let read = |name: &str| {
        QuotaTracker::read_usage(
            name,
            config.upstream(name).quota_config(),
            &config.quota_path(name),
        )
        .unwrap()
    };
    assert_eq!(read("huggingface").hourly_used, 0);
    assert_eq!(read("groq").hourly_used, 2);
}

#[test]
fn test_reset_unknown_upstream_fails() {
    let dir = tempdir().unwrap();
    let config_path = write_config(dir.path());

    let output = tunegate(
        &["reset", "lastfm", "--config", config_path.to_str().unwrap()],
        dir.path(),
    );
    assert_eq!(output.status.code(), Some(EXIT_FATAL));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown upstream: lastfm"));
}

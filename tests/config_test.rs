//! Configuration loading tests: file, partial JSON and environment layering.

use std::collections::HashMap;
use std::path::PathBuf;

use dr_core::config::Config;
use dr_core::EndpointVariant;

#[test]
fn partial_file_keeps_defaults_for_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docrelay.json");
    std::fs::write(
        &path,
        r#"{"server": {"port": 9123}, "delivery": {"upload": {"max_attempts": 7}}}"#,
    )
    .unwrap();

    let config = Config::load_or_default(Some(&path));
    assert_eq!(config.server.port, 9123);
    assert_eq!(config.delivery.policy(EndpointVariant::Upload).max_attempts, 7);
    assert_eq!(
        config.delivery.policy(EndpointVariant::Callback),
        &Config::default().delivery.callback
    );
}

#[test]
fn unreadable_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();

    let defaults = serde_json::to_value(Config::default()).unwrap();
    let broken = serde_json::to_value(Config::load_or_default(Some(&path))).unwrap();
    let missing =
        serde_json::to_value(Config::load_or_default(Some(&dir.path().join("missing.json"))))
            .unwrap();
    assert_eq!(broken, defaults);
    assert_eq!(missing, defaults);
}

#[test]
fn environment_overrides_file_values() {
    let mut config = Config::from_json(r#"{"workers": {"count": 2}}"#).unwrap();
    let env: HashMap<&str, &str> = [
        ("DOC_LOCAL_DIR", "/srv/docs"),
        ("CONVERT_TIMEOUT", "45"),
        ("WORKER_COUNT", "nope"),
        ("TARGET_ENDPOINT_SUFFIX", "hook/converted"),
    ]
    .into_iter()
    .collect();

    config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

    assert_eq!(config.storage.local_dir, PathBuf::from("/srv/docs"));
    assert_eq!(config.engines.convert_timeout_secs, 45);
    assert_eq!(config.workers.count, 2, "invalid override is ignored");
    assert_eq!(config.delivery.callback.path, "hook/converted");
}

#[test]
fn strict_parse_rejects_malformed_json() {
    let err = Config::from_json("[]").unwrap_err();
    assert_eq!(err.code(), "config_error");
}

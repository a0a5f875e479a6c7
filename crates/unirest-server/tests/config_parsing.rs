use std::{env, fs};

use unirest_filter::OverflowStrategy;
use unirest_server::RemoteBackend;
use unirest_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("unirest.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8081
body_limit_bytes = 1024

[remote]
backend = "memory"
affiliate_key = "6d2f1a3e-0000-4000-8000-000000000001"

[[remote.accounts]]
username = "alice"
password = "s3cret"

[[remote.companies]]
id = 1
name = "Demo A/S"

[connections]
ttl_secs = 600
max_waiters = 5

[filter]
or_limit = 10
overflow = "reject"

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.remote.backend, RemoteBackend::Memory);
    assert_eq!(cfg.remote.accounts.len(), 1);
    assert_eq!(cfg.remote.companies[0].id, 1);
    assert_eq!(cfg.connections.ttl_secs, 600);
    assert_eq!(cfg.connections.max_waiters, 5);
    assert_eq!(cfg.connections.login_attempts, 5);
    assert_eq!(cfg.filter.or_limit, 10);
    assert_eq!(cfg.filter.overflow, OverflowStrategy::Reject);
    assert_eq!(cfg.logging.level, "debug");

    // 2) Env override should win over file
    unsafe {
        env::set_var("UNIREST__CONNECTIONS__TTL_SECS", "900");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.connections.ttl_secs, 900);
    unsafe {
        env::remove_var("UNIREST__CONNECTIONS__TTL_SECS");
    }

    // 3) http backend without a base url is rejected
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[remote]
backend = "http"
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("base_url"));
}

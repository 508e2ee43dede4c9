//! Integration tests for configuration loading

use std::io::Write;

use cairn::config::{Config, EvaluatorKind};
use cairn::engine::Cairn;
use cairn::error::CairnError;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_from_explicit_path() {
    let file = write_config(
        r#"
[lifecycle]
prune_threshold = 0.2

[search]
rrf_k = 30.0
strategy_timeout_ms = 250

[budget]
period_limit_usd = 2.5

[reflection]
evaluator = "scorer"

[workers]
tenants = ["acme", "globex"]
reflection_interval_secs = 5
"#,
    );

    let config = Config::load(Some(file.path().to_path_buf())).unwrap();
    assert_eq!(config.lifecycle.prune_threshold, 0.2);
    assert_eq!(config.search.rrf_k, 30.0);
    assert_eq!(config.search.strategy_timeout_ms, 250);
    assert_eq!(config.budget.period_limit_usd, 2.5);
    assert_eq!(config.reflection.evaluator, EvaluatorKind::Scorer);
    assert_eq!(config.workers.tenants, vec!["acme", "globex"]);
    assert_eq!(config.workers.reflection_interval_secs, 5);
    // Untouched sections keep their defaults
    assert_eq!(config.policy.min_success_rate, 0.7);

    let cairn = Cairn::in_memory(config).unwrap();
    assert_eq!(cairn.budget_status("acme").limit, 2.5);
}

#[test]
fn test_out_of_range_values_are_rejected() {
    let file = write_config(
        r#"
[budget]
warning_ratio = 1.5
"#,
    );
    let result = Config::from_file(file.path());
    assert!(matches!(result, Err(CairnError::Config(_))));
}

#[test]
fn test_malformed_file_is_a_config_error() {
    let file = write_config("[search\nrrf_k = ");
    assert!(matches!(Config::from_file(file.path()), Err(CairnError::Config(_))));
}

#[test]
fn test_missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    assert!(matches!(Config::load(Some(path)), Err(CairnError::Config(_))));
}

#[test]
fn test_bad_gateway_mode_fails_engine_build() {
    let mut config = Config::default();
    config.gateway.mode = "roulette".to_string();
    assert!(matches!(Cairn::in_memory(config), Err(CairnError::Config(_))));

    let mut config = Config::default();
    config.gateway.mode = "fallback".to_string();
    assert!(matches!(Cairn::in_memory(config), Err(CairnError::Config(_))));
}

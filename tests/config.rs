use pretty_assertions::assert_eq;
use repograph::config::{AnalysisConfig, FilterPolicy, CONFIG_FILE_NAME};
use repograph::error::RepographError;
use std::fs;
use tempfile::tempdir;

#[test]
fn missing_file_yields_defaults() {
    let dir = tempdir().unwrap();
    let config = AnalysisConfig::load(dir.path(), None).unwrap();

    assert_eq!(config.analysis.top_n, 10);
    assert_eq!(config.analysis.parse_error_threshold, 0.05);
    assert!(!config.analysis.count_merge_churn);
    assert_eq!(config.ingest.commit_batch_size, 500);
    assert_eq!(config.ingest.file_batch_size, 2000);
    assert!(config.filter.is_ignored("Cargo.lock"));
    assert!(config.filter.is_ignored("node_modules/react/index.js"));
    assert!(!config.filter.is_ignored("src/main.rs"));
}

#[test]
fn loads_repository_config() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        r#"
[filter]
ignore_extensions = [".PNG", "svg"]
ignore_prefixes = ["./generated/"]

[analysis]
top_n = 3
count_merge_churn = true
max_commits = 200

[ingest]
commit_batch_size = 50
max_retries = 2
"#,
    )
    .unwrap();

    let config = AnalysisConfig::load(dir.path(), None).unwrap();

    assert_eq!(config.analysis.top_n, 3);
    assert!(config.analysis.count_merge_churn);
    assert_eq!(config.analysis.max_commits, Some(200));
    assert_eq!(config.analysis.directory_depth, 1);
    assert_eq!(config.ingest.commit_batch_size, 50);
    assert_eq!(config.ingest.file_batch_size, 2000);
    assert_eq!(config.ingest.max_retries, 2);

    assert!(config.filter.is_ignored("assets/logo.png"));
    assert!(config.filter.is_ignored("generated/api.rs"));
    assert!(!config.filter.is_ignored("Cargo.lock"));
    assert_eq!(config.filter.ignore_extensions().collect::<Vec<_>>(), vec!["png", "svg"]);
}

#[test]
fn explicit_path_wins() {
    let dir = tempdir().unwrap();
    let custom = dir.path().join("custom.toml");
    fs::write(&custom, "[analysis]\ntop_n = 7\n").unwrap();
    fs::write(dir.path().join(CONFIG_FILE_NAME), "[analysis]\ntop_n = 2\n").unwrap();

    let config = AnalysisConfig::load(dir.path(), Some(custom.as_path())).unwrap();
    assert_eq!(config.analysis.top_n, 7);
}

#[test]
fn invalid_values_are_rejected() {
    for content in [
        "[analysis]\nparse_error_threshold = 1.5\n",
        "[analysis]\ntop_n = 0\n",
        "[ingest]\nfile_batch_size = 0\n",
    ] {
        match AnalysisConfig::from_toml(content) {
            Err(RepographError::Config(_)) => {}
            other => panic!("expected a config error for {content:?}, got {other:?}"),
        }
    }
    assert!(matches!(
        AnalysisConfig::from_toml("[analysis]\ntop_n = \"many\"\n"),
        Err(RepographError::Toml(_))
    ));
}

#[test]
fn filter_policy_normalizes_entries() {
    let policy = FilterPolicy::new(["  .Min.JS "], ["/build/"], ["yarn.lock"]);

    assert!(policy.is_ignored("static/app.min.js"));
    assert!(!policy.is_ignored("static/app.js"));
    assert!(policy.is_ignored("./build/out.txt"));
    assert!(policy.is_ignored("web/yarn.lock"));
    assert!(!FilterPolicy::none().is_ignored("logo.png"));
}

use pretty_assertions::assert_eq;
use repograph::config::AnalysisConfig;
use repograph::graph::{edge, label, SqliteGraphStore, UpsertPort};
use repograph::pipeline::{CancellationToken, HistorySource, Pipeline, RunState, Stage};

fn entry(sha: &str, date: &str, name: &str, email: &str, body: &str) -> String {
    format!("\u{1e}{sha}\u{1f}{date}\u{1f}{name}\u{1f}{email}\u{1f}\u{1f}change {sha}\n\n{body}")
}

fn demo_log() -> String {
    [
        entry("aaaaaaa5", "2022-05-01T10:00:00Z", "Ann", "ann@example.com", "1\t1\tREADME.md\n"),
        entry("aaaaaaa4", "2022-04-01T10:00:00Z", "Bob", "bob@example.com", "2\t2\tsrc/cli.rs\n4\t0\tdocs/guide.md\n"),
        entry("aaaaaaa3", "2022-03-01T10:00:00Z", "Ann", "a.n.n@gmail.com", "30\t0\tsrc/cli.rs\n"),
        entry("aaaaaaa2", "2022-02-01T10:00:00Z", "Bob", "bob@example.com", "10\t5\tsrc/lib.rs\n"),
        entry("aaaaaaa1", "2022-01-01T10:00:00Z", "Ann", "a.n.n@gmail.com", "50\t0\tsrc/lib.rs\n10\t0\tREADME.md\n-\t-\tlogo.png\n"),
    ]
    .concat()
}

fn raw(text: &str) -> HistorySource<'_> {
    HistorySource::RawLog {
        text,
        name: "demo".to_string(),
        root: None,
    }
}

#[test]
fn profile_run_checkpoints_each_stage() {
    let config = AnalysisConfig::default();
    let log = demo_log();
    let outcome = Pipeline::new(&config).profile(raw(&log));

    assert_eq!(outcome.state, RunState::Succeeded);
    let stages: Vec<Stage> = outcome.checkpoints.iter().map(|c| c.stage).collect();
    assert_eq!(stages, vec![Stage::Extract, Stage::Resolve, Stage::Aggregate, Stage::Assemble]);

    let profile = outcome.profile;
    assert!(profile.valid);
    assert_eq!(profile.git_summary.commits, 5);
    assert_eq!(profile.git_summary.contributors, 3);
    assert_eq!(profile.hotspots[0].path, "src/lib.rs");
    assert!(profile.hotspots.iter().all(|h| h.path != "logo.png"));
    assert_eq!(profile.repo.language, "Rust");
}

#[test]
fn ingest_run_writes_and_verifies() {
    let mut config = AnalysisConfig::default();
    config.analysis.top_n = 3;
    let log = demo_log();
    let mut store = SqliteGraphStore::open_in_memory().unwrap();

    for _ in 0..2 {
        let outcome = Pipeline::new(&config).ingest(raw(&log), &mut store);
        assert!(outcome.state.is_success(), "{:?}", outcome.state);
        assert_eq!(outcome.checkpoints.len(), 6);
        assert!(outcome.ingest.is_some());
    }

    let stats = store.stats().unwrap();
    assert_eq!(stats.node_count(label::REPO), 1);
    assert_eq!(stats.node_count(label::COMMIT), 5);
    assert_eq!(stats.edge_count(edge::HAS_CONTRIBUTOR), 3);
    assert_eq!(stats.edge_count(edge::HAS_HOTSPOT), 3);
}

#[test]
fn parse_failure_yields_invalid_profile_and_no_ingest() {
    let config = AnalysisConfig::default();
    let log = format!("{}\u{1e}broken header\n", demo_log());
    let mut store = SqliteGraphStore::open_in_memory().unwrap();

    let outcome = Pipeline::new(&config).ingest(raw(&log), &mut store);

    assert_eq!(outcome.failed_stage(), Some(Stage::Extract));
    assert!(outcome.checkpoints.is_empty());
    let profile = &outcome.profile;
    assert!(!profile.valid);
    assert_eq!(profile.git_summary.commits, 5);
    assert_eq!(profile.warnings.len(), 1);
    assert!(outcome.ingest.is_none());
    assert_eq!(store.stats().unwrap().node_count(label::REPO), 0);
    assert!(outcome.into_result().is_err());
}

#[test]
fn cancelled_run_stops_before_extract() {
    let config = AnalysisConfig::default();
    let log = demo_log();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = Pipeline::new(&config)
        .with_cancellation(cancel)
        .profile(raw(&log));

    assert!(!outcome.profile.valid);
    assert_eq!(outcome.profile.git_summary.commits, 0);
    assert_eq!(outcome.profile.failures[0].stage, Stage::Extract);
    assert!(outcome.checkpoints.is_empty());
    match outcome.state {
        RunState::Failed { stage, reason } => {
            assert_eq!(stage, Stage::Extract);
            assert!(reason.contains("cancelled"));
        }
        RunState::Succeeded => panic!("cancelled run succeeded"),
    }
}

#[test]
fn same_second_rename_carries_churn_forward() {
    let log = concat!(
        "\u{1e}0123abcd\u{1f}2024-03-01T10:00:00Z\u{1f}Ann\u{1f}ann@example.com\u{1f}fedc9876\u{1f}move\n\n",
        "1\t0\t{old.py => new.py}\n",
        "\u{1e}fedc9876\u{1f}2024-03-01T10:00:00Z\u{1f}Ann\u{1f}ann@example.com\u{1f}\u{1f}start\n\n",
        "20\t0\told.py\n",
    );
    let config = AnalysisConfig::default();
    let outcome = Pipeline::new(&config).profile(raw(log));

    assert!(outcome.state.is_success(), "{:?}", outcome.state);
    let hotspots: Vec<(&str, u64)> = outcome
        .profile
        .hotspots
        .iter()
        .map(|h| (h.path.as_str(), h.changes))
        .collect();
    assert_eq!(hotspots, vec![("new.py", 21)]);
}

mod common;

use common::{add, at, commit, merge, modify};
use pretty_assertions::assert_eq;
use repograph::config::{ClassificationRules, FilterPolicy};
use repograph::hotspot::{HotspotCalculator, HotspotOptions};
use repograph::identity::ContributorIdentityResolver;
use repograph::metrics::{classify, CommitSummary, FileCategory, RepositoryMetrics, RepositoryMetricsCalculator};
use repograph::model::CommitRecord;

fn metrics_for(records: &[CommitRecord]) -> RepositoryMetrics {
    let policy = FilterPolicy::none();
    let rules = ClassificationRules::default();
    let identities = ContributorIdentityResolver::new().resolve(records);
    let hotspots = HotspotCalculator::new(&policy, HotspotOptions::default()).compute(records);
    RepositoryMetricsCalculator::new(&rules).compute(records, &identities, &hotspots)
}

#[test]
fn single_commit_has_zero_evolution() {
    let records = vec![commit("a1", "Ann", "ann@example.com", at(2022, 6, 1), vec![add("src/main.rs", 10)])];
    let metrics = metrics_for(&records);

    assert_eq!(metrics.evolution_years, 0);
    assert_eq!(metrics.avg_commits_per_year, 1.0);
    assert_eq!(metrics.avg_hotspot_changes, 10.0);
    assert_eq!(metrics.bus_factor, 1);
}

#[test]
fn evolution_spans_calendar_years() {
    let records = vec![
        commit("b1", "Ann", "ann@example.com", at(2019, 12, 30), vec![add("src/a.rs", 1)]),
        commit("b2", "Ann", "ann@example.com", at(2021, 5, 1), vec![modify("src/a.rs", 1, 1)]),
        commit("b3", "Bob", "bob@example.com", at(2022, 1, 2), vec![modify("src/a.rs", 1, 1)]),
        merge(commit("b4", "Bob", "bob@example.com", at(2023, 1, 1), vec![])),
    ];
    let metrics = metrics_for(&records);

    assert_eq!(metrics.evolution_years, 4);
    assert_eq!(metrics.avg_commits_per_year, 1.0);
    assert_eq!(metrics.merge_ratio, 0.25);
}

#[test]
fn empty_history_yields_zeroes() {
    let metrics = metrics_for(&[]);
    assert_eq!(metrics, RepositoryMetrics::default());
}

#[test]
fn ratios_follow_classification() {
    let records = vec![commit(
        "c1",
        "Ann",
        "ann@example.com",
        at(2022, 1, 1),
        vec![
            add("src/lib.rs", 10),
            add("src/parser.rs", 10),
            add("tests/parser.rs", 5),
            add("docs/guide.md", 3),
            add("Makefile", 1),
        ],
    )];
    let metrics = metrics_for(&records);

    assert_eq!(metrics.ratio_code, 0.4);
    assert_eq!(metrics.ratio_tests, 0.2);
    assert_eq!(metrics.ratio_docs, 0.2);
    assert!(metrics.ratio_code + metrics.ratio_tests + metrics.ratio_docs <= 1.0);
}

#[test]
fn classification_precedence() {
    let rules = ClassificationRules::default();
    assert_eq!(classify("src/main.rs", &rules), FileCategory::Code);
    assert_eq!(classify("lib/helpers.txt", &rules), FileCategory::Docs);
    assert_eq!(classify("src/store_test.go", &rules), FileCategory::Tests);
    assert_eq!(classify("tests/README.md", &rules), FileCategory::Tests);
    assert_eq!(classify("test_parser.py", &rules), FileCategory::Tests);
    assert_eq!(classify("README.md", &rules), FileCategory::Docs);
    assert_eq!(classify("web/app.ts", &rules), FileCategory::Code);
    assert_eq!(classify("Makefile", &rules), FileCategory::Uncategorized);
}

#[test]
fn bus_factor_covers_half_the_commits() {
    let mut records = Vec::new();
    for (i, (name, count)) in [("Ann", 3), ("Bob", 3), ("Cid", 3)].iter().enumerate() {
        for n in 0..*count {
            records.push(commit(
                &format!("{i}{n}"),
                name,
                &format!("{}@example.com", name.to_lowercase()),
                at(2022, 1, 1 + n as u32),
                vec![],
            ));
        }
    }
    assert_eq!(metrics_for(&records).bus_factor, 2);
}

#[test]
fn commit_summary_counts_merges_and_bounds() {
    let records = vec![
        commit("d1", "Ann", "ann@example.com", at(2020, 1, 1), vec![]),
        merge(commit("d2", "Ann", "ann@example.com", at(2021, 1, 1), vec![])),
    ];
    let summary = CommitSummary::from_records(&records);

    assert_eq!(summary.commits, 2);
    assert_eq!(summary.merges, 1);
    assert_eq!(summary.first_commit, Some(at(2020, 1, 1)));
    assert_eq!(summary.last_commit, Some(at(2021, 1, 1)));
}

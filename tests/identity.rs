mod common;

use common::{at, commit, modify};
use pretty_assertions::assert_eq;
use repograph::identity::{identity_key, normalize_email, normalize_name, ContributorIdentityResolver, IdentityKey};
use repograph::model::Warning;
use std::collections::HashSet;

#[test]
fn gmail_dots_merge_into_one_contributor() {
    let records = vec![
        commit("a1", "Alice Bob", "a.b@gmail.com", at(2021, 1, 1), vec![]),
        commit("a2", "Alice Bob", "a.b@gmail.com", at(2021, 1, 2), vec![]),
        commit("a3", "Alice Bob", "ab@gmail.com", at(2021, 1, 3), vec![]),
    ];

    let mut resolver = ContributorIdentityResolver::new();
    let table = resolver.resolve(&records);

    assert_eq!(table.len(), 1);
    let identity = table.get("ab@gmail.com").expect("merged identity");
    assert_eq!(identity.total_commits, 3);
    assert_eq!(identity.display_name, "Alice Bob");
    assert_eq!(identity.aliases.len(), 2);
    assert_eq!(identity.first_commit, Some(at(2021, 1, 1)));
    assert_eq!(identity.last_commit, Some(at(2021, 1, 3)));
    assert!(resolver.warnings().is_empty());
}

#[test]
fn email_normalization_rules() {
    assert_eq!(normalize_email("  A.B@GMail.com "), Some("ab@gmail.com".to_string()));
    assert_eq!(normalize_email("a.b@googlemail.com"), Some("ab@gmail.com".to_string()));
    assert_eq!(
        normalize_email("12345+octo@users.noreply.github.com"),
        Some("12345@users.noreply.github.com".to_string())
    );
    assert_eq!(normalize_email("first.last@example.org"), Some("first.last@example.org".to_string()));
    assert_eq!(normalize_email("<dev@example.org>"), Some("dev@example.org".to_string()));
    assert_eq!(normalize_email(""), None);
    assert_eq!(normalize_email("not-an-email"), None);
    assert_eq!(normalize_email("root@localhost"), None);
}

#[test]
fn name_normalization_strips_bot_markers() {
    assert_eq!(normalize_name("  jane   DOE "), "Jane Doe");
    assert_eq!(normalize_name("dependabot[bot]"), "Dependabot");
    assert_eq!(normalize_name("Renovate (BOT)"), "Renovate");
    assert_eq!(normalize_name(""), "");
}

#[test]
fn missing_email_falls_back_to_name_key() {
    assert_eq!(identity_key("jane doe", ""), IdentityKey::Name("Jane Doe".to_string()));
    assert_eq!(identity_key("", ""), IdentityKey::Unknown);

    let records = vec![
        commit("b1", "jane doe", "", at(2022, 3, 1), vec![]),
        commit("b2", "Jane  Doe", "invalid", at(2022, 3, 2), vec![]),
        commit("b3", "", "", at(2022, 3, 3), vec![]),
    ];
    let table = ContributorIdentityResolver::new().resolve(&records);

    assert_eq!(table.len(), 2);
    let jane = table.get("name:Jane Doe").expect("name-keyed identity");
    assert_eq!(jane.total_commits, 2);
    assert_eq!(jane.display_name, "Jane Doe");
    let unknown = table.get("unknown").expect("unknown identity");
    assert_eq!(unknown.display_name, "Unknown");
}

#[test]
fn canonical_emails_are_unique() {
    let records = vec![
        commit("c1", "Ann", "ann@example.com", at(2020, 1, 1), vec![]),
        commit("c2", "ann", "ANN@example.com", at(2020, 1, 2), vec![]),
        commit("c3", "Bob", "bob@example.com", at(2020, 1, 3), vec![]),
        commit("c4", "Bob", "b.o.b@gmail.com", at(2020, 1, 4), vec![]),
        commit("c5", "Carl", "", at(2020, 1, 5), vec![]),
    ];
    let table = ContributorIdentityResolver::new().resolve(&records);

    let emails: Vec<&str> = table.iter().map(|i| i.canonical_email.as_str()).collect();
    let unique: HashSet<&str> = emails.iter().copied().collect();
    assert_eq!(emails.len(), unique.len());
    assert_eq!(table.iter().map(|i| i.total_commits).sum::<u64>(), records.len() as u64);
}

#[test]
fn display_name_tie_is_reported() {
    let records = vec![
        commit("d1", "Alice", "alice@example.com", at(2020, 1, 1), vec![]),
        commit("d2", "Al", "alice@example.com", at(2020, 1, 2), vec![]),
    ];
    let mut resolver = ContributorIdentityResolver::new();
    let table = resolver.resolve(&records);

    assert_eq!(table.get("alice@example.com").unwrap().display_name, "Al");
    let warnings = resolver.take_warnings();
    assert_eq!(warnings.len(), 1);
    assert!(matches!(
        &warnings[0],
        Warning::IdentityResolution { canonical_id, .. } if canonical_id == "alice@example.com"
    ));
}

#[test]
fn most_frequent_alias_names_the_identity() {
    let records = vec![
        commit("e1", "rob", "rob@example.com", at(2020, 1, 1), vec![]),
        commit("e2", "Robert Smith", "rob@example.com", at(2020, 1, 2), vec![]),
        commit("e3", "Robert Smith", "rob@example.com", at(2020, 1, 3), vec![]),
    ];
    let mut resolver = ContributorIdentityResolver::new();
    let table = resolver.resolve(&records);

    assert_eq!(table.get("rob@example.com").unwrap().display_name, "Robert Smith");
    assert!(resolver.warnings().is_empty());
}

#[test]
fn commits_are_attributed_and_ranked() {
    let records = vec![
        commit("f1", "Zed", "zed@example.com", at(2020, 1, 1), vec![modify("a.rs", 1, 0)]),
        commit("f2", "Amy", "amy@example.com", at(2020, 1, 2), vec![]),
        commit("f3", "Zed", "zed@example.com", at(2020, 1, 3), vec![]),
        commit("f4", "Bea", "bea@example.com", at(2020, 1, 4), vec![]),
    ];
    let table = ContributorIdentityResolver::new().resolve(&records);

    let owner = table.for_commit(&records[0]).expect("attributed");
    assert_eq!(owner.canonical_email, "zed@example.com");

    let ranked: Vec<&str> = table.ranked().iter().map(|i| i.display_name.as_str()).collect();
    assert_eq!(ranked, vec!["Zed", "Amy", "Bea"]);
}

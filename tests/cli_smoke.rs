use assert_cmd::prelude::*;
use pretty_assertions::assert_eq;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn has_git() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

fn init_git_repo(dir: &Path) {
    // init and basic identity
    assert!(Command::new("git")
        .args(["init"])
        .current_dir(dir)
        .status()
        .unwrap()
        .success());
    assert!(Command::new("git")
        .args(["config", "core.autocrlf", "false"])
        .current_dir(dir)
        .status()
        .unwrap()
        .success());
    assert!(Command::new("git")
        .args(["config", "core.safecrlf", "false"])
        .current_dir(dir)
        .status()
        .unwrap()
        .success());
    assert!(Command::new("git")
        .args(["config", "user.email", "you@example.com"])
        .current_dir(dir)
        .status()
        .unwrap()
        .success());
    assert!(Command::new("git")
        .args(["config", "user.name", "Your Name"])
        .current_dir(dir)
        .status()
        .unwrap()
        .success());
}

fn ensure_clean(dir: &Path) {
    assert!(Command::new("git")
        .args(["reset", "--hard"])
        .current_dir(dir)
        .status()
        .unwrap()
        .success());
}

fn commit_file(dir: &Path, name: &str, content: &str) {
    commit_file_as(dir, name, content, None);
}

fn commit_file_as(dir: &Path, name: &str, content: &str, author: Option<&str>) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut f = File::create(&path).unwrap();
    f.write_all(content.as_bytes()).unwrap();
    f.sync_all().unwrap();
    assert!(Command::new("git")
        .args(["add", "."])
        .current_dir(dir)
        .status()
        .unwrap()
        .success());
    let message = format!("add {name}");
    let mut args = vec!["commit", "-m", message.as_str()];
    if let Some(author) = author {
        args.extend(["--author", author]);
    }
    assert!(Command::new("git")
        .args(&args)
        .current_dir(dir)
        .status()
        .unwrap()
        .success());
    ensure_clean(dir);
}

fn git_at(dir: &Path, args: &[&str], date: &str) {
    assert!(Command::new("git")
        .args(args)
        .env("GIT_AUTHOR_DATE", date)
        .env("GIT_COMMITTER_DATE", date)
        .current_dir(dir)
        .status()
        .unwrap()
        .success());
}

fn run_json(dir: &Path, args: &[&str]) -> serde_json::Value {
    let mut cmd = Command::cargo_bin("repograph").unwrap();
    cmd.current_dir(dir).arg("--repo").arg(dir).args(args);
    let out = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&out).unwrap()
}

#[test]
fn profile_json_reports_contributors_and_hotspots() {
    let dir = tempdir().unwrap();
    if !has_git() {
        return;
    }
    init_git_repo(dir.path());
    commit_file(dir.path(), "src/lib.rs", "pub fn a() {}\npub fn b() {}\n");
    commit_file_as(
        dir.path(),
        "src/lib.rs",
        "pub fn a() {}\npub fn b() {}\npub fn c() {}\n",
        Some("Other Person <other@example.com>"),
    );
    commit_file(dir.path(), "README.md", "# demo\n");

    let v = run_json(dir.path(), &["profile", "--json"]);

    assert_eq!(v["valid"], true);
    assert_eq!(v["git_summary"]["commits"], 3);
    assert_eq!(v["git_summary"]["contributors"], 2);
    assert_eq!(v["contributors"][0]["email"], "you@example.com");
    assert_eq!(v["hotspots"][0]["path"], "src/lib.rs");
    assert_eq!(v["hotspots"][0]["changes"], 3);
    assert_eq!(v["repo"]["language"], "Rust");
    assert_eq!(v["metrics"]["evolution_years"], 0);
}

#[test]
fn top_limits_hotspots() {
    let dir = tempdir().unwrap();
    if !has_git() {
        return;
    }
    init_git_repo(dir.path());
    commit_file(dir.path(), "a.py", "a\n");
    commit_file(dir.path(), "b.py", "b\nb\n");
    commit_file(dir.path(), "c.py", "c\nc\nc\n");

    let v = run_json(dir.path(), &["profile", "--json", "--top", "2"]);
    let hotspots: Vec<&str> = v["hotspots"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["path"].as_str().unwrap())
        .collect();
    assert_eq!(hotspots, vec!["c.py", "b.py"]);
}

#[test]
fn ingest_twice_keeps_graph_counts() {
    let dir = tempdir().unwrap();
    if !has_git() {
        return;
    }
    init_git_repo(dir.path());
    commit_file(dir.path(), "main.py", "print('hi')\n");
    commit_file(dir.path(), "logo.png", "not really a png\n");
    commit_file(dir.path(), "main.py", "print('hello')\n");

    let store = dir.path().join("graph.db");
    let store_arg = store.to_str().unwrap();
    let first = run_json(dir.path(), &["ingest", "--json", "--store", store_arg]);
    let second = run_json(dir.path(), &["ingest", "--json", "--store", store_arg]);

    assert_eq!(first["state"]["state"], "succeeded");
    assert_eq!(first["report"]["verification"], second["report"]["verification"]);
    assert_eq!(second["report"]["verification"]["nodes"]["Commit"], 3);
    assert_eq!(second["report"]["verification"]["nodes"]["Hotspot"], 1);
    assert_eq!(second["report"]["verification"]["edges"]["HAS_CONTRIBUTOR"], 1);
}

#[test]
fn raw_log_file_is_accepted() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("history.log");
    fs::write(
        &log,
        "\u{1e}abcdef1\u{1f}2024-01-02T03:04:05Z\u{1f}Ann\u{1f}ann@example.com\u{1f}\u{1f}init\n\n3\t0\tsrc/main.rs\n",
    )
    .unwrap();

    let v = run_json(dir.path(), &["profile", "--json", "--log-file", log.to_str().unwrap()]);

    assert_eq!(v["git_summary"]["commits"], 1);
    assert_eq!(v["hotspots"][0]["path"], "src/main.rs");
}

#[test]
fn missing_repository_fails_naming_the_stage() {
    let dir = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("repograph").unwrap();
    cmd.current_dir(dir.path())
        .arg("--repo")
        .arg(dir.path().join("nowhere"))
        .arg("profile");
    let out = cmd.assert().failure().get_output().stderr.clone();
    let stderr = String::from_utf8_lossy(&out);
    assert!(stderr.contains("extract"), "stderr: {stderr}");
}

#[test]
fn rename_within_the_same_second_keeps_one_hotspot() {
    let dir = tempdir().unwrap();
    if !has_git() {
        return;
    }
    init_git_repo(dir.path());
    let body: String = (1..=20).map(|i| format!("line_{i} = {i}\n")).collect();
    fs::write(dir.path().join("old.py"), &body).unwrap();
    let date = "2024-03-01T10:00:00+00:00";
    git_at(dir.path(), &["add", "."], date);
    git_at(dir.path(), &["commit", "-m", "start"], date);

    git_at(dir.path(), &["mv", "old.py", "new.py"], date);
    fs::write(dir.path().join("new.py"), format!("{body}line_21 = 21\n")).unwrap();
    git_at(dir.path(), &["add", "."], date);
    git_at(dir.path(), &["commit", "-m", "move"], date);

    let v = run_json(dir.path(), &["profile", "--json"]);

    let hotspots = v["hotspots"].as_array().unwrap();
    assert_eq!(hotspots.len(), 1, "{hotspots:?}");
    assert_eq!(hotspots[0]["path"], "new.py");
    assert_eq!(hotspots[0]["changes"], 21);
}

#[test]
fn shallow_clone_profiles_available_history() {
    let origin = tempdir().unwrap();
    let clone = tempdir().unwrap();
    if !has_git() {
        return;
    }
    init_git_repo(origin.path());
    for name in ["a.txt", "b.txt", "c.txt", "d.txt"] {
        commit_file(origin.path(), name, "one line\n");
    }

    let url = format!("file://{}", origin.path().display());
    let target = clone.path().join("shallow");
    assert!(Command::new("git")
        .args(["clone", "--depth", "2", url.as_str()])
        .arg(&target)
        .status()
        .unwrap()
        .success());

    let v = run_json(&target, &["profile", "--json"]);

    assert_eq!(v["valid"], true);
    assert_eq!(v["git_summary"]["commits"], 2);
    // The boundary commit is diffed against an empty tree.
    assert_eq!(v["hotspots"].as_array().unwrap().len(), 4);
}

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use repograph::config::FilterPolicy;
use repograph::hotspot::{HotspotCalculator, HotspotOptions};
use repograph::identity::ContributorIdentityResolver;
use repograph::model::{ChangeType, CommitRecord, FileChange};

fn synthetic_history(commits: usize, files_per_commit: usize) -> Vec<CommitRecord> {
    let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    (0..commits)
        .map(|i| CommitRecord {
            sha: format!("{i:040x}"),
            author_name: format!("Dev {}", i % 17),
            author_email: format!("dev{}@example.com", i % 17),
            timestamp: start + Duration::hours(i as i64),
            subject: format!("change {i}"),
            is_merge: i % 25 == 0,
            parent_shas: Vec::new(),
            files: (0..files_per_commit)
                .map(|f| {
                    let path = format!("src/module{}/file{}.rs", (i + f) % 40, (i * 7 + f) % 300);
                    FileChange::new(path, (i % 50) as u32, (f % 10) as u32, ChangeType::Modify)
                })
                .collect(),
        })
        .collect()
}

fn bench_hotspots(c: &mut Criterion) {
    let records = synthetic_history(5_000, 8);
    let policy = FilterPolicy::default();
    let calculator = HotspotCalculator::new(&policy, HotspotOptions::default());

    c.bench_function("hotspots_5k_commits", |b| {
        b.iter(|| calculator.compute(black_box(&records)))
    });

    c.bench_function("identities_5k_commits", |b| {
        b.iter(|| ContributorIdentityResolver::new().resolve(black_box(&records)))
    });
}

criterion_group!(benches, bench_hotspots);
criterion_main!(benches);

use crate::config::AnalysisConfig;
use crate::git::repo::parse_date;
use crate::git::GitRepo;
use crate::graph::{SqliteGraphStore, UpsertPort};
use crate::model::DateRange;
use crate::pipeline::{HistorySource, IngestReport, Pipeline, PipelineOutcome, RunState, Stage};
use crate::profile::RepositoryProfile;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use console::style;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Graph store location relative to the repository root.
pub const DEFAULT_STORE: &str = ".repograph/graph.db";

#[derive(Parser)]
#[command(name = "repograph")]
#[command(about = "Git history profiler: contributors, churn hotspots, metrics and a knowledge graph")]
#[command(version)]
pub struct Cli {
    #[clap(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Clone)]
pub struct CommonArgs {
    #[arg(long, help = "Path to git repository")]
    pub repo: Option<PathBuf>,

    #[arg(long, help = "Path to a repograph.toml (default: <repo>/repograph.toml)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Start from this commit or date (RFC3339, YYYY-MM-DD, or natural language)")]
    pub since: Option<String>,

    #[arg(long, help = "End at this commit or date (RFC3339, YYYY-MM-DD, or natural language)")]
    pub until: Option<String>,

    #[arg(long, help = "Only analyze the N most recent commits")]
    pub max_commits: Option<usize>,

    #[arg(short, long, action = ArgAction::Count, help = "Increase log verbosity (-v info, -vv debug)")]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the repository profile.
    Profile {
        #[arg(long, help = "Output as JSON")]
        json: bool,

        #[arg(long, help = "Number of contributors and hotspots to keep")]
        top: Option<usize>,

        #[arg(long, help = "Read history from a raw `git log --numstat` dump")]
        log_file: Option<PathBuf>,
    },
    /// Build the profile and write it into the graph store.
    Ingest {
        #[arg(long, help = "Path to graph database (default: <repo>/.repograph/graph.db)")]
        store: Option<PathBuf>,

        #[arg(long, help = "Output as JSON")]
        json: bool,

        #[arg(long, help = "Number of contributors and hotspots to keep")]
        top: Option<usize>,

        #[arg(long, help = "Read history from a raw `git log --numstat` dump")]
        log_file: Option<PathBuf>,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Log to stderr. `RUST_LOG` wins over `-v`.
    pub fn init_logging(&self) {
        let level = match self.common.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .try_init();
    }

    pub fn execute(self) -> Result<()> {
        match self.command {
            Commands::Profile { json, top, log_file } => exec_profile(&self.common, json, top, log_file.as_deref()),
            Commands::Ingest {
                store,
                json,
                top,
                log_file,
            } => exec_ingest(&self.common, store, json, top, log_file.as_deref()),
        }
    }
}

/// Everything a run needs, resolved from the command line and config file.
struct Session {
    repo: Option<GitRepo>,
    raw_log: Option<String>,
    root: PathBuf,
    name: String,
    config: AnalysisConfig,
    range: DateRange,
}

impl Session {
    fn open(common: &CommonArgs, top: Option<usize>, log_file: Option<&Path>, progress: bool) -> Result<Self> {
        let root = match &common.repo {
            Some(path) => path.clone(),
            None => std::env::current_dir().context("Failed to read current directory")?,
        };

        let (repo, raw_log) = match log_file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read git log from {}", path.display()))?;
                (None, Some(text))
            }
            None => {
                let repo = GitRepo::open(Some(&root))
                    .with_context(|| format!("Run failed at stage {}: cannot open git repository", Stage::Extract))?
                    .with_progress(progress);
                (Some(repo), None)
            }
        };

        let root = repo.as_ref().map(|r| r.path().to_path_buf()).unwrap_or(root);
        let name = match &repo {
            Some(r) => r.name(),
            None => directory_name(&root),
        };

        let mut config = AnalysisConfig::load(&root, common.config.as_deref()).context("Failed to load configuration")?;
        if let Some(max) = common.max_commits {
            config.analysis.max_commits = Some(max);
        }
        if let Some(top) = top {
            config.analysis.top_n = top;
        }
        config.validate().context("Invalid configuration")?;

        let range = match &repo {
            Some(r) => r.resolve_range(common.since.as_deref(), common.until.as_deref()),
            None => date_range(common.since.as_deref(), common.until.as_deref()),
        }
        .context("Failed to resolve date range")?;

        Ok(Self {
            repo,
            raw_log,
            root,
            name,
            config,
            range,
        })
    }

    fn source(&self) -> HistorySource<'_> {
        match (&self.repo, &self.raw_log) {
            (Some(repo), _) => HistorySource::Repository(repo),
            (None, text) => HistorySource::RawLog {
                text: text.as_deref().unwrap_or_default(),
                name: self.name.clone(),
                root: Some(self.root.clone()).filter(|p| p.is_dir()),
            },
        }
    }
}

fn exec_profile(common: &CommonArgs, json: bool, top: Option<usize>, log_file: Option<&Path>) -> Result<()> {
    let session = Session::open(common, top, log_file, !json)?;
    let mut pipeline = Pipeline::new(&session.config).with_range(session.range.clone());
    let outcome = pipeline.profile(session.source());

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.profile)?);
    } else {
        output_profile(&outcome.profile);
    }
    finish(outcome)
}

fn exec_ingest(
    common: &CommonArgs,
    store: Option<PathBuf>,
    json: bool,
    top: Option<usize>,
    log_file: Option<&Path>,
) -> Result<()> {
    let session = Session::open(common, top, log_file, !json)?;
    let store_path = store.unwrap_or_else(|| session.root.join(DEFAULT_STORE));
    debug!("Using graph store at {}", store_path.display());

    let mut store = SqliteGraphStore::open(&store_path, session.config.ingest.timeout()).with_context(|| {
        format!(
            "Run failed at stage {}: cannot open graph store {}",
            Stage::Ingest,
            store_path.display()
        )
    })?;

    let mut pipeline = Pipeline::new(&session.config).with_range(session.range.clone());
    let outcome = pipeline.ingest(session.source(), &mut store);

    if json {
        let output = json!({
            "repo": session.name,
            "store": store_path.to_string_lossy(),
            "state": outcome.state,
            "report": outcome.ingest,
            "checkpoints": outcome.checkpoints,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if let Some(report) = &outcome.ingest {
        output_ingest(&session.name, &store_path, report);
        if let Ok(stats) = store.stats() {
            println!(
                "\n{} {} nodes, {} edges",
                style("Graph totals:").bold(),
                stats.nodes.values().sum::<u64>(),
                stats.edges.values().sum::<u64>()
            );
        }
    }
    finish(outcome)
}

fn finish(outcome: PipelineOutcome) -> Result<()> {
    match outcome.state {
        RunState::Succeeded => Ok(()),
        RunState::Failed { stage, reason } => Err(anyhow!("Run failed at stage {stage}: {reason}")),
    }
}

fn output_profile(profile: &RepositoryProfile) {
    let summary = &profile.git_summary;
    println!(
        "{} {} ({}, {})",
        style("Repository").bold(),
        style(&profile.repo.name).cyan(),
        profile.repo.language,
        profile.repo.license.as_deref().unwrap_or("no license")
    );
    println!(
        "{:<14} {} ({} merges)",
        "Commits", summary.commits, summary.merges
    );
    println!(
        "{:<14} {} .. {}",
        "History",
        format_date(summary.first_commit),
        format_date(summary.last_commit)
    );
    println!("{:<14} {}", "Contributors", summary.contributors);
    println!("{:<14} {}", "Tracked files", summary.tracked_files);

    println!("\n{:<40} {:<40} {:>8}", style("Contributor").bold(), style("Email").bold(), style("Commits").bold());
    println!("{}", "─".repeat(90));
    for c in &profile.contributors {
        println!("{:<40} {:<40} {:>8}", c.name, c.email, c.commits);
    }

    println!(
        "\n{:<60} {:>8} {:>8} {:>8}",
        style("Hotspot").bold(),
        style("Changes").bold(),
        style("Added").bold(),
        style("Deleted").bold()
    );
    println!("{}", "─".repeat(90));
    for h in &profile.hotspots {
        println!("{:<60} {:>8} {:>8} {:>8}", h.path, h.changes, h.additions, h.deletions);
    }

    let m = &profile.metrics;
    println!("\n{}", style("Metrics").bold());
    println!("{:<22} {}", "Evolution (years)", m.evolution_years);
    println!("{:<22} {:.1}", "Commits per year", m.avg_commits_per_year);
    println!("{:<22} {:.1}", "Avg hotspot changes", m.avg_hotspot_changes);
    println!(
        "{:<22} code {:.0}%  tests {:.0}%  docs {:.0}%",
        "File mix",
        m.ratio_code * 100.0,
        m.ratio_tests * 100.0,
        m.ratio_docs * 100.0
    );
    println!("{:<22} {}", "Bus factor", m.bus_factor);
    println!("{:<22} {:.0}%", "Merge ratio", m.merge_ratio * 100.0);

    if !profile.warnings.is_empty() {
        println!("\n{} {}", style("Warnings:").yellow().bold(), profile.warnings.len());
        for w in profile.warnings.iter().take(10) {
            println!("  {w}");
        }
        if profile.warnings.len() > 10 {
            println!("  ... and {} more", profile.warnings.len() - 10);
        }
    }
    if !profile.valid {
        println!("\n{}", style("Profile is incomplete").red().bold());
    }
}

fn output_ingest(name: &str, store_path: &Path, report: &IngestReport) {
    let outcome = &report.outcome;
    println!(
        "{} {} -> {}",
        style("Ingested").green().bold(),
        style(name).cyan(),
        store_path.display()
    );
    println!(
        "{} batches, {} writes, {} retries, {} pruned",
        outcome.batches, outcome.writes, outcome.retries, outcome.pruned
    );

    println!("\n{:<24} {:>10}", style("Node label").bold(), style("Count").bold());
    println!("{}", "─".repeat(35));
    for (label, count) in &report.verification.nodes {
        println!("{:<24} {:>10}", label, count);
    }
    println!("\n{:<24} {:>10}", style("Edge kind").bold(), style("Count").bold());
    println!("{}", "─".repeat(35));
    for (kind, count) in &report.verification.edges {
        println!("{:<24} {:>10}", kind, count);
    }
}

fn format_date(date: Option<DateTime<Utc>>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn directory_name(path: &Path) -> String {
    let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    resolved
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "repository".to_string())
}

/// Date-only range for sources without a repository to resolve revisions in.
fn date_range(since: Option<&str>, until: Option<&str>) -> crate::error::Result<DateRange> {
    let parse = |input: &str| {
        parse_date(input).ok_or_else(|| crate::error::RepographError::InvalidDate(format!("Invalid date '{input}'")))
    };
    let mut range = DateRange::new();
    if let Some(s) = since {
        range = range.with_since(parse(s)?);
    }
    if let Some(u) = until {
        range = range.with_until(parse(u)?);
    }
    if let (Some(s), Some(u)) = (range.since, range.until) {
        if s > u {
            return Err(crate::error::RepographError::InvalidDate(format!(
                "Invalid range: since ({s}) is after until ({u})"
            )));
        }
    }
    Ok(range)
}

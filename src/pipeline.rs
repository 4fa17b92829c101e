//! Stage runner: `Extract -> Resolve -> Aggregate -> Assemble -> Ingest -> Verify`.
//!
//! Every run starts from extraction. Completed stages are checkpointed and
//! logged; the first failing stage ends the run in [`RunState::Failed`].

use crate::config::AnalysisConfig;
use crate::error::{RepographError, Result};
use crate::git::{CommitHistoryExtractor, ExtractedHistory, GitRepo, LogParser};
use crate::graph::{GraphIngester, IngestOutcome, IngestPlan, UpsertPort, VerificationReport};
use crate::hotspot::{HotspotCalculator, HotspotOptions};
use crate::identity::ContributorIdentityResolver;
use crate::metrics::{CommitSummary, RepositoryMetricsCalculator};
use crate::model::DateRange;
use crate::profile::{ProfileAssembler, RepoInfo, RepositoryProfile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extract,
    Resolve,
    Aggregate,
    Assemble,
    Ingest,
    Verify,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Resolve => "resolve",
            Stage::Aggregate => "aggregate",
            Stage::Assemble => "assemble",
            Stage::Ingest => "ingest",
            Stage::Verify => "verify",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RunState {
    Succeeded,
    Failed { stage: Stage, reason: String },
}

impl RunState {
    pub fn is_success(&self) -> bool {
        matches!(self, RunState::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stage: Stage,
    pub completed_at: DateTime<Utc>,
}

/// Cooperative cancellation, checked between stages.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Where commit history comes from.
pub enum HistorySource<'a> {
    Repository(&'a GitRepo),
    RawLog {
        text: &'a str,
        name: String,
        root: Option<PathBuf>,
    },
}

impl HistorySource<'_> {
    fn name(&self) -> String {
        match self {
            HistorySource::Repository(repo) => repo.name(),
            HistorySource::RawLog { name, .. } => name.clone(),
        }
    }

    fn root(&self) -> Option<&Path> {
        match self {
            HistorySource::Repository(repo) => Some(repo.path()),
            HistorySource::RawLog { root, .. } => root.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub outcome: IngestOutcome,
    pub verification: VerificationReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub state: RunState,
    /// Best effort on failure; `valid` is false unless every stage ran.
    pub profile: RepositoryProfile,
    pub ingest: Option<IngestReport>,
    pub checkpoints: Vec<Checkpoint>,
}

impl PipelineOutcome {
    pub fn failed_stage(&self) -> Option<Stage> {
        match &self.state {
            RunState::Failed { stage, .. } => Some(*stage),
            RunState::Succeeded => None,
        }
    }

    /// Convert a failed run into the error that ended it.
    pub fn into_result(self) -> Result<Self> {
        match &self.state {
            RunState::Succeeded => Ok(self),
            RunState::Failed { stage, reason } => Err(RepographError::StageFailed {
                stage: *stage,
                reason: reason.clone(),
            }),
        }
    }
}

pub struct Pipeline<'a> {
    config: &'a AnalysisConfig,
    range: DateRange,
    cancel: CancellationToken,
    checkpoints: Vec<Checkpoint>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Self {
        Self {
            config,
            range: DateRange::new(),
            cancel: CancellationToken::new(),
            checkpoints: Vec::new(),
        }
    }

    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run through `Assemble`.
    pub fn profile(&mut self, source: HistorySource<'_>) -> PipelineOutcome {
        self.checkpoints.clear();
        let (profile, failure) = self.build_profile(&source);
        self.finish(profile, None, failure)
    }

    /// Run every stage, writing the profile into `store`.
    pub fn ingest<S: UpsertPort>(&mut self, source: HistorySource<'_>, store: &mut S) -> PipelineOutcome {
        self.checkpoints.clear();
        let (profile, failure) = self.build_profile(&source);
        if failure.is_some() {
            return self.finish(profile, None, failure);
        }

        let result = self.write_graph(&profile, store);
        match result {
            Ok(report) => self.finish(profile, Some(report), None),
            Err((stage, e)) => self.finish(profile, None, Some((stage, e.to_string()))),
        }
    }

    fn write_graph<S: UpsertPort>(
        &mut self,
        profile: &RepositoryProfile,
        store: &mut S,
    ) -> std::result::Result<IngestReport, (Stage, RepographError)> {
        self.guard(Stage::Ingest).map_err(|e| (Stage::Ingest, e))?;
        let mut ingester = GraphIngester::new(store, self.config.ingest.clone());
        let plan = IngestPlan::from_profile(profile).map_err(|e| (Stage::Ingest, e))?;
        let outcome = ingester.write(profile, &plan).map_err(|e| (Stage::Ingest, e))?;
        self.checkpoint(Stage::Ingest);

        self.guard(Stage::Verify).map_err(|e| (Stage::Verify, e))?;
        let verification = ingester.verify(&plan).map_err(|e| (Stage::Verify, e))?;
        self.checkpoint(Stage::Verify);

        Ok(IngestReport { outcome, verification })
    }

    /// Extract through Assemble. Any failure still assembles a best-effort
    /// profile marked invalid; without readable history it is empty.
    fn build_profile(&mut self, source: &HistorySource<'_>) -> (RepositoryProfile, Option<(Stage, String)>) {
        let config = self.config;
        let options = &config.analysis;
        let mut assembler = ProfileAssembler::new(RepoInfo::detect(source.name(), None, &[]), options.top_n);

        let extracted = self.guard(Stage::Extract).and_then(|()| self.extract(source));
        let history = match extracted {
            Ok(history) => history,
            Err(e) => {
                let reason = e.to_string();
                assembler.stage_failed(Stage::Extract, reason.clone());
                return (assembler.assemble(), Some((Stage::Extract, reason)));
            }
        };
        let mut failure = None;
        match history.ensure_within(options.parse_error_threshold) {
            Ok(()) => self.checkpoint(Stage::Extract),
            Err(e) => failure = Some((Stage::Extract, e.to_string())),
        }

        assembler.warnings(history.warnings.iter().cloned());
        if let Some((stage, reason)) = &failure {
            assembler.stage_failed(*stage, reason.clone());
        }

        let stages = [Stage::Resolve, Stage::Aggregate, Stage::Assemble];
        for stage in stages {
            if let Err(e) = self.guard(stage) {
                assembler.stage_failed(stage, e.to_string());
                let profile = assembler.assemble();
                return (profile, failure.or(Some((stage, e.to_string()))));
            }
            match stage {
                Stage::Resolve => {
                    let mut resolver = ContributorIdentityResolver::new();
                    let identities = resolver.resolve(&history.records);
                    assembler
                        .history(&history.records, &identities)
                        .identities(identities)
                        .warnings(resolver.take_warnings());
                }
                Stage::Aggregate => {
                    let hotspot_options = HotspotOptions {
                        top_n: options.top_n,
                        directory_depth: options.directory_depth,
                        count_merge_churn: options.count_merge_churn,
                    };
                    let calculator = HotspotCalculator::new(&config.filter, hotspot_options);
                    let (hotspots, summary) = rayon::join(
                        || calculator.compute(&history.records),
                        || CommitSummary::from_records(&history.records),
                    );
                    let identities = assembler.identity_table();
                    let metrics = RepositoryMetricsCalculator::new(&config.classification)
                        .compute_with_summary(&summary, identities, &hotspots);
                    let repo = RepoInfo::detect(source.name(), source.root(), &hotspots.tracked_files);
                    assembler.set_repo(repo);
                    assembler.summary(summary).hotspots(hotspots).metrics(metrics);
                }
                _ => {}
            }
            if failure.is_none() && stage != Stage::Assemble {
                self.checkpoint(stage);
            }
        }

        let profile = assembler.assemble();
        if failure.is_none() {
            self.checkpoint(Stage::Assemble);
        }
        (profile, failure)
    }

    fn extract(&self, source: &HistorySource<'_>) -> Result<ExtractedHistory> {
        let options = &self.config.analysis;
        let extractor = CommitHistoryExtractor::new(options.parse_error_threshold)
            .with_range(self.range.clone())
            .with_max_commits(options.max_commits);
        match source {
            HistorySource::Repository(repo) => {
                let walk = repo.commits(extractor.range(), extractor.max_commits())?;
                extractor.collect(walk)
            }
            HistorySource::RawLog { text, .. } => extractor.collect(LogParser::new(text)),
        }
    }

    fn guard(&self, stage: Stage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(RepographError::Cancelled(stage));
        }
        Ok(())
    }

    fn checkpoint(&mut self, stage: Stage) {
        let checkpoint = Checkpoint {
            stage,
            completed_at: Utc::now(),
        };
        info!(stage = %stage, at = %checkpoint.completed_at, "Stage complete");
        self.checkpoints.push(checkpoint);
    }

    fn finish(
        &mut self,
        profile: RepositoryProfile,
        ingest: Option<IngestReport>,
        failure: Option<(Stage, String)>,
    ) -> PipelineOutcome {
        let state = match failure {
            Some((stage, reason)) => {
                error!("Run failed at {}: {}", stage, reason);
                RunState::Failed { stage, reason }
            }
            None => RunState::Succeeded,
        };
        PipelineOutcome {
            state,
            profile,
            ingest,
            checkpoints: std::mem::take(&mut self.checkpoints),
        }
    }
}

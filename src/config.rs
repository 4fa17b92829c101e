//! Run configuration loaded from `repograph.toml`.
//!
//! ```toml
//! [filter]
//! ignore_extensions = ["png", "lock"]
//! ignore_prefixes = ["vendor/", "node_modules/"]
//! ignore_filenames = ["Cargo.lock"]
//!
//! [classification]
//! test_dirs = ["tests", "spec"]
//! doc_extensions = ["md", "rst"]
//!
//! [analysis]
//! top_n = 10
//! directory_depth = 1
//! count_merge_churn = false
//! parse_error_threshold = 0.05
//!
//! [ingest]
//! commit_batch_size = 500
//! file_batch_size = 2000
//! max_retries = 5
//! base_delay_ms = 100
//! timeout_ms = 5000
//! ```

use crate::error::{RepographError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "repograph.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub filter: FilterPolicy,
    pub classification: ClassificationRules,
    pub analysis: AnalysisOptions,
    pub ingest: IngestConfig,
}

impl AnalysisConfig {
    /// Load from an explicit path, or from `repograph.toml` at the repository
    /// root when present. Falls back to defaults otherwise.
    pub fn load(repo_root: &Path, explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => {
                let candidate = repo_root.join(CONFIG_FILE_NAME);
                if !candidate.exists() {
                    debug!("No {} found, using defaults", CONFIG_FILE_NAME);
                    return Ok(Self::default());
                }
                candidate
            }
        };

        let content = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&content)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AnalysisConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.analysis.parse_error_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(RepographError::Config(format!(
                "parse_error_threshold must be within 0..=1, got {threshold}"
            )));
        }
        if self.analysis.top_n == 0 {
            return Err(RepographError::Config("top_n must be at least 1".to_string()));
        }
        if self.ingest.commit_batch_size == 0 || self.ingest.file_batch_size == 0 {
            return Err(RepographError::Config("batch sizes must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    pub top_n: usize,
    pub directory_depth: u32,
    pub count_merge_churn: bool,
    pub parse_error_threshold: f64,
    pub max_commits: Option<usize>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            top_n: 10,
            directory_depth: 1,
            count_merge_churn: false,
            parse_error_threshold: 0.05,
            max_commits: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub commit_batch_size: usize,
    pub file_batch_size: usize,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub timeout_ms: u64,
}

impl IngestConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            commit_batch_size: 500,
            file_batch_size: 2000,
            max_retries: 5,
            base_delay_ms: 100,
            timeout_ms: 5000,
        }
    }
}

/// Paths excluded from churn aggregation. Immutable once built; entries are
/// normalized on construction (lowercase extensions without the leading dot,
/// prefixes without a leading `./` or `/`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FilterPolicySpec", into = "FilterPolicySpec")]
pub struct FilterPolicy {
    ignore_extensions: BTreeSet<String>,
    ignore_prefixes: Vec<String>,
    ignore_filenames: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct FilterPolicySpec {
    ignore_extensions: Vec<String>,
    ignore_prefixes: Vec<String>,
    ignore_filenames: Vec<String>,
}

impl From<FilterPolicySpec> for FilterPolicy {
    fn from(spec: FilterPolicySpec) -> Self {
        FilterPolicy::new(spec.ignore_extensions, spec.ignore_prefixes, spec.ignore_filenames)
    }
}

impl From<FilterPolicy> for FilterPolicySpec {
    fn from(policy: FilterPolicy) -> Self {
        FilterPolicySpec {
            ignore_extensions: policy.ignore_extensions.into_iter().collect(),
            ignore_prefixes: policy.ignore_prefixes,
            ignore_filenames: policy.ignore_filenames.into_iter().collect(),
        }
    }
}

impl FilterPolicy {
    pub fn new<E, P, F>(extensions: E, prefixes: P, filenames: F) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
        F: IntoIterator,
        F::Item: AsRef<str>,
    {
        let ignore_extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        let mut ignore_prefixes: Vec<String> = prefixes
            .into_iter()
            .map(|p| normalize_prefix(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        ignore_prefixes.sort();
        ignore_prefixes.dedup();
        let ignore_filenames = filenames
            .into_iter()
            .map(|f| f.as_ref().trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();

        Self {
            ignore_extensions,
            ignore_prefixes,
            ignore_filenames,
        }
    }

    /// A policy that keeps every path.
    pub fn none() -> Self {
        Self::new(Vec::<String>::new(), Vec::<String>::new(), Vec::<String>::new())
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        let path = path.trim_start_matches("./");
        if self.ignore_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            return true;
        }

        let file_name = path.rsplit('/').next().unwrap_or(path);
        if self.ignore_filenames.contains(file_name) {
            return true;
        }

        let lower = file_name.to_lowercase();
        self.ignore_extensions.iter().any(|ext| {
            lower.len() > ext.len() + 1
                && lower.ends_with(ext.as_str())
                && lower.as_bytes()[lower.len() - ext.len() - 1] == b'.'
        })
    }

    pub fn ignore_extensions(&self) -> impl Iterator<Item = &str> {
        self.ignore_extensions.iter().map(String::as_str)
    }

    pub fn ignore_prefixes(&self) -> impl Iterator<Item = &str> {
        self.ignore_prefixes.iter().map(String::as_str)
    }

    pub fn ignore_filenames(&self) -> impl Iterator<Item = &str> {
        self.ignore_filenames.iter().map(String::as_str)
    }
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self::new(
            [
                "png", "jpg", "jpeg", "gif", "ico", "svg", "pdf", "zip", "gz", "woff", "woff2",
                "ttf", "min.js", "map",
            ],
            ["node_modules/", "vendor/", "dist/", "third_party/"],
            [
                "Cargo.lock",
                "package-lock.json",
                "yarn.lock",
                "pnpm-lock.yaml",
                "poetry.lock",
                "go.sum",
            ],
        )
    }
}

fn normalize_prefix(prefix: &str) -> String {
    prefix
        .trim()
        .trim_start_matches("./")
        .trim_start_matches('/')
        .to_string()
}

/// Directory and extension rules used to classify tracked files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationRules {
    pub source_dirs: Vec<String>,
    pub source_extensions: Vec<String>,
    pub test_dirs: Vec<String>,
    pub test_file_prefixes: Vec<String>,
    pub test_file_markers: Vec<String>,
    pub doc_dirs: Vec<String>,
    pub doc_extensions: Vec<String>,
}

impl Default for ClassificationRules {
    fn default() -> Self {
        fn owned(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }

        Self {
            source_dirs: owned(&["src", "lib", "app", "pkg", "cmd", "internal"]),
            source_extensions: owned(&[
                "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "kt", "c", "h", "cc", "cpp",
                "hpp", "cs", "rb", "php", "swift", "scala", "sh",
            ]),
            test_dirs: owned(&["tests", "test", "spec", "__tests__", "testing"]),
            test_file_prefixes: owned(&["test_"]),
            test_file_markers: owned(&["_test.", ".test.", ".spec.", "_spec."]),
            doc_dirs: owned(&["docs", "doc", "documentation"]),
            doc_extensions: owned(&["md", "rst", "adoc", "txt"]),
        }
    }
}

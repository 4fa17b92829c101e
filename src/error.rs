use crate::pipeline::Stage;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RepographError>;

#[derive(Error, Debug)]
pub enum RepographError {
    #[error("Repository access error at {path}: {reason}")]
    RepositoryAccess { path: String, reason: String },
    #[error("Parse error: skipped {skipped} of {total} log entries, above the {threshold:.2} threshold")]
    Parse {
        skipped: usize,
        total: usize,
        threshold: f64,
    },
    #[error("Graph connection error after {attempts} attempt(s): {reason}")]
    GraphConnection { attempts: u32, reason: String },
    #[error("Graph constraint violation on {label} key '{key}': {reason}")]
    GraphConstraint {
        label: String,
        key: String,
        reason: String,
    },
    #[error("Graph store error: {0}")]
    GraphStore(String),
    #[error("Graph verification failed: {0}")]
    Verification(String),
    #[error("Run failed at stage {stage}: {reason}")]
    StageFailed { stage: Stage, reason: String },
    #[error("Run cancelled before stage {0}")]
    Cancelled(Stage),
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid date: {0}")]
    InvalidDate(String),
    #[error("Object find error: {0}")]
    ObjectFind(#[from] Box<gix::object::find::existing::Error>),
    #[error("Commit error: {0}")]
    Commit(#[from] Box<gix::object::commit::Error>),
    #[error("Object find with conversion error: {0}")]
    ObjectFindConv(#[from] Box<gix::object::find::existing::with_conversion::Error>),
    #[error("Object decode error: {0}")]
    ObjectDecode(#[from] Box<gix::objs::decode::Error>),
    #[error("Diff tree to tree error: {0}")]
    DiffTreeToTree(#[from] Box<gix::repository::diff_tree_to_tree::Error>),
}

impl RepographError {
    pub fn repository_access(path: impl Into<String>, reason: impl ToString) -> Self {
        RepographError::RepositoryAccess {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

// Manual From implementations for unboxed to boxed conversions
impl From<gix::object::find::existing::Error> for RepographError {
    fn from(err: gix::object::find::existing::Error) -> Self {
        RepographError::ObjectFind(Box::new(err))
    }
}

impl From<gix::object::commit::Error> for RepographError {
    fn from(err: gix::object::commit::Error) -> Self {
        RepographError::Commit(Box::new(err))
    }
}

impl From<gix::object::find::existing::with_conversion::Error> for RepographError {
    fn from(err: gix::object::find::existing::with_conversion::Error) -> Self {
        RepographError::ObjectFindConv(Box::new(err))
    }
}

impl From<gix::objs::decode::Error> for RepographError {
    fn from(err: gix::objs::decode::Error) -> Self {
        RepographError::ObjectDecode(Box::new(err))
    }
}

impl From<gix::repository::diff_tree_to_tree::Error> for RepographError {
    fn from(err: gix::repository::diff_tree_to_tree::Error) -> Self {
        RepographError::DiffTreeToTree(Box::new(err))
    }
}

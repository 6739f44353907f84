use crate::report::BuildReport;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuireError {
    #[error("Collection '{0}' is already registered")]
    DuplicateCollection(String),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Record not found: {collection}/{slug}")]
    NotFound { collection: String, slug: String },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid source pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("Rebuild failed: collection '{collection}' has no valid records")]
    RebuildFailed {
        collection: String,
        report: Box<BuildReport>,
    },

    #[error("Strict build failed with {} issue(s):\n{0}", .0.issue_count())]
    StrictBuildFailed(Box<BuildReport>),

    #[error("Rebuild cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

impl QuireError {
    /// The build report attached to a failed rebuild, if any.
    pub fn report(&self) -> Option<&BuildReport> {
        match self {
            QuireError::RebuildFailed { report, .. } => Some(report),
            QuireError::StrictBuildFailed(report) => Some(report),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, QuireError>;

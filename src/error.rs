//! Error types for the taxonomy builder
//!
//! Errors are split by how the orchestrator reacts to them:
//! - [`ClusteringError`] aborts only the branch it happened in
//! - [`LabelError`] is replaced by a fallback label
//! - [`StoreError`] and [`BuildError`] end the build with a failed status

use thiserror::Error;

/// Errors raised by dimensionality reduction and cluster discovery.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusteringError {
    #[error(
        "Input vectors have inconsistent dimensions (expected {expected}, found {found})\nSuggestion: Ensure all embeddings come from the same model"
    )]
    DimensionMismatch { expected: usize, found: usize },

    #[error(
        "Input vector {index} contains a non-finite value\nSuggestion: Filter NaN or infinite embeddings before building"
    )]
    NonFiniteInput { index: usize },

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error(
        "Reduction diverged after {epochs} epochs\nSuggestion: Try a larger umap_min_dist or fewer components"
    )]
    Diverged { epochs: usize },

    #[error("Clustering worker failed: {0}")]
    Worker(String),
}

/// Errors raised by a labeler. Never fatal to a build.
#[derive(Error, Debug)]
pub enum LabelError {
    #[error("Labeling request failed: {0}")]
    Request(String),

    #[error("Labeling provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Labeling response could not be parsed: {0}")]
    InvalidResponse(String),

    #[error("Labeler is not configured: {reason}")]
    NotConfigured { reason: String },

    #[error("Embedding generation failed: {0}")]
    Embedding(String),
}

/// Errors raised by record sources and topic stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    Write {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid data in '{path}': {reason}")]
    Corrupted {
        path: std::path::PathBuf,
        reason: String,
    },

    #[error("Topic {topic_id} not found for tenant '{tenant}'")]
    TopicNotFound { tenant: String, topic_id: String },

    #[error("Invalid tenant identifier '{0}'")]
    InvalidTenant(String),

    #[error("{0}")]
    General(String),
}

/// Errors that end a build. The service turns these into a failed result.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Failed to load records for tenant '{tenant}': {source}")]
    LoadRecords { tenant: String, source: StoreError },

    #[error("Failed to clear existing topics for tenant '{tenant}': {source}")]
    ClearTopics { tenant: String, source: StoreError },

    #[error("Failed to persist topic '{title}': {source}")]
    SaveTopic { title: String, source: StoreError },

    #[error("Failed to assign records to topic '{title}': {source}")]
    AssignRecords { title: String, source: StoreError },

    #[error("Invalid cluster configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("A build is already running for tenant '{tenant}'")]
    AlreadyRunning { tenant: String },

    #[error("Build cancelled")]
    Cancelled,

    #[error("Build exceeded the configured timeout of {secs}s")]
    TimedOut { secs: u64 },
}

impl BuildError {
    /// Get a stable status code for this error type.
    ///
    /// Returned in job status payloads for programmatic handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::LoadRecords { .. } => "LOAD_RECORDS_ERROR",
            Self::ClearTopics { .. } => "CLEAR_TOPICS_ERROR",
            Self::SaveTopic { .. } => "SAVE_TOPIC_ERROR",
            Self::AssignRecords { .. } => "ASSIGN_RECORDS_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::AlreadyRunning { .. } => "BUILD_ALREADY_RUNNING",
            Self::Cancelled => "BUILD_CANCELLED",
            Self::TimedOut { .. } => "BUILD_TIMED_OUT",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        Self::suggestions_for_code(&self.status_code())
    }

    /// Recovery suggestions for a status code reported in a failed result.
    ///
    /// Unknown codes have no suggestions.
    pub fn suggestions_for_code(code: &str) -> Vec<&'static str> {
        match code {
            "LOAD_RECORDS_ERROR" => vec![
                "Existing topics were left untouched",
                "Check that the tenant has imported records",
            ],
            "CLEAR_TOPICS_ERROR" => vec![
                "Check write permissions on the storage directory",
                "Retry the build, no new topics were written",
            ],
            "SAVE_TOPIC_ERROR" | "ASSIGN_RECORDS_ERROR" => vec![
                "The taxonomy is partially written, run the build again to replace it",
                "Check disk space and permissions in the storage directory",
            ],
            "INVALID_CONFIG" => vec![
                "Run 'taxonomist config' to inspect the effective settings",
                "Values outside the documented bounds are rejected",
            ],
            "BUILD_ALREADY_RUNNING" => {
                vec!["Wait for the running build to finish and poll its status"]
            }
            "BUILD_TIMED_OUT" => vec![
                "Raise server.build_timeout_secs or lower clustering.max_embeddings",
                "Topics persisted before the timeout remain in the store",
            ],
            _ => vec![],
        }
    }
}

impl From<tokio::task::JoinError> for ClusteringError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Worker(err.to_string())
    }
}

/// Result type alias for labeling operations
pub type LabelResult<T> = Result<T, LabelError>;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

//! Hierarchical topic taxonomies from text embeddings.
//!
//! A build loads a tenant's records, reduces their embeddings, finds dense
//! clusters, labels each cluster, and recurses into large clusters to form
//! a tree of topics. See [`taxonomy::TaxonomyService`] for the entry point.

pub mod clustering;
pub mod config;
pub mod display;
pub mod error;
pub mod labeling;
pub mod logging;
pub mod server;
pub mod store;
pub mod taxonomy;
pub mod types;

// Explicit exports for better API clarity
pub use clustering::{
    ClusterDiscoverer, ClusteringResult, DimensionReducer, HdbscanDiscoverer, UmapReducer,
};
pub use config::{ClusterConfig, ConfidenceMode, Settings};
pub use error::{BuildError, ClusteringError, LabelError, LabelResult, StoreError, StoreResult};
pub use labeling::{KeywordLabeler, LabelContext, Labeler, OpenAiLabeler, TopicLabel};
pub use store::{FileStore, MemoryStore, RecordSource, StoredRecord, TopicStore};
pub use taxonomy::{JobRegistry, LevelParams, Orchestrator, TaxonomyService};
pub use types::{
    BuildResult, BuildStatus, JobStatus, NewTopic, Record, RecordBatch, RecordId, Topic,
    TopicId, TopicResult,
};

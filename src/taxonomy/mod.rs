//! Taxonomy construction: level parameters, the recursive orchestrator,
//! and the tenant-facing service with its job registry.

pub mod jobs;
pub mod levels;
pub mod orchestrator;
pub mod service;

pub use jobs::JobRegistry;
pub use levels::LevelParams;
pub use orchestrator::{LevelInput, Orchestrator, ProgressFn};
pub use service::TaxonomyService;

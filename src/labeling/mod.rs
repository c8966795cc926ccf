//! Topic labeling: titles, descriptions and title embeddings for clusters.
//!
//! A [`Labeler`] never decides whether a build fails. Label errors are
//! replaced with [`fallback_label`] by the orchestrator and embedding errors
//! leave the topic without an embedding.

pub mod embedding;
pub mod keyword;
pub mod openai;
pub mod prompt;

pub use embedding::{EmbeddingGenerator, FastEmbedGenerator};
pub use keyword::KeywordLabeler;
pub use openai::OpenAiLabeler;

use crate::config::{LabelerConfig, LabelerProvider};
use crate::error::LabelResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Longest title kept, in characters.
pub const MAX_TITLE_CHARS: usize = 255;

/// Longest description kept, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 500;

const UNNAMED_TITLE: &str = "Unnamed Category";

/// Title and description for one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicLabel {
    pub title: String,
    pub description: String,
}

impl TopicLabel {
    /// Build a label, trimming both fields to their length limits.
    ///
    /// A blank title becomes "Unnamed Category".
    pub fn new(title: impl AsRef<str>, description: impl AsRef<str>) -> Self {
        let title = title.as_ref().trim();
        let title = if title.is_empty() { UNNAMED_TITLE } else { title };
        Self {
            title: prompt::truncate_chars(title, MAX_TITLE_CHARS).to_string(),
            description: prompt::truncate_chars(description.as_ref().trim(), MAX_DESCRIPTION_CHARS)
                .to_string(),
        }
    }
}

/// Label used when the labeler fails.
#[must_use]
pub fn fallback_label(cluster_size: usize) -> TopicLabel {
    TopicLabel {
        title: format!("Cluster ({cluster_size} items)"),
        description: "Auto-generated cluster".to_string(),
    }
}

/// Where in the tree the cluster being labeled sits.
#[derive(Debug, Clone, Copy)]
pub struct LabelContext<'a> {
    pub cluster_size: usize,
    pub level: u32,
    /// Title of the direct parent, absent at level 1
    pub parent_title: Option<&'a str>,
    /// Titles from the root down to the parent's parent
    pub ancestors: &'a [String],
}

/// Produces labels and embeddings for clusters.
#[async_trait]
pub trait Labeler: Send + Sync {
    /// Title and description for a cluster from its representative texts.
    async fn label(&self, texts: &[String], context: &LabelContext<'_>) -> LabelResult<TopicLabel>;

    /// Embedding of a label title.
    async fn embed(&self, text: &str) -> LabelResult<Vec<f32>>;
}

/// Construct the labeler selected in configuration.
pub fn build_labeler(config: &LabelerConfig) -> LabelResult<Arc<dyn Labeler>> {
    match config.provider {
        LabelerProvider::OpenAi => Ok(Arc::new(OpenAiLabeler::from_config(config)?)),
        LabelerProvider::Keyword => {
            let labeler = if config.local_embeddings {
                let generator = FastEmbedGenerator::new()?;
                KeywordLabeler::with_embeddings(Arc::new(generator))
            } else {
                KeywordLabeler::new()
            };
            Ok(Arc::new(labeler))
        }
    }
}
